use crate::gmail_api::{CredentialStore, KeyringCredentialStore};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the OAuth client secret downloaded from Google Cloud Console.
    #[clap(long, env = "INBOXPOST_CLIENT_SECRET", default_value = "client_secret.json")]
    pub client_secret: PathBuf,

    /// Where the OAuth library keeps its tokens. Defaults to the user config directory.
    #[clap(long, env = "INBOXPOST_TOKEN_CACHE")]
    pub token_cache: Option<PathBuf>,

    /// Number of recent inbox messages to fetch.
    #[clap(long, env = "INBOXPOST_MAX_RESULTS", default_value_t = 10)]
    pub max_results: u32,

    /// Generate posts for each message (needs OPENAI_API_KEY).
    #[clap(long)]
    pub generate: bool,

    /// Print the sign-in URL instead of opening a browser.
    #[clap(long)]
    pub no_browser: bool,

    /// Print records as JSON lines.
    #[clap(long)]
    pub json: bool,

    /// Sign out of Google and exit.
    #[clap(long)]
    pub sign_out: bool,

    /// Clear the stored credentials from the system keyring and exit.
    #[clap(long)]
    pub clear_keyring: bool,
}

pub fn handle_keyring_clear() -> Result<(), keyring::Error> {
    let store = KeyringCredentialStore::open()?;
    store.clear();
    println!("Credentials removed from keyring. Exiting.");
    Ok(())
}
