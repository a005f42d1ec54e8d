//! Runtime configuration resolved from the command line and environment.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::gmail_api::{ClientConfig, GMAIL_READONLY_SCOPE};

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
const TOKEN_CACHE_FILE: &str = "tokens.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub client_secret: PathBuf,
    pub client: ClientConfig,
    pub max_results: u32,
    pub open_browser: bool,
    pub json_output: bool,
    /// Set only when generation was requested.
    pub openai_api_key: Option<String>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let token_cache = match &cli.token_cache {
            Some(path) => path.clone(),
            None => default_token_cache()?,
        };

        let openai_api_key = if cli.generate {
            let key = std::env::var(OPENAI_API_KEY_VAR)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    Error::Config(format!("--generate needs {} to be set", OPENAI_API_KEY_VAR))
                })?;
            Some(key)
        } else {
            None
        };

        if cli.max_results == 0 {
            return Err(Error::Config("--max-results must be at least 1".to_string()));
        }

        Ok(Self {
            client_secret: cli.client_secret.clone(),
            client: ClientConfig {
                scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
                token_cache,
            },
            max_results: cli.max_results,
            open_browser: !cli.no_browser,
            json_output: cli.json,
            openai_api_key,
        })
    }
}

/// `<config dir>/inboxpost/tokens.json`
pub fn default_token_cache() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join(TOKEN_CACHE_FILE))
        .ok_or_else(|| Error::Config("could not determine the user config directory".to_string()))
}
