use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use inboxpost::cli::{handle_keyring_clear, Cli};
use inboxpost::config::Config;
use inboxpost::generation::{OpenAiGenerator, PostGenerator};
use inboxpost::gmail_api::{AuthSession, InstalledFlowProvider, KeyringCredentialStore, MessageFetcher};
use inboxpost::pipeline::Pipeline;
use inboxpost::types::MessageRecord;
use inboxpost::{Error, Result};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    if cli.clear_keyring {
        if let Err(e) = handle_keyring_clear() {
            eprintln!("Failed to delete credentials from keyring: {}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match KeyringCredentialStore::open() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("System keyring unavailable: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let provider = InstalledFlowProvider::new(&config.client_secret, config.open_browser);
    let session = Arc::new(AuthSession::new(
        Box::new(provider),
        Box::new(store),
        config.client.clone(),
    ));

    match run(&cli, &config, session.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            if e.requires_reauth() {
                // Drop the dead session so the next run goes through consent again.
                if let Err(sign_out_err) = session.sign_out().await {
                    tracing::warn!("Failed to clear session: {}", sign_out_err);
                }
                eprintln!("Run inboxpost again to sign in.");
            } else if matches!(e, Error::AuthInit(_)) {
                eprintln!(
                    "Check that {} exists and is a valid OAuth client secret.",
                    config.client_secret.display()
                );
            } else {
                eprintln!("Run the command again to retry.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: &Config, session: Arc<AuthSession>) -> Result<()> {
    session.initialize().await?;

    if cli.sign_out {
        session.sign_out().await?;
        println!("Signed out.");
        return Ok(());
    }

    if !session.is_authenticated() {
        session.sign_in().await?;
    }

    let client = reqwest::Client::new();
    let fetcher = MessageFetcher::new(client.clone(), session);
    let records = Pipeline::new(fetcher).run(config.max_results).await?;
    if records.is_empty() {
        println!("No emails found in your inbox.");
        return Ok(());
    }

    let generator = config
        .openai_api_key
        .as_ref()
        .map(|key| OpenAiGenerator::new(client.clone(), key.clone()));

    for record in &records {
        let posts = match &generator {
            Some(generator) => Some(generator.generate(record.clean_body()).await?),
            None => None,
        };
        print_record(record, posts.as_deref(), config.json_output);
    }
    Ok(())
}

fn print_record(record: &MessageRecord, posts: Option<&[String]>, json: bool) {
    if json {
        let line = serde_json::json!({ "message": record, "posts": posts });
        println!("{}", line);
        return;
    }

    println!("== {} ({})", record.subject(), record.id());
    if record.clean_body().is_empty() {
        println!("{}", record.snippet());
    } else {
        println!("{}", record.clean_body());
    }
    if let Some(posts) = posts {
        for (i, post) in posts.iter().enumerate() {
            println!("\n-- suggestion {} --\n{}", i + 1, post);
        }
    }
    println!();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
