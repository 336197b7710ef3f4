mod config;
mod telegram;
mod webhook;

use anyhow::{bail, Context, Result};
use ballot::{generate_codes, ElectionConfig, Engine, GenerationConsent, TallyEngine};
use ballot_sheets::{MetadataServerToken, SheetsStore, StaticToken, TokenSource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{BotConfig, SheetsConfig};
use crate::telegram::{Outbox, TelegramClient};
use crate::webhook::{router, AppState};

/// Code-redemption voting bot for a school election.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// (file path, optional) Election description in JSON. The built-in
    /// election is used when omitted.
    #[arg(short, long, env = "ELECTION_CONFIG")]
    election: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the webhook and serve voters.
    Serve,
    /// Wipe the codes sheet and issue fresh codes for the class roster.
    GenerateCodes {
        /// Required. Every existing code and claim is destroyed.
        #[arg(long)]
        confirm_wipe: bool,
    },
    /// Print the current results.
    Tally,
}

fn load_election(path: Option<&PathBuf>) -> Result<Arc<ElectionConfig>> {
    let election = match path {
        Some(path) => ElectionConfig::from_path(path)
            .with_context(|| format!("Failed to load election from {}", path.display()))?,
        None => ElectionConfig::default(),
    };
    election.validate().context("Election config is invalid")?;
    Ok(Arc::new(election))
}

/// Upper bound on any single HTTP request, so a hung connection cannot pin a
/// voter's session.
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn sheets_store(http: reqwest::Client) -> Result<Arc<SheetsStore>> {
    let config = SheetsConfig::from_env()?;
    let tokens: Arc<dyn TokenSource> = match config.access_token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => {
            info!("No SHEETS_ACCESS_TOKEN set, using the metadata server");
            Arc::new(MetadataServerToken::new(http.clone()))
        }
    };
    Ok(Arc::new(SheetsStore::new(http, config.spreadsheet_id, tokens)))
}

async fn serve(
    election: Arc<ElectionConfig>,
    store: Arc<SheetsStore>,
    http: reqwest::Client,
) -> Result<()> {
    let config = BotConfig::from_env()?;
    let telegram = Arc::new(TelegramClient::new(http, &config.telegram_token));

    let engine = Arc::new(Engine::new(store, election));

    telegram
        .set_webhook(&config.webhook_url(), &config.webhook_secret)
        .await
        .context("Failed to register webhook")?;
    info!("Webhook registered at {}", config.webhook_url());

    let (notices_tx, mut notices_rx) = mpsc::unbounded_channel();
    let sweeper = engine.spawn_sweeper(config.sweep_interval, notices_tx);
    let notifier = {
        let telegram = telegram.clone();
        tokio::spawn(async move {
            while let Some((voter, reply)) = notices_rx.recv().await {
                if let Err(e) = telegram.deliver(&voter, &reply).await {
                    error!(voter = %voter, "Failed to deliver timeout notice: {:#}", e);
                }
            }
        })
    };

    let app = router(Arc::new(AppState {
        engine,
        outbox: telegram,
        webhook_secret: config.webhook_secret.clone(),
    }));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    notifier.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let election = load_election(cli.election.as_ref())?;
    let http = http_client(election.store_timeout())?;

    match cli.command {
        Command::Serve => {
            info!("Starting ballot bot");
            let store = sheets_store(http.clone())?;
            serve(election, store, http).await
        }
        Command::GenerateCodes { confirm_wipe } => {
            if !confirm_wipe {
                bail!("Refusing to wipe the codes sheet without --confirm-wipe");
            }
            let store = sheets_store(http)?;
            let summary = generate_codes(
                &*store,
                &election.classes,
                GenerationConsent::confirmed_wipe(),
            )
            .await
            .context("Code generation failed")?;
            for (class, count) in &summary.per_class {
                println!("{class}: {count} codes");
            }
            println!("Total: {} codes", summary.total);
            Ok(())
        }
        Command::Tally => {
            let store = sheets_store(http)?;
            let report = TallyEngine::new(store, election)
                .compute()
                .await
                .context("Failed to read the votes sheet")?;
            println!("{}", report.render());
            Ok(())
        }
    }
}
