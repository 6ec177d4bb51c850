use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use dogear::bookmark::dispatcher;
use dogear::bookmark::Orchestrator;
use dogear::config::Config;
use dogear::db::Ledger;
use dogear::discord::{gateway, DiscordClient, MessageApi};

/// Reaction events buffered between the gateway and the dispatcher.
const EVENT_BUFFER: usize = 256;

/// Dogear: reaction-driven message bookmarks for Discord.
///
/// React to any message with the bookmark emoji and the bot sends you a
/// private copy; react to the copy with the delete emoji to drop it again.
#[derive(Parser)]
#[command(name = "dogear", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Connect to Discord and process bookmark reactions until stopped
    Run,

    /// Show ledger status (bookmarks, tracked messages)
    Status,

    /// Show the most-bookmarked messages of a server
    Top {
        /// Server (guild) id
        #[arg(long)]
        guild: String,

        /// Number of messages to show (default: 10)
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(&config)?;

    match cli.command {
        Commands::Init => {
            info!("Initializing dogear database...");
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", storage_display(&config));
            println!("Tables created: {table_count}");
            println!("\nDogear is ready. Next step: set DISCORD_TOKEN in your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: cargo run -- run");
        }

        Commands::Run => {
            config.require_token()?;
            let db = open_database(&config).await?;
            run(&config, db).await?;
        }

        Commands::Status => {
            let storage = if is_postgres(&config) {
                dogear::status::Storage::Postgres
            } else {
                dogear::status::Storage::Sqlite(&config.db_path)
            };
            if !storage.is_initialized() {
                dogear::status::show_uninitialized();
                return Ok(());
            }
            let db = open_database(&config).await?;
            dogear::status::show(&db, storage).await?;
        }

        Commands::Top { guild, limit } => {
            let db = open_database(&config).await?;
            let top = db.top_bookmarked(&guild, limit).await?;
            dogear::status::display_top(&guild, &top);
        }
    }

    Ok(())
}

/// Structured logging to stderr, or appended to DOGEAR_LOG_FILE when set.
fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dogear=info"));

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Wire gateway → dispatcher → orchestrator and run until a shutdown signal
/// or an unrecoverable gateway failure.
async fn run(config: &Config, db: Arc<dyn Ledger>) -> Result<()> {
    let client = Arc::new(DiscordClient::new(
        &config.api_url,
        &config.discord_token,
        config.api_timeout,
    )?);
    let me = client
        .current_user()
        .await
        .context("Failed to identify the bot account. Is DISCORD_TOKEN valid?")?;
    info!(
        bot_user_id = %me.id,
        bot = me.display_name(),
        strategy = %config.strategy,
        "Starting dogear"
    );

    let orchestrator = Arc::new(Orchestrator::new(db, client, me.id.clone(), config.settings()));

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut gateway_task = {
        let url = config.gateway_url.clone();
        let token = config.discord_token.clone();
        let shutdown = stop_rx.clone();
        tokio::spawn(async move { gateway::run(&url, &token, events_tx, shutdown).await })
    };
    let dispatch_task = tokio::spawn(dispatcher::run(
        orchestrator,
        events_rx,
        stop_rx,
        dispatcher::DEFAULT_GRACE,
    ));

    println!(
        "{}",
        format!("Dogear is running as {}. Press Ctrl-C to stop.", me.display_name()).bold()
    );

    let gateway_finished = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
        joined = &mut gateway_task => Some(joined),
    };

    let _ = stop_tx.send(true);
    let summary = dispatch_task.await.context("Dispatcher task panicked")?;
    let gateway_result = match gateway_finished {
        Some(joined) => joined,
        None => gateway_task.await,
    };
    gateway_result.context("Gateway task panicked")??;

    println!(
        "Stopped. Events received: {}, failed: {}, aborted: {}",
        summary.received, summary.failed, summary.aborted
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn is_postgres(config: &Config) -> bool {
    config
        .database_url
        .as_deref()
        .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
}

fn storage_display(config: &Config) -> String {
    if is_postgres(config) {
        "PostgreSQL".to_string()
    } else {
        config.db_path.clone()
    }
}

/// Open the configured ledger (must already exist for SQLite).
async fn open_database(config: &Config) -> Result<Arc<dyn Ledger>> {
    if let Some(ref url) = config.database_url {
        if is_postgres(config) {
            #[cfg(feature = "postgres")]
            {
                info!("Using PostgreSQL backend");
                return dogear::db::connect_postgres(url).await;
            }
            #[cfg(not(feature = "postgres"))]
            anyhow::bail!(
                "DATABASE_URL points to PostgreSQL ({}) but the 'postgres' feature is not compiled in.\n\
                 Rebuild with: cargo build --features postgres",
                redact(url)
            );
        }
    }
    open_sqlite(config)
}

/// Initialize the ledger (create if needed).
async fn init_database(config: &Config) -> Result<Arc<dyn Ledger>> {
    if let Some(ref url) = config.database_url {
        if is_postgres(config) {
            #[cfg(feature = "postgres")]
            {
                info!("Using PostgreSQL backend");
                return dogear::db::connect_postgres(url).await;
            }
            #[cfg(not(feature = "postgres"))]
            anyhow::bail!(
                "DATABASE_URL points to PostgreSQL ({}) but the 'postgres' feature is not compiled in.\n\
                 Rebuild with: cargo build --features postgres",
                redact(url)
            );
        }
    }
    initialize_sqlite(config)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn Ledger>> {
    dogear::db::open_sqlite(&config.db_path)
}

#[cfg(feature = "sqlite")]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn Ledger>> {
    dogear::db::initialize_sqlite(&config.db_path)
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn Ledger>> {
    anyhow::bail!("No storage backend: set DATABASE_URL or rebuild with the 'sqlite' feature")
}

#[cfg(not(feature = "sqlite"))]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn Ledger>> {
    open_sqlite(config)
}

/// Strip credentials from a connection URL before printing it.
#[cfg(not(feature = "postgres"))]
fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("postgres://…@{host}"),
        None => url.to_string(),
    }
}
