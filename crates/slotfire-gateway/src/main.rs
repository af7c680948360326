use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use slotfire_core::{config::SlotfireConfig, OwnerId};
use slotfire_scheduler::{
    CollisionGuard, DispatchPolicy, Dispatcher, JobStore, Notifier, SchedulerEngine,
    SchedulerHandle, SqliteJobStore,
};
use tracing::info;

mod app;
mod auth;
mod executor;
mod http;
mod notify;
mod report;

#[derive(Parser)]
#[command(name = "slotfire-gateway", version, about = "Scheduled dispatch gateway")]
struct Cli {
    /// Config file (default: ~/.slotfire/slotfire.toml).
    #[arg(short, long, env = "SLOTFIRE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway and the timer engine (default).
    Serve,
    /// Delete failed and cancelled jobs last touched before the cutoff.
    Purge {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
    /// Print per-status job counts as JSON.
    Stats {
        /// Restrict the counts to one owner.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Write an owner's job history as JSON Lines.
    Export {
        #[arg(long)]
        owner: String,
        /// Destination file (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // load config: --config > SLOTFIRE_CONFIG env > ~/.slotfire/slotfire.toml
    let config = SlotfireConfig::load(cli.config.as_deref());
    init_tracing(config.as_ref().map(|c| c.logging.json).unwrap_or(false));
    let config = config.context("loading configuration")?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::open(db_path).with_context(|| format!("opening database {db_path}"))?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Purge { older_than_days } => {
            let removed = store.purge_older_than(older_than_days)?;
            info!(removed, older_than_days, "purge complete");
            Ok(())
        }
        Command::Stats { owner } => {
            let owner = owner.map(OwnerId::from);
            let report = report::stats(store.as_ref(), owner.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Export { owner, output } => {
            let owner = OwnerId::from(owner);
            let out: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let rows = report::export_history(store.as_ref(), &owner, BufWriter::new(out))?;
            info!(owner = %owner, rows, "export complete");
            Ok(())
        }
    }
}

async fn serve(config: SlotfireConfig, store: Arc<dyn JobStore>) -> anyhow::Result<()> {
    let executor = Arc::new(executor::WebhookExecutor::from_config(&config.executor)?);
    let notifier: Arc<dyn Notifier> = match &config.notifier.telegram {
        Some(tg) => {
            info!("owner notifications via Telegram");
            Arc::new(notify::TelegramNotifier::new(tg)?)
        }
        None => {
            info!("no notifier configured, owner notifications go to the log");
            Arc::new(notify::LogNotifier)
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(CollisionGuard::new()),
        executor,
        notifier,
        DispatchPolicy::from(&config.scheduler),
    ));
    let engine = Arc::new(SchedulerEngine::new(store.clone(), dispatcher));
    let armed = engine.start()?;
    info!(armed, "scheduler engine started");

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .context("invalid gateway.bind / gateway.port")?;
    let scheduler = SchedulerHandle::new(store, engine.clone());
    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Slotfire gateway listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // pending rows stay in the database and are re-armed on next start
    engine.shutdown();
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "slotfire_gateway=info,slotfire_scheduler=info,tower_http=debug".into()
    });
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
