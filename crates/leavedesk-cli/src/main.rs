//! leavedesk - terminal front end for the leave management dashboard session.
//!
//! Signs in against the dashboard API, keeps the session between runs and
//! makes authenticated calls through the shared request pipeline.

mod commands;

use std::io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use leavedesk_core::{AuthContext, Config, Notification};

/// Log file name inside the cache directory
const LOG_FILE: &str = "leavedesk.log";

#[derive(Parser)]
#[command(name = "leavedesk", version, about = "Sign in to the leave dashboard and call its API")]
struct Cli {
    /// Override the API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and remember the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
        /// Do not expire the session after 7 days
        #[arg(long)]
        no_remember: bool,
    },
    /// End the session and erase it from storage
    Logout,
    /// Show the signed-in user (protected view)
    Whoami,
    /// Show session details
    Status,
    /// Send an authenticated request and print the response body
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Print notifications until every publisher is gone
async fn render_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => eprintln!("{}", notification),
            Err(RecvError::Lagged(missed)) => eprintln!("[warning] {} notifications dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    }
    .with_env_overrides();
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, storage = ?config.storage, "leavedesk starting");

    let ctx = AuthContext::new(&config)?;
    let renderer = tokio::spawn(render_notifications(ctx.notifications().subscribe()));
    ctx.rehydrate();

    let result = commands::run(cli.command, &ctx, &mut config).await;

    // Closing the bus lets the renderer flush and finish
    drop(ctx);
    if let Err(e) = renderer.await {
        warn!(error = %e, "Notification renderer failed");
    }

    result
}
