//! Padmap console
//!
//! Connects to the mapping backend and runs the operator console.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use padmap::cli::{self, Console, Flow};
use padmap::config::ClientConfig;
use padmap::input::{load_default_definitions, InputDefinitions};
use padmap::paths::AppPaths;
use padmap::state::ConfigSnapshot;
use padmap::transport::{spawn_client, Broadcast, ClientOptions, Intent, TransportHandle};
use padmap::Session;

/// Padmap - bind game controller inputs to OSC channels, variables and layers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Backend base URL, overrides the config file
    #[arg(long, env = "PADMAP_SERVER_URL")]
    server_url: Option<String>,

    /// Write a daily JSON log (to the config's log_dir, or the default logs directory)
    #[arg(long)]
    log_file: bool,

    /// Print the JSON schema of the wire messages and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.print_schema {
        print_schema()?;
        return Ok(());
    }

    let paths = AppPaths::detect();
    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());
    let mut config = ClientConfig::load_or_default(&config_path).await?;
    if let Some(url) = args.server_url {
        config.server_url = url;
        config.validate()?;
    }

    let log_dir = paths.log_dir(config.log_dir.as_deref(), args.log_file);
    let _log_guard = init_logging(&args.log_level, log_dir.as_deref())?;

    info!("Starting padmap v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    let definitions = match &config.input_definitions {
        Some(path) => InputDefinitions::load_from_csv(path)
            .await
            .with_context(|| format!("Failed to load input definitions: {}", path.display()))?,
        None => load_default_definitions()?,
    };

    let (handle, intent_rx) = TransportHandle::channel();
    let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
    let transport = spawn_client(
        ClientOptions {
            url: config.socket_url(),
            definitions_url: Some(config.definitions_url()),
            reconnect_delay: config.reconnect_delay(),
        },
        &handle,
        intent_rx,
        broadcast_tx,
    );

    let history = match paths.ensure_base_dir() {
        Ok(()) => Some(paths.history),
        Err(e) => {
            warn!("Console history disabled: {}", e);
            None
        }
    };
    let lines = cli::spawn_line_reader(history)?;

    println!("padmap {} - type 'help' for commands", env!("CARGO_PKG_VERSION"));
    println!("Connecting to {}", config.server_url);

    let session = Session::new(definitions, handle);
    let console = Console::new(&config.console);
    run_app(session, console, broadcast_rx, lines).await;

    transport.abort();
    info!("padmap shutdown complete");
    Ok(())
}

async fn run_app(
    mut session: Session,
    mut console: Console,
    mut broadcasts: mpsc::UnboundedReceiver<Broadcast>,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    loop {
        tokio::select! {
            Some(broadcast) = broadcasts.recv() => {
                let events = session.handle_broadcast(broadcast);
                console.report(&session, &events);
            }

            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Console closed");
                    break;
                };
                if console.handle_line(&mut session, &line) == Flow::Quit {
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

fn init_logging(level: &str, log_dir: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "padmap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

fn print_schema() -> Result<()> {
    let schema = serde_json::json!({
        "intent": schemars::schema_for!(Intent),
        "configuration": schemars::schema_for!(ConfigSnapshot),
    });
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
