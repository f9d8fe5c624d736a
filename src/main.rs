use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smbspider::config::Config;

mod commands;

use commands::{SchedulerParams, SpiderParams};

#[derive(Parser)]
#[command(
    name = "smbspider",
    version,
    about = "Lease scheduler and spider workers for SMB server indexing",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lease scheduler
    Scheduler {
        /// Newline-delimited list of servers to hand out
        #[arg(short, long)]
        servers: Option<PathBuf>,

        /// UDP port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (all interfaces when omitted)
        #[arg(short, long)]
        bind: Option<String>,

        /// Lease timeout in seconds
        #[arg(long)]
        lease_timeout: Option<u64>,

        /// Address for the Prometheus exporter
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
    },

    /// Run a spider worker
    Spider {
        /// Scheduler address (host or host:port)
        #[arg(short, long)]
        scheduler: Option<String>,

        /// Directory holding one mounted share per server
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Local UDP port
        #[arg(long)]
        local_port: Option<u16>,

        /// Maximum directory depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Address for the Prometheus exporter
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,

        /// Scan one server and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "smbspider starting");

    match cli.command {
        Commands::Scheduler {
            servers,
            port,
            bind,
            lease_timeout,
            metrics_addr,
        } => {
            tracing::info!(
                servers = ?servers,
                port = ?port,
                bind = ?bind,
                lease_timeout = ?lease_timeout,
                "Starting scheduler command"
            );
            commands::scheduler(
                config,
                SchedulerParams {
                    servers,
                    port,
                    bind,
                    lease_timeout,
                    metrics_addr,
                },
            )
            .await?;
        }

        Commands::Spider {
            scheduler,
            root,
            db,
            local_port,
            max_depth,
            metrics_addr,
            once,
        } => {
            tracing::info!(
                scheduler = ?scheduler,
                root = ?root,
                db = ?db,
                once = %once,
                "Starting spider command"
            );
            commands::spider(
                config,
                SpiderParams {
                    scheduler,
                    root,
                    db,
                    local_port,
                    max_depth,
                    metrics_addr,
                    once,
                },
            )
            .await?;
        }
    }

    tracing::info!("smbspider completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("smbspider=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("smbspider={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
