use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use smbspider::config::Config;
use smbspider::metrics;
use smbspider::scheduler::LeaseClient;
use smbspider::spider::{MountCrawler, SpiderRunner};
use smbspider::storage::SqliteSession;

use super::{finish_exporter, shutdown_channel, spawn_exporter};

/// Command-line overrides for a spider worker
#[derive(Debug, Default)]
pub struct SpiderParams {
    /// Scheduler as `host` or `host:port`
    pub scheduler: Option<String>,
    pub root: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub local_port: Option<u16>,
    pub max_depth: Option<usize>,
    pub metrics_addr: Option<SocketAddr>,
    /// Scan a single server and exit
    pub once: bool,
}

impl SpiderParams {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            let (host, port) = split_host_port(scheduler)?;
            config.client.scheduler_host = host;
            if let Some(port) = port {
                config.client.scheduler_port = port;
            }
        }
        if let Some(root) = &self.root {
            config.spider.mount_root = root.clone();
        }
        if let Some(db) = &self.db {
            config.spider.database = db.clone();
        }
        if let Some(port) = self.local_port {
            config.client.local_port = port;
        }
        if let Some(depth) = self.max_depth {
            config.spider.max_depth = depth;
        }
        if let Some(addr) = self.metrics_addr {
            config.spider.metrics_address = Some(addr);
        }
        Ok(())
    }
}

/// Split `host[:port]`; bracketed IPv6 literals are accepted
fn split_host_port(value: &str) -> Result<(String, Option<u16>)> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), Some(addr.port())));
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid scheduler port in '{value}'"))?;
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((value.trim_matches(|c| c == '[' || c == ']').to_string(), None)),
    }
}

/// Run a spider worker until Ctrl+C (or for one scan with `--once`)
pub async fn spider(mut config: Config, params: SpiderParams) -> Result<()> {
    params.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    let client_config = config
        .client_config()
        .context("Invalid client configuration")?;
    let client = LeaseClient::connect(client_config)
        .await
        .context("Failed to connect to scheduler")?;

    let storage = SqliteSession::connect(&config.spider.database).with_context(|| {
        format!(
            "Failed to open database: {}",
            config.spider.database.display()
        )
    })?;

    let crawler = MountCrawler::new(config.spider.mount_root.clone())
        .with_max_depth(config.spider.max_depth)
        .with_mime_sniffing(config.spider.sniff_mime);

    println!("Starting Spider");
    println!("===============");
    println!("  Scheduler: {}", client.scheduler_addr());
    println!("  Mount Root: {}", config.spider.mount_root.display());
    println!("  Database: {}", config.spider.database.display());
    if let (Some(addr), false) = (config.spider.metrics_address, params.once) {
        println!("  Metrics: http://{addr}/metrics");
    }
    println!();

    let mut runner = SpiderRunner::new(
        client,
        Arc::new(crawler),
        Arc::new(storage),
        config.spider_config(),
    );

    // A single scan ends before anything could scrape it
    if params.once {
        let report = runner.run_once().await.context("Scan failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let shutdown = shutdown_channel();
    let exporter = spawn_exporter(config.spider.metrics_address, &shutdown);

    let summary = runner
        .run(shutdown)
        .await
        .context("Spider stopped with an error")?;

    finish_exporter(exporter).await;

    println!(
        "Spider stopped. {} scans ({} failed), {} files indexed.",
        summary.scans, summary.failed_scans, summary.files
    );
    Ok(())
}
