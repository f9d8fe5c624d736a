use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

use smbspider::config::Config;
use smbspider::metrics;
use smbspider::scheduler::SchedulerServer;

use super::{finish_exporter, shutdown_channel, spawn_exporter, wait_for_shutdown};

/// Command-line overrides for the scheduler service
#[derive(Debug, Default)]
pub struct SchedulerParams {
    pub servers: Option<PathBuf>,
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub lease_timeout: Option<u64>,
    pub metrics_addr: Option<SocketAddr>,
}

impl SchedulerParams {
    fn apply(self, config: &mut Config) {
        let section = &mut config.scheduler;
        if let Some(servers) = self.servers {
            section.servers_file = Some(servers);
        }
        if let Some(port) = self.port {
            section.port = port;
        }
        if let Some(bind) = self.bind {
            section.bind_host = Some(bind);
        }
        if let Some(secs) = self.lease_timeout {
            section.lease_timeout_secs = secs;
        }
        if let Some(addr) = self.metrics_addr {
            section.metrics_address = Some(addr);
        }
    }
}

/// Run the scheduler until Ctrl+C
pub async fn scheduler(mut config: Config, params: SchedulerParams) -> Result<()> {
    params.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let runtime = config
        .scheduler_config()
        .context("Invalid scheduler configuration")?;

    if runtime.servers_file.is_none() {
        tracing::warn!("No servers file configured; every acquire will come back empty");
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    let metrics_address = runtime.metrics_address;
    let mut server = SchedulerServer::new(runtime).context("Failed to create scheduler")?;
    let local_addr = server.bind().await.context("Failed to bind scheduler socket")?;

    println!("Starting Scheduler");
    println!("==================");
    println!("  Listening: udp://{local_addr}");
    println!("  Targets: {}", server.registry().len());
    println!(
        "  Lease Timeout: {}s",
        server.registry().lease_timeout().as_secs()
    );
    if let Some(addr) = metrics_address {
        println!("  Metrics: http://{addr}/metrics");
    }
    println!("Press Ctrl+C to stop.\n");

    let shutdown = shutdown_channel();

    let exporter = spawn_exporter(metrics_address, &shutdown);

    server
        .serve_with_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("Scheduler failed")?;

    finish_exporter(exporter).await;

    println!("Scheduler stopped.");
    Ok(())
}
