//! Spider worker
//!
//! A spider repeatedly leases a server from the scheduler, crawls it, writes
//! what it found to storage and releases the lease. The lease is released
//! whatever happens during the scan.
//!
//! ```text
//!  get_server ──▶ crawl ──▶ begin / upsert* / commit ──▶ release_server
//!                   │              │ (rollback on error)        ▲
//!                   └──── error ───┴────────────────────────────┘
//! ```

pub mod crawl;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::metrics;
use crate::scheduler::LeaseClient;
use crate::storage::{FileRecord, StorageSession};

pub use crawl::{CrawlOutput, Crawler, MountCrawler};

/// Default pause between scans
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Spider run-loop settings
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    /// Pause between two scans
    pub idle_delay: Duration,

    /// Delete records of files that were not seen by the latest scan
    ///
    /// Skipped when the crawl could not read every entry.
    pub prune_missing: bool,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            idle_delay: DEFAULT_IDLE_DELAY,
            prune_missing: true,
        }
    }
}

// ============================================================================
// Scan Report
// ============================================================================

/// Outcome of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Success,
    /// Records stored, but some entries were unreadable and nothing was pruned
    Partial,
    CrawlFailed,
    StorageFailed,
}

impl ScanStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::CrawlFailed => "crawl_failed",
            Self::StorageFailed => "storage_failed",
        }
    }
}

/// Result of scanning one leased server
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub server: String,
    pub status: ScanStatus,
    pub files: u64,
    pub removed: u64,
    pub skipped: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ScanReport {
    /// Check if the scan succeeded
    pub fn is_success(&self) -> bool {
        self.status == ScanStatus::Success
    }

    /// Check if nothing was stored
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ScanStatus::CrawlFailed | ScanStatus::StorageFailed)
    }
}

/// Totals over a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scans: u64,
    pub failed_scans: u64,
    pub files: u64,
}

impl RunSummary {
    fn record(&mut self, report: &ScanReport) {
        self.scans += 1;
        self.files += report.files;
        if report.is_failure() {
            self.failed_scans += 1;
        }
    }
}

// ============================================================================
// Spider Runner
// ============================================================================

/// Drives the lease, crawl, store, release cycle
pub struct SpiderRunner {
    client: LeaseClient,
    crawler: Arc<dyn Crawler>,
    storage: Arc<dyn StorageSession>,
    config: SpiderConfig,
}

impl SpiderRunner {
    /// Create a runner
    pub fn new(
        client: LeaseClient,
        crawler: Arc<dyn Crawler>,
        storage: Arc<dyn StorageSession>,
        config: SpiderConfig,
    ) -> Self {
        Self {
            client,
            crawler,
            storage,
            config,
        }
    }

    /// Lease client used by this runner
    pub fn client(&self) -> &LeaseClient {
        &self.client
    }

    /// Lease one server, scan it and release it
    pub async fn run_once(&mut self) -> Result<ScanReport> {
        let server = self.client.get_server().await?;
        self.scan_leased(server).await
    }

    /// Run scans until `shutdown` turns `true`
    ///
    /// Waiting for a lease is interrupted by shutdown; a scan in progress is
    /// always finished and its lease released first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        tracing::info!(scheduler = %self.client.scheduler_addr(), "Spider started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let leased = tokio::select! {
                leased = self.client.get_server() => Some(leased?),
                _ = shutdown.changed() => None,
            };

            let Some(server) = leased else {
                // Cancelling the wait can leave a grant in the socket. One that
                // arrives later still expires with the lease timeout.
                if let Err(e) = self.client.release_stale_grants().await {
                    tracing::warn!(error = %e, "Failed to hand back pending grant");
                }
                break;
            };

            let report = self.scan_leased(server).await?;
            summary.record(&report);

            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(
            scans = summary.scans,
            failed = summary.failed_scans,
            files = summary.files,
            "Spider stopped"
        );
        Ok(summary)
    }

    /// Scan a server this runner already holds the lease for, then release it
    async fn scan_leased(&mut self, server: String) -> Result<ScanReport> {
        let _timer = metrics::start_scan_timer();
        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::info!(server = %server, "Scan started");

        let outcome = self.scan(&server, started_at).await;

        // Release before reporting anything else
        self.client.release_server().await?;

        let (status, stored, error) = match outcome {
            Ok(stored) if stored.skipped > 0 => (ScanStatus::Partial, stored, None),
            Ok(stored) => (ScanStatus::Success, stored, None),
            Err((status, e)) => (status, Stored::default(), Some(format!("{e:#}"))),
        };

        let report = ScanReport {
            server,
            status,
            files: stored.files,
            removed: stored.removed,
            skipped: stored.skipped,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            error,
        };

        metrics::record_scan(status.as_str(), report.files);

        match &report.error {
            None if report.status == ScanStatus::Partial => tracing::warn!(
                server = %report.server,
                files = report.files,
                skipped = report.skipped,
                "Scan incomplete, stale records kept"
            ),
            None => tracing::info!(
                server = %report.server,
                files = report.files,
                removed = report.removed,
                duration_ms = report.duration_ms,
                "Scan finished"
            ),
            Some(error) => tracing::warn!(
                server = %report.server,
                status = status.as_str(),
                error = %error,
                "Scan failed"
            ),
        }

        Ok(report)
    }

    async fn scan(
        &self,
        server: &str,
        started_at: DateTime<Utc>,
    ) -> std::result::Result<Stored, (ScanStatus, anyhow::Error)> {
        let output = self
            .crawler
            .crawl(server)
            .await
            .map_err(|e| (ScanStatus::CrawlFailed, e))?;

        let skipped = output.skipped.len() as u64;
        // Unread entries would look deleted
        let prune_before = (self.config.prune_missing && output.is_complete()).then_some(started_at);

        let storage = Arc::clone(&self.storage);
        let server = server.to_string();
        let records = output.records;

        let (files, removed) = tokio::task::spawn_blocking(move || {
            store_records(storage.as_ref(), &server, &records, prune_before)
        })
        .await
        .map_err(|e| (ScanStatus::StorageFailed, anyhow::Error::new(e)))?
        .map_err(|e| (ScanStatus::StorageFailed, e))?;

        Ok(Stored {
            files,
            removed,
            skipped,
        })
    }
}

#[derive(Debug, Default)]
struct Stored {
    files: u64,
    removed: u64,
    skipped: u64,
}

/// Write one scan's records in a single transaction
///
/// Returns `(files written, stale records removed)`.
pub fn store_records(
    storage: &dyn StorageSession,
    server: &str,
    records: &[FileRecord],
    prune_before: Option<DateTime<Utc>>,
) -> anyhow::Result<(u64, u64)> {
    storage.begin()?;

    let written = (|| {
        for record in records {
            storage.upsert_record(record)?;
        }
        let removed = match prune_before {
            Some(before) => storage.remove_stale(server, before)?,
            None => 0,
        };
        anyhow::Ok((records.len() as u64, removed as u64))
    })();

    match written {
        Ok(counts) => {
            storage.commit()?;
            Ok(counts)
        }
        Err(e) => {
            if let Err(rollback_err) = storage.rollback() {
                tracing::error!(server = %server, error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
