//! End-to-end tests for the spider run loop against a live scheduler

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{fast_client, RawPeer, TestScheduler};
use smbspider::spider::{CrawlOutput, Crawler, MountCrawler, ScanStatus, SpiderConfig, SpiderRunner};
use smbspider::storage::{FileRecord, SqliteSession, StorageSession};
use tokio::sync::watch;

const LEASE: Duration = Duration::from_secs(60);

async fn write_file(path: &std::path::Path, contents: &[u8]) {
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, contents).await.unwrap();
}

fn quick_config() -> SpiderConfig {
    SpiderConfig {
        idle_delay: Duration::from_millis(20),
        prune_missing: true,
    }
}

#[tokio::test]
async fn test_scan_indexes_share_and_releases_lease() {
    let mounts = tempfile::tempdir().unwrap();
    write_file(&mounts.path().join("fs01/a.txt"), b"alpha").await;
    write_file(&mounts.path().join("fs01/dir/b.pdf"), b"%PDF-1.5").await;

    let db_dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteSession::connect(db_dir.path().join("index.db")).unwrap());

    let scheduler = TestScheduler::start(&["fs01"], LEASE).await;
    let client = fast_client(scheduler.addr).await;

    let mut runner = SpiderRunner::new(
        client,
        Arc::new(MountCrawler::new(mounts.path())),
        storage.clone(),
        quick_config(),
    );

    let report = runner.run_once().await.unwrap();

    assert_eq!(report.status, ScanStatus::Success);
    assert_eq!(report.server, "fs01");
    assert_eq!(report.files, 2);
    assert!(runner.client().current_lease().is_none());

    assert_eq!(storage.count_records("fs01").unwrap(), 2);
    let pdf = storage.get_record("fs01", "dir/b.pdf").unwrap().unwrap();
    assert_eq!(pdf.mime_type.as_deref(), Some("application/pdf"));

    // Released: the target is immediately available again
    let peer = RawPeer::new(scheduler.addr).await;
    assert_eq!(
        peer.acquire(Duration::from_millis(300)).await.as_deref(),
        Some("fs01")
    );

    scheduler.stop().await;
}

#[tokio::test]
async fn test_failed_crawl_still_releases_lease() {
    let mounts = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteSession::in_memory().unwrap());

    let scheduler = TestScheduler::start(&["unmounted"], LEASE).await;
    let client = fast_client(scheduler.addr).await;

    let mut runner = SpiderRunner::new(
        client,
        Arc::new(MountCrawler::new(mounts.path())),
        storage.clone(),
        quick_config(),
    );

    let report = runner.run_once().await.unwrap();

    assert_eq!(report.status, ScanStatus::CrawlFailed);
    assert!(report.error.is_some());
    assert_eq!(storage.count_records("unmounted").unwrap(), 0);

    let peer = RawPeer::new(scheduler.addr).await;
    assert_eq!(
        peer.acquire(Duration::from_millis(300)).await.as_deref(),
        Some("unmounted")
    );

    scheduler.stop().await;
}

#[tokio::test]
async fn test_rescan_prunes_deleted_files() {
    let mounts = tempfile::tempdir().unwrap();
    let share = mounts.path().join("fs01");
    write_file(&share.join("keep.txt"), b"k").await;
    write_file(&share.join("drop.txt"), b"d").await;

    let storage = Arc::new(SqliteSession::in_memory().unwrap());
    let scheduler = TestScheduler::start(&["fs01"], LEASE).await;

    let mut runner = SpiderRunner::new(
        fast_client(scheduler.addr).await,
        Arc::new(MountCrawler::new(mounts.path())),
        storage.clone(),
        quick_config(),
    );

    assert_eq!(runner.run_once().await.unwrap().files, 2);

    tokio::fs::remove_file(share.join("drop.txt")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = runner.run_once().await.unwrap();
    assert_eq!(report.files, 1);
    assert_eq!(report.removed, 1);
    assert!(storage.get_record("fs01", "drop.txt").unwrap().is_none());

    scheduler.stop().await;
}

/// Sees the whole share once, then loses access to `sub`
struct LockedSubdirCrawler {
    scans: AtomicUsize,
}

#[async_trait]
impl Crawler for LockedSubdirCrawler {
    async fn crawl(&self, server: &str) -> anyhow::Result<CrawlOutput> {
        let top = FileRecord::new(server, "top.txt", 3);
        if self.scans.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(CrawlOutput::complete(vec![
                top,
                FileRecord::new(server, "sub/inner.txt", 5),
            ]));
        }
        Ok(CrawlOutput {
            records: vec![top],
            skipped: vec!["sub".to_string()],
        })
    }
}

#[tokio::test]
async fn test_partial_scan_keeps_unread_records() {
    let storage = Arc::new(SqliteSession::in_memory().unwrap());
    let scheduler = TestScheduler::start(&["fs01"], LEASE).await;

    let mut runner = SpiderRunner::new(
        fast_client(scheduler.addr).await,
        Arc::new(LockedSubdirCrawler {
            scans: AtomicUsize::new(0),
        }),
        storage.clone(),
        quick_config(),
    );

    assert_eq!(runner.run_once().await.unwrap().files, 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = runner.run_once().await.unwrap();
    assert_eq!(report.status, ScanStatus::Partial);
    assert_eq!(report.files, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.removed, 0);
    assert!(storage.get_record("fs01", "sub/inner.txt").unwrap().is_some());
    assert_eq!(storage.count_records("fs01").unwrap(), 2);

    // A partial scan is not a failure and still hands the lease back
    assert!(!report.is_failure());
    assert!(runner.client().current_lease().is_none());

    scheduler.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directory_is_not_pruned() {
    use std::os::unix::fs::PermissionsExt;

    let mounts = tempfile::tempdir().unwrap();
    let share = mounts.path().join("fs01");
    write_file(&share.join("top.txt"), b"t").await;
    write_file(&share.join("sub/inner.txt"), b"i").await;

    let storage = Arc::new(SqliteSession::in_memory().unwrap());
    let scheduler = TestScheduler::start(&["fs01"], LEASE).await;

    let mut runner = SpiderRunner::new(
        fast_client(scheduler.addr).await,
        Arc::new(MountCrawler::new(mounts.path())),
        storage.clone(),
        quick_config(),
    );

    assert_eq!(runner.run_once().await.unwrap().files, 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let sub = share.join("sub");
    std::fs::set_permissions(&sub, std::fs::Permissions::from_mode(0o000)).unwrap();
    let readable_anyway = std::fs::read_dir(&sub).is_ok();

    let report = runner.run_once().await.unwrap();
    std::fs::set_permissions(&sub, std::fs::Permissions::from_mode(0o755)).unwrap();
    scheduler.stop().await;

    // Permission bits do not apply to root
    if readable_anyway {
        return;
    }

    assert_eq!(report.status, ScanStatus::Partial);
    assert_eq!(report.removed, 0);
    assert!(storage.get_record("fs01", "sub/inner.txt").unwrap().is_some());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mounts = tempfile::tempdir().unwrap();
    write_file(&mounts.path().join("fs01/file.txt"), b"x").await;

    let storage = Arc::new(SqliteSession::in_memory().unwrap());
    let scheduler = TestScheduler::start(&["fs01"], LEASE).await;

    let mut runner = SpiderRunner::new(
        fast_client(scheduler.addr).await,
        Arc::new(MountCrawler::new(mounts.path())),
        storage,
        quick_config(),
    );

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(async move { runner.run(rx).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("spider did not stop")
        .unwrap()
        .unwrap();

    assert!(summary.scans >= 1);
    assert_eq!(summary.failed_scans, 0);

    scheduler.stop().await;
}
