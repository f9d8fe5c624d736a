//! Integration tests for the lease scheduler over loopback UDP
//!
//! These tests verify the complete workflow of:
//! - Exclusive leases across several spiders
//! - Reclamation of abandoned leases
//! - Keepalives holding a lease past its timeout
//! - Release ordering and malformed traffic

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{fast_client, RawPeer, TestScheduler};
use tokio_test::assert_ok;

const LONG_LEASE: Duration = Duration::from_secs(60);
const SHORT_WAIT: Duration = Duration::from_millis(300);

// ============================================================================
// Exclusivity
// ============================================================================

#[tokio::test]
async fn test_spiders_receive_distinct_targets() {
    let scheduler = TestScheduler::start(&["alpha", "beta", "gamma"], LONG_LEASE).await;

    let mut clients = Vec::new();
    let mut leased = HashSet::new();
    for _ in 0..3 {
        let mut client = fast_client(scheduler.addr).await;
        let name = client.get_server().await.unwrap();
        assert!(leased.insert(name), "target handed out twice");
        clients.push(client);
    }

    assert_eq!(
        leased,
        HashSet::from(["alpha".to_string(), "beta".to_string(), "gamma".to_string()])
    );

    // Everything is leased: a bare acquire gets no answer
    let peer = RawPeer::new(scheduler.addr).await;
    assert_eq!(peer.acquire(SHORT_WAIT).await, None);

    for client in &mut clients {
        assert_ok!(client.release_server().await);
    }
    scheduler.stop().await;
}

#[tokio::test]
async fn test_waiting_spider_gets_released_target() {
    let scheduler = TestScheduler::start(&["only"], LONG_LEASE).await;

    let mut holder = fast_client(scheduler.addr).await;
    assert_eq!(holder.get_server().await.unwrap(), "only");

    let mut waiter = fast_client(scheduler.addr).await;
    let waiting = tokio::spawn(async move {
        let name = waiter.get_server().await.unwrap();
        (waiter, name)
    });

    tokio::time::sleep(SHORT_WAIT).await;
    assert!(!waiting.is_finished(), "second spider leased a held target");

    assert_ok!(holder.release_server().await);

    let (mut waiter, name) = tokio::time::timeout(Duration::from_secs(3), waiting)
        .await
        .expect("waiting spider never got the released target")
        .unwrap();
    assert_eq!(name, "only");

    assert_ok!(waiter.release_server().await);
    scheduler.stop().await;
}

// ============================================================================
// Lease Timeout
// ============================================================================

#[tokio::test]
async fn test_abandoned_lease_is_reclaimed() {
    let lease_timeout = Duration::from_millis(300);
    let scheduler = TestScheduler::start(&["srv"], lease_timeout).await;

    // A peer that acquires and then goes silent
    let crashed = RawPeer::new(scheduler.addr).await;
    assert_eq!(crashed.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));

    let other = RawPeer::new(scheduler.addr).await;
    assert_eq!(other.acquire(Duration::from_millis(100)).await, None);

    tokio::time::sleep(lease_timeout + Duration::from_millis(100)).await;
    assert_eq!(other.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_keepalive_holds_lease_past_timeout() {
    let lease_timeout = Duration::from_millis(400);
    let scheduler = TestScheduler::start(&["srv"], lease_timeout).await;

    let mut client = fast_client(scheduler.addr).await;
    assert_eq!(client.get_server().await.unwrap(), "srv");

    // Several lease timeouts pass while the heartbeat runs
    tokio::time::sleep(lease_timeout * 3).await;

    let peer = RawPeer::new(scheduler.addr).await;
    assert_eq!(peer.acquire(Duration::from_millis(150)).await, None);

    assert_ok!(client.release_server().await);
    assert_eq!(peer.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_release_is_immediate() {
    let scheduler = TestScheduler::start(&["srv"], LONG_LEASE).await;
    let peer = RawPeer::new(scheduler.addr).await;

    assert_eq!(peer.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));
    peer.send(b"Rsrv").await;

    assert_eq!(peer.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));
    scheduler.stop().await;
}

// ============================================================================
// Wire Robustness
// ============================================================================

#[tokio::test]
async fn test_malformed_datagrams_are_ignored() {
    let scheduler = TestScheduler::start(&["srv"], LONG_LEASE).await;
    let peer = RawPeer::new(scheduler.addr).await;

    peer.send(b"").await;
    peer.send(b"X").await;
    peer.send(b"R").await;
    peer.send(&[b'G'; 300]).await;
    peer.send(b"G\xff\xfe").await;

    assert_eq!(peer.recv(Duration::from_millis(150)).await, None);

    // The scheduler still answers well-formed requests
    assert_eq!(peer.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));
    scheduler.stop().await;
}

#[tokio::test]
async fn test_unknown_keepalive_and_release_are_noops() {
    let scheduler = TestScheduler::start(&["srv"], LONG_LEASE).await;
    let peer = RawPeer::new(scheduler.addr).await;

    peer.send(b"Gghost").await;
    peer.send(b"Rghost").await;
    assert_eq!(peer.recv(Duration::from_millis(150)).await, None);

    assert_eq!(peer.acquire(SHORT_WAIT).await.as_deref(), Some("srv"));
    scheduler.stop().await;
}

#[tokio::test]
async fn test_empty_scheduler_never_answers() {
    let scheduler = TestScheduler::start(&[], LONG_LEASE).await;
    let peer = RawPeer::new(scheduler.addr).await;

    assert_eq!(peer.acquire(SHORT_WAIT).await, None);
    scheduler.stop().await;
}
