//! Datagram transport capabilities
//!
//! The scheduler and the lease client only need to send and receive whole
//! datagrams. These traits let them run against a real `UdpSocket` or an
//! in-memory transport in tests.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Receive side of a datagram socket
#[async_trait]
pub trait DatagramReader: Send + Sync {
    /// Receive one datagram into `buf`, returning its length and source
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// Send side of a datagram socket
#[async_trait]
pub trait DatagramWriter: Send + Sync {
    /// Send one datagram to `target`
    async fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramReader for tokio::net::UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

#[async_trait]
impl DatagramWriter for tokio::net::UdpSocket {
    async fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(payload, target).await
    }
}

#[async_trait]
impl<T: DatagramReader + ?Sized> DatagramReader for Arc<T> {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_datagram(buf).await
    }
}

#[async_trait]
impl<T: DatagramWriter + ?Sized> DatagramWriter for Arc<T> {
    async fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_datagram(payload, target).await
    }
}
