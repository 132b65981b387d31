//! Datagram transport abstraction.
//!
//! The protocol core never touches a socket directly; it talks to a
//! [`Transport`], which sends one [`Packet`] per datagram and receives the
//! next packet together with its sender's address.  [`Socket`] implements it
//! over `tokio::net::UdpSocket`; [`crate::simulator`] provides a lossy
//! in-memory implementation for tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};

use crate::packet::{Packet, PacketError, PACKET_LEN};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
    /// The received datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
    /// No datagram arrived before the receive deadline.
    #[error("receive timed out")]
    Timeout,
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The send/receive collaborator consumed by the protocol core.
///
/// All methods take `&self` so one transport can be shared by the receive
/// loop and every per-peer sender task.
pub trait Transport: Send + Sync + 'static {
    /// Address this endpoint is reachable at.
    fn local_addr(&self) -> SocketAddr;

    /// Encode `packet` and send it as a single datagram to `peer`.
    ///
    /// Returns the number of bytes handed to the network.
    fn send_to(
        &self,
        packet: &Packet,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Receive the next packet.
    ///
    /// Blocks indefinitely when `wait` is `None`; otherwise returns
    /// [`TransportError::Timeout`] once `wait` elapses.
    fn recv_from(
        &self,
        wait: Option<Duration>,
    ) -> impl Future<Output = Result<(Packet, SocketAddr), TransportError>> + Send;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A packet-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Resolve `host` to its first socket address.
    pub async fn resolve(host: impl ToSocketAddrs) -> Result<SocketAddr, TransportError> {
        lookup_host(host).await?.next().ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "address resolved to nothing",
            ))
        })
    }

    /// Bind an ephemeral socket of the same address family as `peer`.
    pub async fn bind_for(peer: SocketAddr) -> Result<Self, TransportError> {
        let any: SocketAddr = if peer.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(any).await
    }

    async fn recv_packet(&self) -> Result<(Packet, SocketAddr), TransportError> {
        // One spare byte so an oversized datagram shows up as a length error.
        let mut buf = [0u8; PACKET_LEN + 1];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, packet: &Packet, peer: SocketAddr) -> Result<usize, TransportError> {
        Ok(self.inner.send_to(&packet.encode(), peer).await?)
    }

    async fn recv_from(
        &self,
        wait: Option<Duration>,
    ) -> Result<(Packet, SocketAddr), TransportError> {
        match wait {
            None => self.recv_packet().await,
            Some(wait) => tokio::time::timeout(wait, self.recv_packet())
                .await
                .map_err(|_| TransportError::Timeout)?,
        }
    }
}
