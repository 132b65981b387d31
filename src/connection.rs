//! Per-peer connection handle.
//!
//! A [`Connection`] is the part of a peer's session that several tasks touch
//! at once:
//! - the input pump appends lines ([`Connection::enqueue`]),
//! - the peer's sender task transmits the window ([`crate::sender::run`]),
//! - the receive loop applies acknowledgments ([`Connection::on_ack`]).
//!
//! All three serialise on the Send Queue lock.  The receive-side state
//! ([`crate::receiver::Receiver`]) is *not* here: only the receive loop
//! touches it, so it lives next to the loop that owns it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::config::Config;
use crate::packet::{fragment, Flags, Packet};
use crate::queue::SendQueue;
use crate::socket::TransportError;
use crate::timer::RetransmitTimer;

/// Errors surfaced by client and listener endpoints.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Data was offered after the connection started terminating.
    #[error("connection {0} is closing")]
    Closing(usize),
    #[error("input error: {0}")]
    Input(#[from] io::Error),
}

/// Result of applying one acknowledgment to the Send Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    /// Sequence number evicted through, or `None` for a stale ACK.
    pub evicted: Option<u32>,
    /// The ACK confirmed our terminate packet; the connection is closed.
    pub closed: bool,
}

/// Shared state of one peer connection.
#[derive(Debug)]
pub struct Connection {
    id: usize,
    peer: SocketAddr,
    queue: Mutex<SendQueue>,
    timer: RetransmitTimer,
    /// Signalled whenever an ACK leaves the queue empty.
    drained: Notify,
    /// Our terminate packet has been enqueued.
    closing: AtomicBool,
    /// No further transmission will happen.
    closed: AtomicBool,
}

impl Connection {
    /// A connection whose first data packet is sequence 1.
    pub fn new(id: usize, peer: SocketAddr, config: &Config) -> Self {
        Self::with_queue(id, peer, SendQueue::new(), config)
    }

    /// A connection that opens with the handshake packet (sequence 0).
    pub fn opening(id: usize, peer: SocketAddr, config: &Config) -> Self {
        let conn = Self::with_queue(id, peer, SendQueue::with_handshake(), config);
        conn.timer.notify_appended();
        conn
    }

    fn with_queue(id: usize, peer: SocketAddr, queue: SendQueue, config: &Config) -> Self {
        Self {
            id,
            peer,
            queue: Mutex::new(queue),
            timer: RetransmitTimer::new(config.retransmit_interval),
            drained: Notify::new(),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn queue(&self) -> &Mutex<SendQueue> {
        &self.queue
    }

    pub(crate) fn timer(&self) -> &RetransmitTimer {
        &self.timer
    }

    /// `true` once our terminate packet has been enqueued.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// `true` once the connection will transmit nothing further.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of packets awaiting acknowledgment.
    pub async fn unacknowledged(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Fragment `data` and append every fragment, in order, as one atomic
    /// step.  Returns the sequence number of the last fragment.
    ///
    /// Empty `data` enqueues nothing and returns `Ok(None)`.
    pub async fn enqueue(&self, data: &[u8]) -> Result<Option<u32>, EndpointError> {
        if self.is_closing() || self.is_closed() {
            return Err(EndpointError::Closing(self.id));
        }
        let mut queue = self.queue.lock().await;
        let mut last = None;
        for chunk in fragment(data) {
            last = Some(queue.append(chunk, Flags::DATA));
        }
        drop(queue);

        if let Some(seq) = last {
            log::debug!("[conn {}] queued {} byte(s) through seq={seq}", self.id, data.len());
            self.timer.notify_appended();
        }
        Ok(last)
    }

    /// Apply an acknowledgment packet from the peer.
    ///
    /// The ACK carries the peer's next expected sequence number, so it
    /// confirms everything through `ack.seq - 1`.  Only an ACK echoing the
    /// terminate flag evicts our terminate packet.  Eviction wakes the
    /// sender; a stale ACK is a no-op and wakes nobody.
    pub async fn on_ack(&self, ack: &Packet) -> AckOutcome {
        debug_assert!(ack.flags.ack);
        let mut queue = self.queue.lock().await;
        let evicted = ack.seq.checked_sub(1).and_then(|through| {
            if ack.flags.terminate {
                queue.acknowledge_through(through)
            } else {
                queue.acknowledge_data_through(through)
            }
        });
        let empty = queue.is_empty();
        drop(queue);

        match evicted {
            Some(through) => {
                log::debug!("[conn {}] ← ACK {} (through seq={through})", self.id, ack.seq);
                self.timer.notify_progress();
                if empty {
                    self.drained.notify_waiters();
                }
            }
            None => log::debug!("[conn {}] ← stale ACK {} ignored", self.id, ack.seq),
        }

        let closed = ack.flags.terminate && self.is_closing();
        if closed {
            log::debug!("[conn {}] terminate acknowledged", self.id);
            self.release();
        }
        AckOutcome { evicted, closed }
    }

    /// Replace everything still queued with a single terminate packet.
    ///
    /// Unacknowledged lines are discarded.  The terminate packet takes the
    /// oldest discarded sequence number, so the peer never sees it as a gap.
    /// Calling this twice has no further effect.
    pub async fn terminate(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut queue = self.queue.lock().await;
        let discarded = queue.flush();
        let seq = queue.append(&[], Flags::TERMINATE);
        drop(queue);

        if discarded > 0 {
            log::info!(
                "[conn {}] discarding {discarded} unacknowledged packet(s) on close",
                self.id
            );
        }
        log::debug!("[conn {}] → TERMINATE seq={seq} queued", self.id);
        self.timer.notify_appended();
    }

    /// Graceful close: wait up to `config.drain_timeout` for queued data to
    /// be acknowledged, then [`terminate`](Self::terminate).
    pub async fn close(&self, config: &Config) {
        let drained = tokio::time::timeout(config.drain_timeout, self.wait_drained()).await;
        if drained.is_err() {
            log::warn!(
                "[conn {}] queue not drained after {:?}",
                self.id,
                config.drain_timeout
            );
        }
        self.terminate().await;
    }

    /// Resolve once the Send Queue is empty.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.queue.lock().await.is_empty() || self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Stop all transmission on this connection and wake anyone waiting.
    pub fn release(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.timer.notify_appended();
            self.timer.notify_progress();
            self.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn seqs(queue: &SendQueue) -> Vec<u32> {
        queue.iter().map(|p| p.seq).collect()
    }

    #[tokio::test]
    async fn enqueue_fragments_long_text() {
        let conn = Connection::new(0, peer(), &Config::default());
        let last = conn.enqueue(b"a line longer than nine bytes\n").await.unwrap();
        assert_eq!(last, Some(4));
        let queue = conn.queue().lock().await;
        let text: Vec<u8> = queue.iter().flat_map(|p| p.data().to_vec()).collect();
        assert_eq!(text, b"a line longer than nine bytes\n");
    }

    #[tokio::test]
    async fn enqueue_empty_is_noop() {
        let conn = Connection::new(0, peer(), &Config::default());
        assert_eq!(conn.enqueue(b"").await.unwrap(), None);
        assert_eq!(conn.unacknowledged().await, 0);
    }

    #[tokio::test]
    async fn ack_evicts_through_previous_seq() {
        let conn = Connection::new(0, peer(), &Config::default());
        for line in ["one\n", "two\n", "three\n"] {
            conn.enqueue(line.as_bytes()).await.unwrap();
        }
        let outcome = conn.on_ack(&Packet::ack(3, Flags::DATA)).await;
        assert_eq!(outcome.evicted, Some(2));
        assert!(!outcome.closed);
        assert_eq!(seqs(&*conn.queue().lock().await), vec![3]);
    }

    #[tokio::test]
    async fn stale_ack_is_noop() {
        let conn = Connection::new(0, peer(), &Config::default());
        conn.enqueue(b"x").await.unwrap();
        conn.on_ack(&Packet::ack(2, Flags::DATA)).await;
        let outcome = conn.on_ack(&Packet::ack(2, Flags::DATA)).await;
        assert_eq!(outcome.evicted, None);
        let zero = conn.on_ack(&Packet::ack(0, Flags::DATA)).await;
        assert_eq!(zero.evicted, None);
    }

    #[tokio::test]
    async fn handshake_ack_evicts_init() {
        let conn = Connection::opening(0, peer(), &Config::default());
        let outcome = conn.on_ack(&Packet::ack(1, Flags::INIT)).await;
        assert_eq!(outcome.evicted, Some(0));
        assert_eq!(conn.unacknowledged().await, 0);
    }

    #[tokio::test]
    async fn terminate_replaces_queue() {
        let conn = Connection::new(0, peer(), &Config::default());
        conn.enqueue(b"one\n").await.unwrap();
        conn.enqueue(b"two\n").await.unwrap();
        conn.terminate().await;

        let queue = conn.queue().lock().await;
        let packets = queue.window(16);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].seq, 1);
        assert!(packets[0].flags.terminate);
        assert!(packets[0].data().is_empty());
    }

    #[tokio::test]
    async fn enqueue_after_terminate_rejected() {
        let conn = Connection::new(3, peer(), &Config::default());
        conn.terminate().await;
        assert!(matches!(
            conn.enqueue(b"late").await,
            Err(EndpointError::Closing(3))
        ));
    }

    #[tokio::test]
    async fn terminate_ack_closes_even_without_eviction() {
        let conn = Connection::new(0, peer(), &Config::default());
        conn.enqueue(b"a").await.unwrap();
        conn.enqueue(b"b").await.unwrap();
        conn.terminate().await;
        // The peer had already delivered both lines; its ACK names seq 3.
        let outcome = conn.on_ack(&Packet::ack(3, Flags::TERMINATE)).await;
        assert_eq!(outcome.evicted, None);
        assert!(outcome.closed);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn terminate_ack_without_our_terminate_is_ignored() {
        let conn = Connection::new(0, peer(), &Config::default());
        let outcome = conn.on_ack(&Packet::ack(1, Flags::TERMINATE)).await;
        assert!(!outcome.closed);
        assert!(!conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn late_data_ack_keeps_terminate_in_flight() {
        use crate::simulator::SimNetwork;
        use crate::socket::Transport;
        use std::sync::Arc;
        use std::time::Duration;

        let config = Config::default();
        let net = SimNetwork::perfect();
        let local = Arc::new(net.endpoint());
        let remote = net.endpoint();
        let conn = Arc::new(Connection::new(0, remote.local_addr(), &config));
        conn.enqueue(b"a").await.unwrap();
        conn.enqueue(b"b").await.unwrap();
        conn.on_ack(&Packet::ack(2, Flags::DATA)).await;
        conn.terminate().await;
        let sender = tokio::spawn(crate::sender::run(conn.clone(), local, 16));

        // The peer delivered "b" before the flush; its ACK arrives late.
        let outcome = conn.on_ack(&Packet::ack(3, Flags::DATA)).await;
        assert_eq!(outcome.evicted, None);
        assert!(!outcome.closed);
        assert_eq!(conn.unacknowledged().await, 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let terminates = net
            .transmissions()
            .iter()
            .filter(|t| t.packet.flags.terminate)
            .count();
        assert!(terminates >= 3, "terminate sent {terminates} time(s)");

        let outcome = conn.on_ack(&Packet::ack(3, Flags::TERMINATE)).await;
        assert!(outcome.closed);
        tokio::time::timeout(config.retransmit_interval, sender)
            .await
            .expect("sender stops once terminate is acknowledged")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_drained_returns_after_final_ack() {
        let conn = std::sync::Arc::new(Connection::new(0, peer(), &Config::default()));
        conn.enqueue(b"a").await.unwrap();
        let acker = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            acker.on_ack(&Packet::ack(2, Flags::DATA)).await;
        });
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.wait_drained())
            .await
            .expect("drained");
    }

    #[tokio::test(start_paused = true)]
    async fn close_gives_up_after_drain_timeout() {
        let config = Config::default();
        let conn = Connection::new(0, peer(), &config);
        conn.enqueue(b"never acked").await.unwrap();
        conn.close(&config).await;
        assert!(conn.is_closing());
        assert_eq!(conn.unacknowledged().await, 1);
    }
}
