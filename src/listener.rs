//! Multi-peer endpoint.
//!
//! A [`Listener`] owns one transport and a [`ConnectionTable`].  Its receive
//! loop is the only task that creates or removes table entries:
//!
//! ```text
//!   recv ──▶ unknown addr? ──init──▶ create entry (+ sender task)
//!     │            └──other──▶ discard
//!     ├─ ACK ──▶ entry.conn.on_ack ──terminate acked──▶ remove entry
//!     └─ data ─▶ entry.receiver ──▶ deliver + cumulative ACK
//!                       └─ terminate ─▶ stop sender, reap after grace period
//! ```
//!
//! Once every peer has gone and no datagram arrived for the grace period,
//! [`Listener::run`] returns (unless `exit_when_idle` is off).
//!
//! [`ListenerHandle`] is the server-side input path: it broadcasts operator
//! lines to every active peer and can terminate them all.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::Delivery;
use crate::config::Config;
use crate::connection::{Connection, EndpointError};
use crate::input::LineSink;
use crate::packet::Packet;
use crate::receiver::Verdict;
use crate::socket::{Transport, TransportError};
use crate::table::ConnectionTable;

type SharedTable = Arc<Mutex<ConnectionTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, ConnectionTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the receive loop must do after consulting the table.
enum Action {
    Discard,
    Ack(Arc<Connection>),
    Data(Arc<Connection>, Verdict, bool),
}

/// Listener endpoint.
pub struct Listener<T: Transport> {
    transport: Arc<T>,
    table: SharedTable,
    config: Config,
    deliveries: mpsc::UnboundedSender<Delivery>,
    /// Peers that finished since startup.
    finished: usize,
}

impl<T: Transport> Listener<T> {
    /// Wrap `transport`; returns the listener and its delivery channel.
    pub fn new(transport: T, config: Config) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self {
            transport: Arc::new(transport),
            table: Arc::new(Mutex::new(ConnectionTable::new())),
            config: config.normalized(),
            deliveries: tx,
            finished: 0,
        };
        (listener, rx)
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.transport.local_addr()
    }

    /// Handle for server-side input.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            table: self.table.clone(),
            config: self.config.clone(),
        }
    }

    /// Run the receive loop.
    pub async fn run(mut self) -> Result<(), EndpointError> {
        log::info!("[listener] listening on {}", self.local_addr());
        loop {
            let wait = self.lingering().then_some(self.config.grace_period);
            match self.transport.recv_from(wait).await {
                Ok((packet, from)) => self.on_packet(packet, from).await,
                Err(TransportError::Timeout) => {
                    self.reap();
                    if self.config.exit_when_idle && self.idle() {
                        log::info!("[listener] all peers finished; exiting");
                        return Ok(());
                    }
                }
                Err(TransportError::Packet(e)) => {
                    log::debug!("[listener] malformed datagram ignored: {e}");
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(e) => log::warn!("[listener] receive failed: {e}"),
            }
            self.reap();
        }
    }

    /// Every peer seen so far has finished.
    fn idle(&self) -> bool {
        self.finished > 0 && lock(&self.table).is_empty()
    }

    /// Whether the loop should wake up after the grace period.
    fn lingering(&self) -> bool {
        let table = lock(&self.table);
        (self.finished > 0 && table.is_empty()) || table.iter().any(|e| e.is_terminating())
    }

    async fn on_packet(&mut self, packet: Packet, from: std::net::SocketAddr) {
        let action = {
            let mut table = lock(&self.table);
            if table.find(from).is_none() {
                if packet.flags.init && !packet.flags.ack {
                    let conn = table.create(from, &self.transport, &self.config);
                    log::info!("[listener] client {} connected from {from}", conn.id());
                } else {
                    log::debug!("[listener] seq={} from unknown {from} discarded", packet.seq);
                }
            }

            match table.find_mut(from) {
                None => Action::Discard,
                Some(entry) => {
                    entry.last_heard = Instant::now();
                    if packet.flags.ack {
                        Action::Ack(entry.conn.clone())
                    } else {
                        let was_open = entry.receiver.state().is_open();
                        let verdict = entry.receiver.on_packet(&packet);
                        Action::Data(entry.conn.clone(), verdict, was_open)
                    }
                }
            }
        };

        match action {
            Action::Discard => {}
            Action::Ack(conn) => {
                if conn.on_ack(&packet).await.closed {
                    log::info!("[listener] client {} acknowledged termination", conn.id());
                    self.finish(conn.id());
                }
            }
            Action::Data(conn, verdict, was_open) => {
                if let Some(data) = verdict.deliver {
                    let delivery = Delivery {
                        conn_id: conn.id(),
                        peer: from,
                        data,
                    };
                    if self.deliveries.send(delivery).is_err() {
                        log::debug!("[listener] delivery channel closed; data from {from} dropped");
                    }
                }
                if let Some(reply) = verdict.reply {
                    if let Err(e) = self.transport.send_to(&reply, from).await {
                        log::warn!("[listener] ACK {} to {from} not sent: {e}", reply.seq);
                    }
                }
                if verdict.terminated && was_open {
                    log::info!("[listener] client {} terminated", conn.id());
                    conn.release();
                }
            }
        }
    }

    fn finish(&mut self, id: usize) {
        if lock(&self.table).remove(id).is_some() {
            self.finished += 1;
        }
    }

    /// Drop terminated peers that stayed quiet for the grace period.
    fn reap(&mut self) {
        let grace = self.config.grace_period;
        let expired: Vec<usize> = lock(&self.table)
            .iter()
            .filter(|e| e.is_terminating() && e.last_heard.elapsed() >= grace)
            .map(|e| e.id())
            .collect();
        for id in expired {
            log::debug!("[listener] client {id} released after grace period");
            self.finish(id);
        }
    }
}

/// Server-side input: send to every active peer.
#[derive(Clone)]
pub struct ListenerHandle {
    table: SharedTable,
    config: Config,
}

impl ListenerHandle {
    fn active(&self) -> Vec<Arc<Connection>> {
        lock(&self.table).active_connections()
    }

    /// Number of peers that can still receive data.
    pub fn active_peers(&self) -> usize {
        self.active().len()
    }

    /// Queue `data` for every active peer; returns how many received it.
    pub async fn broadcast(&self, data: &[u8]) -> usize {
        let mut sent = 0;
        for conn in self.active() {
            if conn.enqueue(data).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Gracefully close every active peer, concurrently.
    pub async fn close_all(&self) {
        let closing: Vec<_> = self
            .active()
            .into_iter()
            .map(|conn| {
                let config = self.config.clone();
                tokio::spawn(async move { conn.close(&config).await })
            })
            .collect();
        for task in closing {
            let _ = task.await;
        }
    }
}

impl LineSink for ListenerHandle {
    async fn send_line(&self, line: &str) -> Result<(), EndpointError> {
        let n = self.broadcast(line.as_bytes()).await;
        log::debug!("[listener] line queued for {n} peer(s)");
        Ok(())
    }

    async fn finish(&self) {
        self.close_all().await;
    }
}
