//! Connection Table for the multi-peer listener.
//!
//! Maps a peer address to its [`PeerEntry`]: the shared [`Connection`], the
//! receive-side state machine, and the handle of the peer's dedicated sender
//! task.  Entries live in an arena indexed by a small integer id; ids of
//! removed entries are reused by later peers.
//!
//! No ordering between peers is kept or promised.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::connection::Connection;
use crate::receiver::Receiver;
use crate::sender;
use crate::socket::Transport;
use crate::state::ConnectionState;

/// Everything the listener keeps for one remote peer.
#[derive(Debug)]
pub struct PeerEntry {
    pub conn: Arc<Connection>,
    pub receiver: Receiver,
    /// Arrival time of the most recent datagram from this peer.
    pub last_heard: Instant,
    sender: JoinHandle<()>,
}

impl PeerEntry {
    pub fn id(&self) -> usize {
        self.conn.id()
    }

    /// `true` while the peer may still send data and we have not closed.
    pub fn is_active(&self) -> bool {
        self.receiver.state().is_open() && !self.conn.is_closing() && !self.conn.is_closed()
    }

    /// `true` once the peer has sent its terminate packet.
    pub fn is_terminating(&self) -> bool {
        matches!(
            self.receiver.state(),
            ConnectionState::Terminating | ConnectionState::Closed
        )
    }
}

/// Arena of peer connections keyed by address.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Vec<Option<PeerEntry>>,
    by_addr: HashMap<SocketAddr, usize>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Entry for `addr`, if that peer is known.
    pub fn find(&self, addr: SocketAddr) -> Option<&PeerEntry> {
        let id = *self.by_addr.get(&addr)?;
        self.slots.get(id)?.as_ref()
    }

    pub fn find_mut(&mut self, addr: SocketAddr) -> Option<&mut PeerEntry> {
        let id = *self.by_addr.get(&addr)?;
        self.slots.get_mut(id)?.as_mut()
    }

    pub fn get(&self, id: usize) -> Option<&PeerEntry> {
        self.slots.get(id)?.as_ref()
    }

    /// Register `addr` under the lowest free id and spawn its sender task.
    ///
    /// Returns the existing connection unchanged if `addr` is already present.
    pub fn create<T: Transport>(
        &mut self,
        addr: SocketAddr,
        transport: &Arc<T>,
        config: &Config,
    ) -> Arc<Connection> {
        if let Some(entry) = self.find(addr) {
            return entry.conn.clone();
        }

        let id = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len());
        if id == self.slots.len() {
            self.slots.push(None);
        }

        let conn = Arc::new(Connection::new(id, addr, config));
        let sender = tokio::spawn(sender::run(
            conn.clone(),
            transport.clone(),
            config.window_size,
        ));
        self.by_addr.insert(addr, id);
        self.slots[id] = Some(PeerEntry {
            conn: conn.clone(),
            receiver: Receiver::new(),
            last_heard: Instant::now(),
            sender,
        });
        conn
    }

    /// Remove the entry with `id`, stopping its sender task.
    pub fn remove(&mut self, id: usize) -> Option<PeerEntry> {
        let entry = self.slots.get_mut(id)?.take()?;
        self.by_addr.remove(&entry.conn.peer());
        entry.conn.release();
        entry.sender.abort();
        Some(entry)
    }

    /// Iterate over live entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.slots.iter().flatten()
    }

    /// Connections of every active peer.
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.iter()
            .filter(|e| e.is_active())
            .map(|e| e.conn.clone())
            .collect()
    }
}
