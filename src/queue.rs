//! Send Queue: the outbound Go-Back-N buffer for one peer.
//!
//! [`SendQueue`] holds every packet that has been numbered but not yet
//! acknowledged, ordered by sequence number (front = oldest).
//!
//! # Contract
//!
//! - Sequence numbers increase by exactly one from head to tail.
//! - ACKs are **cumulative**: acknowledging `N` evicts `N` and everything
//!   before it.
//! - Acknowledging a sequence number that is not queued is a no-op.
//! - The highest assigned sequence number survives a full drain, so the next
//!   append continues the numbering instead of restarting at 1.
//!
//! The queue itself is not synchronised; [`crate::connection::Connection`]
//! wraps it in a lock shared by the input pump, the sender task and the
//! receive loop.

use std::collections::VecDeque;

use crate::packet::{Flags, Packet, INIT_SEQ};

/// Ordered buffer of not-yet-acknowledged outbound packets.
///
/// ```text
///   head                     tail     last_sent_seq
///    │                        │            │
///  ──┼────────────────────────┼────────────┼──▶ seq space
///    │<── window(limit) ──▶   │            │
/// ```
#[derive(Debug)]
pub struct SendQueue {
    packets: VecDeque<Packet>,
    /// Highest sequence number assigned from this queue.
    last_sent_seq: u32,
    /// Highest sequence number handed to the transport so far.
    last_transmitted: Option<u32>,
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SendQueue {
    /// An empty queue whose first append is numbered 1.
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            last_sent_seq: INIT_SEQ,
            last_transmitted: None,
        }
    }

    /// A queue holding only the connection-establishment packet (sequence 0).
    ///
    /// Used by the side that opens the connection.
    pub fn with_handshake() -> Self {
        let mut queue = Self::new();
        queue.packets.push_back(Packet::init());
        queue
    }

    /// Number of unacknowledged packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Highest sequence number assigned so far.
    pub fn last_sent_seq(&self) -> u32 {
        self.last_sent_seq
    }

    /// Highest sequence number transmitted so far, if any.
    pub fn last_transmitted(&self) -> Option<u32> {
        self.last_transmitted
    }

    /// Sequence number of the oldest unacknowledged packet.
    pub fn head_seq(&self) -> Option<u32> {
        self.packets.front().map(|p| p.seq)
    }

    /// Number and enqueue one payload fragment; returns its sequence number.
    ///
    /// The new number is `tail + 1`, or `last_sent_seq + 1` when the queue
    /// is empty.
    pub fn append(&mut self, fragment: &[u8], flags: Flags) -> u32 {
        let seq = match self.packets.back() {
            Some(tail) => tail.seq + 1,
            None => self.last_sent_seq + 1,
        };
        self.packets.push_back(Packet::new(seq, fragment, flags));
        self.last_sent_seq = seq;
        seq
    }

    /// Process a cumulative acknowledgment of `seq`.
    ///
    /// Evicts the packet numbered `seq` and every packet before it, returning
    /// `Some(seq)`.  Returns `None`, evicting nothing, when no queued packet
    /// carries that number (a duplicate or late ACK).
    pub fn acknowledge_through(&mut self, seq: u32) -> Option<u32> {
        let index = self.packets.iter().position(|p| p.seq == seq)?;
        self.packets.drain(..=index);
        Some(seq)
    }

    /// Cumulative acknowledgment that stops short of a terminate packet.
    ///
    /// After a flush the terminate packet reuses a number the peer may
    /// already have acknowledged as data; only an ACK echoing the terminate
    /// flag may evict it.  Returns the last evicted sequence number, or
    /// `None` when nothing was evicted.
    pub fn acknowledge_data_through(&mut self, seq: u32) -> Option<u32> {
        let index = self.packets.iter().position(|p| p.seq == seq)?;
        let end = match self
            .packets
            .iter()
            .take(index + 1)
            .position(|p| p.flags.terminate)
        {
            Some(0) => return None,
            Some(terminate) => terminate - 1,
            None => index,
        };
        let through = self.packets[end].seq;
        self.packets.drain(..=end);
        Some(through)
    }

    /// Evict every queued packet unconditionally.
    ///
    /// The discarded sequence numbers are released: the next append reuses
    /// the number of the oldest discarded packet.  Returns how many packets
    /// were discarded.
    pub fn flush(&mut self) -> usize {
        let discarded = self.packets.len();
        if let Some(head) = self.packets.front() {
            self.last_sent_seq = head.seq.saturating_sub(1);
            if head.seq == INIT_SEQ {
                // An unanswered handshake cannot be revoked.
                self.packets.truncate(1);
                return discarded - 1;
            }
        }
        self.packets.clear();
        discarded
    }

    /// Snapshot of at most `limit` packets from the head, oldest first.
    pub fn window(&self, limit: usize) -> Vec<Packet> {
        self.packets.iter().take(limit).cloned().collect()
    }

    /// Record that the packets up to `seq` have been handed to the transport.
    pub fn record_transmitted(&mut self, seq: u32) {
        self.last_transmitted = Some(self.last_transmitted.map_or(seq, |prev| prev.max(seq)));
    }

    /// Iterate over queued packets from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }
}
