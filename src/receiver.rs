//! Go-Back-N receive-side state machine.
//!
//! [`Receiver`] implements the receiver side of Go-Back-N for one peer:
//!
//! - Only **in-order** packets are delivered (`seq == expected`).
//! - Duplicates (`seq < expected`) are not delivered again but are still
//!   acknowledged, so a sender whose ACK was lost converges quickly.
//! - Gaps (`seq > expected`) are discarded without an acknowledgment.
//! - Every acknowledgment is **cumulative**: it carries the next expected
//!   sequence number and echoes the `init`/`terminate` bits of the packet it
//!   answers.
//! - After the peer's terminate, nothing more is delivered; every packet is
//!   only re-acknowledged.
//!
//! Acknowledgment packets from the peer are not handled here; they concern
//! the local send queue (see [`crate::connection::Connection::on_ack`]).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use crate::packet::{Flags, Packet, INIT_SEQ};
use crate::state::ConnectionState;

/// What the caller must do after feeding one packet to the [`Receiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Payload to hand to the application, if the packet was accepted and
    /// carried user data.
    pub deliver: Option<Vec<u8>>,
    /// Cumulative acknowledgment to send back, if any.
    pub reply: Option<Packet>,
    /// The packet carried the peer's terminate flag.
    pub terminated: bool,
}

impl Verdict {
    fn discard() -> Self {
        Self {
            deliver: None,
            reply: None,
            terminated: false,
        }
    }
}

/// Go-Back-N receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Next expected sequence number from the peer.
    expected_seq: u32,
    state: ConnectionState,
}

impl Receiver {
    /// A receiver waiting for the peer's connection-init packet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number this receiver will deliver.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Mark the connection established without seeing an init packet.
    ///
    /// Used by the side that *sent* the init: once its handshake is
    /// acknowledged the peer's first data packet is sequence 1.
    pub fn establish(&mut self) {
        if self.state == ConnectionState::AwaitingInit {
            self.expected_seq = INIT_SEQ + 1;
            self.state = ConnectionState::Established;
        }
    }

    /// Mark the connection closed; later packets are ignored.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Process one non-ACK packet from the peer.
    pub fn on_packet(&mut self, packet: &Packet) -> Verdict {
        debug_assert!(!packet.flags.ack, "acknowledgments go to the send queue");

        match self.state {
            ConnectionState::Closed => return Verdict::discard(),
            ConnectionState::AwaitingInit => {
                if !(packet.flags.init && packet.seq == INIT_SEQ) {
                    log::debug!(
                        "[recv] seq={} before handshake, discarded",
                        packet.seq
                    );
                    return Verdict::discard();
                }
                self.state = ConnectionState::Established;
            }
            ConnectionState::Terminating => {
                // The stream has ended: acknowledge, never deliver or advance.
                log::debug!(
                    "[recv] seq={} after terminate, re-acknowledged only",
                    packet.seq
                );
                return Verdict {
                    deliver: None,
                    reply: Some(Packet::ack(self.expected_seq, packet.flags)),
                    terminated: packet.flags.terminate,
                };
            }
            ConnectionState::Established => {}
        }

        let mut deliver = None;
        if packet.seq == self.expected_seq {
            if !packet.flags.init {
                let data = packet.data();
                if !data.is_empty() {
                    deliver = Some(data.to_vec());
                }
            }
            self.expected_seq += 1;
        } else if packet.seq > self.expected_seq {
            log::debug!(
                "[recv] expected seq={}, got {}: gap, discarded",
                self.expected_seq,
                packet.seq
            );
            return Verdict::discard();
        } else {
            log::debug!(
                "[recv] duplicate seq={} (expected {}), re-acknowledged",
                packet.seq,
                self.expected_seq
            );
        }

        if packet.flags.terminate {
            self.state = ConnectionState::Terminating;
        }

        Verdict {
            deliver,
            reply: Some(Packet::ack(self.expected_seq, packet.flags)),
            terminated: packet.flags.terminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u32, text: &str) -> Packet {
        Packet::new(seq, text.as_bytes(), Flags::DATA)
    }

    fn established() -> Receiver {
        let mut r = Receiver::new();
        r.on_packet(&Packet::init());
        r
    }

    #[test]
    fn initial_state() {
        let r = Receiver::new();
        assert_eq!(r.state(), ConnectionState::AwaitingInit);
        assert_eq!(r.expected_seq(), 0);
    }

    #[test]
    fn init_establishes_and_acks_one() {
        let mut r = Receiver::new();
        let v = r.on_packet(&Packet::init());
        assert_eq!(r.state(), ConnectionState::Established);
        assert_eq!(r.expected_seq(), 1);
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(1, Flags::INIT)));
    }

    #[test]
    fn data_before_init_discarded() {
        let mut r = Receiver::new();
        assert_eq!(r.on_packet(&data(1, "early")), Verdict::discard());
        assert_eq!(r.state(), ConnectionState::AwaitingInit);
    }

    #[test]
    fn duplicate_init_reacknowledged() {
        let mut r = established();
        let v = r.on_packet(&Packet::init());
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(1, Flags::INIT)));
        assert_eq!(r.expected_seq(), 1);
    }

    #[test]
    fn in_order_packet_delivered() {
        let mut r = established();
        let v = r.on_packet(&data(1, "hello\n"));
        assert_eq!(v.deliver.as_deref(), Some(&b"hello\n"[..]));
        assert_eq!(v.reply, Some(Packet::ack(2, Flags::DATA)));
        assert_eq!(r.expected_seq(), 2);
    }

    #[test]
    fn gap_not_delivered_nor_acknowledged() {
        let mut r = established();
        let v = r.on_packet(&data(3, "future"));
        assert_eq!(v, Verdict::discard());
        assert_eq!(r.expected_seq(), 1);
    }

    #[test]
    fn duplicates_and_reordering_deliver_each_once_in_order() {
        let mut r = established();
        let mut delivered = Vec::new();
        for seq in [1, 1, 3, 2, 4, 3, 4, 5] {
            let v = r.on_packet(&data(seq, &seq.to_string()));
            delivered.extend(v.deliver);
        }
        // 3 arrives before 2 and is dropped; its retransmission lands later.
        let expected: Vec<Vec<u8>> = (1..=5).map(|n: u32| n.to_string().into_bytes()).collect();
        assert_eq!(delivered, expected);
    }

    #[test]
    fn sequence_1_1_3_2_4_delivers_1_2_then_needs_3() {
        let mut r = established();
        let mut delivered = Vec::new();
        for seq in [1, 1, 3, 2, 4] {
            delivered.extend(r.on_packet(&data(seq, &seq.to_string())).deliver);
        }
        assert_eq!(delivered, vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(r.expected_seq(), 3);
    }

    #[test]
    fn duplicate_gets_cumulative_ack() {
        let mut r = established();
        r.on_packet(&data(1, "a"));
        r.on_packet(&data(2, "b"));
        let v = r.on_packet(&data(1, "a"));
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(3, Flags::DATA)));
    }

    #[test]
    fn terminate_moves_to_terminating_and_echoes_flag() {
        let mut r = established();
        r.on_packet(&data(1, "bye"));
        let v = r.on_packet(&Packet::new(2, b"", Flags::TERMINATE));
        assert!(v.terminated);
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(3, Flags::TERMINATE)));
        assert_eq!(r.state(), ConnectionState::Terminating);
    }

    #[test]
    fn retransmitted_terminate_still_acknowledged() {
        let mut r = established();
        r.on_packet(&Packet::new(1, b"", Flags::TERMINATE));
        let v = r.on_packet(&Packet::new(1, b"", Flags::TERMINATE));
        assert_eq!(v.reply, Some(Packet::ack(2, Flags::TERMINATE)));
        assert_eq!(r.state(), ConnectionState::Terminating);
    }

    #[test]
    fn terminate_reusing_delivered_seq_is_acknowledged() {
        let mut r = established();
        r.on_packet(&data(1, "a"));
        r.on_packet(&data(2, "b"));
        let v = r.on_packet(&Packet::new(2, b"", Flags::TERMINATE));
        assert!(v.terminated);
        assert_eq!(v.reply, Some(Packet::ack(3, Flags::TERMINATE)));
    }

    #[test]
    fn data_after_terminate_never_delivered() {
        let mut r = established();
        r.on_packet(&data(1, "line1"));
        r.on_packet(&data(2, "line2"));
        // Lines 3 and 4 were flushed; the terminate took number 3.
        r.on_packet(&Packet::new(3, b"", Flags::TERMINATE));
        let v = r.on_packet(&data(4, "line4"));
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(4, Flags::DATA)));
        assert_eq!(r.expected_seq(), 4);
        assert_eq!(r.state(), ConnectionState::Terminating);
    }

    #[test]
    fn stale_data_after_terminate_only_reacknowledged() {
        let mut r = established();
        r.on_packet(&data(1, "a"));
        r.on_packet(&Packet::new(2, b"", Flags::TERMINATE));
        let v = r.on_packet(&data(2, "b"));
        assert_eq!(v.deliver, None);
        assert_eq!(v.reply, Some(Packet::ack(3, Flags::DATA)));
        assert!(!v.terminated);
    }

    #[test]
    fn establish_expects_one() {
        let mut r = Receiver::new();
        r.establish();
        assert_eq!(r.expected_seq(), 1);
        assert!(r.on_packet(&data(1, "x")).deliver.is_some());
    }

    #[test]
    fn closed_receiver_ignores_everything() {
        let mut r = established();
        r.close();
        assert_eq!(r.on_packet(&data(1, "late")), Verdict::discard());
    }
}
