//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is exactly one [`Packet`] of
//! [`PACKET_LEN`] bytes.  This module is responsible for:
//! - Defining the fixed on-wire layout (payload fragment, sequence number,
//!   flag bytes).
//! - Serialising a [`Packet`] into a datagram and parsing it back, rejecting
//!   truncated or malformed input.
//! - Splitting application text into [`PAYLOAD_SIZE`]-byte fragments.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  There is no padding.
//!
//! ```text
//!  0                   9                  13     14     15     16
//! +-------------------+------------------+------+------+------+
//! |  Payload (9 B)    | Sequence Number  | ACK  | INIT | TERM |
//! +-------------------+------------------+------+------+------+
//! ```
//!
//! Each flag occupies one byte holding `0` or `1`.

use thiserror::Error;

/// Bytes of application data carried by a single packet.
///
/// Both ends must agree on this value; longer text is fragmented.
pub const PAYLOAD_SIZE: usize = 9;

/// Total size of an encoded packet on the wire.
pub const PACKET_LEN: usize = PAYLOAD_SIZE + 4 + 3;

/// Sequence number carried by the connection-establishment packet.
pub const INIT_SEQ: u32 = 0;

const OFF_SEQ: usize = PAYLOAD_SIZE;
const OFF_ACK: usize = OFF_SEQ + 4;
const OFF_INIT: usize = OFF_ACK + 1;
const OFF_TERMINATE: usize = OFF_INIT + 1;

/// Control bits of a packet.
///
/// The flags are informative rather than exclusive: an acknowledgment can
/// also carry `terminate` when it acknowledges a terminate packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// This packet acknowledges the peer's stream.
    pub ack: bool,
    /// Connection establishment.
    pub init: bool,
    /// The sender of this packet will not send further data.
    pub terminate: bool,
}

impl Flags {
    /// Flags of an ordinary data packet.
    pub const DATA: Flags = Flags {
        ack: false,
        init: false,
        terminate: false,
    };

    /// Flags of the connection-establishment packet.
    pub const INIT: Flags = Flags {
        ack: false,
        init: true,
        terminate: false,
    };

    /// Flags of the termination packet.
    pub const TERMINATE: Flags = Flags {
        ack: false,
        init: false,
        terminate: true,
    };
}

/// A complete protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    /// Zero-padded payload fragment.
    pub payload: [u8; PAYLOAD_SIZE],
    pub flags: Flags,
}

impl Packet {
    /// Build a packet whose payload is `data`, zero padded.
    ///
    /// `data` longer than [`PAYLOAD_SIZE`] is truncated; use [`fragment`] to
    /// split arbitrary text first.
    pub fn new(seq: u32, data: &[u8], flags: Flags) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        let n = data.len().min(PAYLOAD_SIZE);
        payload[..n].copy_from_slice(&data[..n]);
        Self {
            seq,
            payload,
            flags,
        }
    }

    /// The connection-establishment packet (sequence 0, no payload).
    pub fn init() -> Self {
        Self::new(INIT_SEQ, &[], Flags::INIT)
    }

    /// Cumulative acknowledgment carrying the receiver's next expected
    /// sequence number and echoing the `init`/`terminate` bits of the packet
    /// being acknowledged.
    pub fn ack(expected: u32, echo: Flags) -> Self {
        Self::new(
            expected,
            &[],
            Flags {
                ack: true,
                init: echo.init,
                terminate: echo.terminate,
            },
        )
    }

    /// Payload bytes with the zero padding stripped.
    pub fn data(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        &self.payload[..end]
    }

    /// Serialise this packet into its fixed-size wire form.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[..PAYLOAD_SIZE].copy_from_slice(&self.payload);
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK] = u8::from(self.flags.ack);
        buf[OFF_INIT] = u8::from(self.flags.init);
        buf[OFF_TERMINATE] = u8::from(self.flags.terminate);
        buf
    }

    /// Parse a [`Packet`] from a received datagram.
    ///
    /// Returns [`Err`] if `buf` is not exactly [`PACKET_LEN`] bytes long or a
    /// flag byte holds anything other than `0` or `1`.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let buf: &[u8; PACKET_LEN] = buf.try_into().map_err(|_| PacketError::Length {
            expected: PACKET_LEN,
            actual: buf.len(),
        })?;

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&buf[..PAYLOAD_SIZE]);
        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);

        Ok(Packet {
            seq,
            payload,
            flags: Flags {
                ack: flag(buf[OFF_ACK], OFF_ACK)?,
                init: flag(buf[OFF_INIT], OFF_INIT)?,
                terminate: flag(buf[OFF_TERMINATE], OFF_TERMINATE)?,
            },
        })
    }
}

fn flag(byte: u8, offset: usize) -> Result<bool, PacketError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(PacketError::InvalidFlag { offset, value }),
    }
}

/// Split `data` into payload fragments, in order.
///
/// Every fragment except possibly the last is exactly [`PAYLOAD_SIZE`]
/// bytes; empty input yields no fragments.
pub fn fragment(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(PAYLOAD_SIZE)
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram is {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("flag byte at offset {offset} holds {value}, expected 0 or 1")]
    InvalidFlag { offset: usize, value: u8 },
}
