//! Connection finite-state machine (FSM) types.
//!
//! State transitions are driven by [`crate::receiver::Receiver`]; this
//! module only names the states.

/// All possible states of a peer connection.
///
/// ```text
///  AWAITING_INIT ──init──▶ ESTABLISHED ──terminate──▶ TERMINATING
///                               │                          │
///                               │ ack of our terminate     │ grace period
///                               ▼                          ▼
///                             CLOSED ◀─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handshake seen yet; non-init traffic is discarded.
    #[default]
    AwaitingInit,
    /// Handshake complete; data flows in both directions.
    Established,
    /// The peer sent its terminate packet; it will send no more data but may
    /// still retransmit the terminate until it sees our acknowledgment.
    Terminating,
    /// Our terminate packet was acknowledged, or the grace period ran out.
    Closed,
}

impl ConnectionState {
    /// `true` while the peer may still send new data.
    pub fn is_open(self) -> bool {
        matches!(self, Self::AwaitingInit | Self::Established)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingInit => "AWAITING_INIT",
            Self::Established => "ESTABLISHED",
            Self::Terminating => "TERMINATING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
