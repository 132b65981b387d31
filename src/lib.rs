//! `gbn-over-udp`: reliable, in-order text streaming over UDP using
//! Go-Back-N ARQ.
//!
//! # Architecture
//!
//! ```text
//!  operator input                               delivered text
//!       │                                             ▲
//!  ┌────▼─────┐  append  ┌───────────┐  window   ┌────┴─────┐
//!  │  input   │─────────▶│ SendQueue │──────────▶│  sender  │──▶ datagrams
//!  └──────────┘          └─────▲─────┘           └──────────┘
//!                              │ acknowledge_through
//!  ┌──────────────────────────┴─────────────────────────────┐
//!  │   receive loop: client (one peer) / listener (table)    │◀── datagrams
//!  │   ACK → Connection::on_ack      data → Receiver         │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format and fragmentation
//! - [`queue`]: Send Queue: ordered unacknowledged packets
//! - [`connection`]: per-peer shared state (queue, timer, close flags)
//! - [`sender`]: Go-Back-N transmit task, one per peer
//! - [`receiver`]: cumulative-ACK receive state machine
//! - [`state`]: connection lifecycle states
//! - [`timer`]: retransmission wait: progress or elapsed
//! - [`table`]: Connection Table of a multi-peer listener
//! - [`client`]: single-peer endpoint
//! - [`listener`]: multi-peer endpoint
//! - [`input`]: operator line collection
//! - [`config`]: protocol constants and tunables
//! - [`socket`]: transport trait and its UDP implementation
//! - [`simulator`]: lossy in-memory transport for tests

pub mod client;
pub mod config;
pub mod connection;
pub mod input;
pub mod listener;
pub mod packet;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod table;
pub mod timer;

pub use client::{Client, Delivery, Shutdown};
pub use config::Config;
pub use connection::{Connection, EndpointError};
pub use listener::{Listener, ListenerHandle};
pub use packet::{Flags, Packet};
pub use socket::{Socket, Transport, TransportError};
