//! Single-peer endpoint.
//!
//! A [`Client`] opens a connection to one listener: it queues the init
//! packet, spawns the sender task, and runs the receive loop that
//! - applies the server's acknowledgments to the local Send Queue,
//! - feeds the server's own data through a [`Receiver`] and acknowledges it,
//! - finishes once our terminate packet is acknowledged, or once the server
//!   terminated and the grace period passed in silence.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::{Connection, EndpointError};
use crate::input::ConnectionSink;
use crate::packet::Packet;
use crate::receiver::Receiver;
use crate::sender;
use crate::socket::{Transport, TransportError};
use crate::state::ConnectionState;

/// Application data delivered in order from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub conn_id: usize,
    pub peer: SocketAddr,
    pub data: Vec<u8>,
}

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Our terminate packet was acknowledged.
    Closed,
    /// The server terminated and went quiet.
    PeerTerminated,
}

/// Client endpoint.
pub struct Client<T: Transport> {
    transport: Arc<T>,
    conn: Arc<Connection>,
    receiver: Receiver,
    sender: JoinHandle<()>,
    config: Config,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl<T: Transport> Client<T> {
    /// Start the handshake with `server`.
    ///
    /// Returns the client and the channel on which server data is delivered.
    /// Must be called from within a tokio runtime.
    pub fn connect(
        transport: T,
        server: SocketAddr,
        config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let config = config.normalized();
        let transport = Arc::new(transport);
        let conn = Arc::new(Connection::opening(0, server, &config));
        let sender = tokio::spawn(sender::run(
            conn.clone(),
            transport.clone(),
            config.window_size,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        log::info!(
            "[client] {} → {server}: connecting",
            transport.local_addr()
        );

        let client = Self {
            transport,
            conn,
            receiver: Receiver::new(),
            sender,
            config,
            deliveries: tx,
        };
        (client, rx)
    }

    /// Shared handle used to enqueue lines and close.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Sink for [`crate::input::pump`].
    pub fn sink(&self) -> ConnectionSink {
        ConnectionSink {
            conn: self.conn.clone(),
            config: self.config.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.receiver.state()
    }

    /// Run the receive loop until the session ends.
    pub async fn run(mut self) -> Result<Shutdown, EndpointError> {
        let server = self.conn.peer();
        let result = loop {
            let wait = (self.receiver.state() == ConnectionState::Terminating)
                .then_some(self.config.grace_period);

            match self.transport.recv_from(wait).await {
                Ok((_, from)) if from != server => {
                    log::debug!("[client] datagram from stranger {from} ignored");
                }
                Ok((packet, _)) if packet.flags.ack => {
                    if self.on_ack(&packet).await {
                        log::info!("[client] terminate acknowledged; closing");
                        break Ok(Shutdown::Closed);
                    }
                }
                Ok((packet, _)) => self.on_data(&packet).await,
                Err(TransportError::Timeout) => {
                    log::info!("[client] server quiet after termination; exiting");
                    break Ok(Shutdown::PeerTerminated);
                }
                Err(TransportError::Packet(e)) => {
                    log::debug!("[client] malformed datagram ignored: {e}");
                }
                Err(TransportError::Closed) => break Err(TransportError::Closed.into()),
                Err(e) => log::warn!("[client] receive failed: {e}"),
            }
        };

        self.receiver.close();
        self.conn.release();
        self.sender.abort();
        result
    }

    /// Returns `true` once our terminate has been acknowledged.
    async fn on_ack(&mut self, packet: &Packet) -> bool {
        if packet.flags.init && self.receiver.state() == ConnectionState::AwaitingInit {
            self.receiver.establish();
            log::info!("[client] connection established with {}", self.conn.peer());
        }
        self.conn.on_ack(packet).await.closed
    }

    async fn on_data(&mut self, packet: &Packet) {
        let was_open = self.receiver.state().is_open();
        let verdict = self.receiver.on_packet(packet);

        if let Some(data) = verdict.deliver {
            let delivery = Delivery {
                conn_id: self.conn.id(),
                peer: self.conn.peer(),
                data,
            };
            if self.deliveries.send(delivery).is_err() {
                log::debug!("[client] delivery channel closed; data dropped");
            }
        }
        if let Some(reply) = verdict.reply {
            if let Err(e) = self.transport.send_to(&reply, self.conn.peer()).await {
                log::warn!("[client] ACK {} not sent: {e}", reply.seq);
            }
        }
        if verdict.terminated && was_open {
            log::info!("[client] server terminated the connection");
            // Nothing we still have queued can be delivered now.
            self.conn.release();
        }
    }
}
