//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`SimNetwork`] hands out [`SimSocket`] endpoints that implement
//! [`Transport`] and route packets through a configurable fault model:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a packet with probability `loss_rate`.      |
//! | Reordering       | Delay a packet by `reorder_delay`, letting later |
//! |                  | packets overtake it.                             |
//! | Duplication      | Deliver a packet twice.                          |
//! | Drop rules       | Drop every packet a caller-supplied predicate    |
//! |                  | matches, for scripted scenarios.                 |
//!
//! Randomness comes from a seeded [`StdRng`], so a failing scenario replays
//! identically.  Every send attempt is recorded and available through
//! [`SimNetwork::transmissions`].

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::packet::{Packet, PACKET_LEN};
use crate::socket::{Transport, TransportError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet is reordered.
    pub reorder_rate: f64,
    /// Fixed delay applied to reordered packets.
    pub reorder_delay: Duration,
    /// Probability that a packet is duplicated.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        // No faults by default.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(30),
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// What happened to one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Delivered,
    Dropped,
    Duplicated,
    Delayed,
}

/// One recorded send attempt.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub packet: Packet,
    pub fate: Fate,
}

type Inbox = mpsc::UnboundedSender<(Packet, SocketAddr)>;
type DropRule = Box<dyn FnMut(SocketAddr, SocketAddr, &Packet) -> bool + Send>;

struct Hub {
    config: SimConfig,
    rng: StdRng,
    routes: HashMap<SocketAddr, Inbox>,
    rules: Vec<DropRule>,
    log: Vec<Transmission>,
    next_port: u16,
}

/// A simulated network shared by any number of endpoints.
#[derive(Clone)]
pub struct SimNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl SimNetwork {
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            hub: Arc::new(Mutex::new(Hub {
                config,
                rng,
                routes: HashMap::new(),
                rules: Vec::new(),
                log: Vec::new(),
                next_port: 10_000,
            })),
        }
    }

    /// A fault-free network.
    pub fn perfect() -> Self {
        Self::new(SimConfig::default())
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new endpoint at a fresh loopback address.
    pub fn endpoint(&self) -> SimSocket {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.hub();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, hub.next_port));
        hub.next_port += 1;
        hub.routes.insert(addr, tx);
        SimSocket {
            addr,
            net: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Replace the fault model; the RNG keeps its state.
    pub fn set_config(&self, config: SimConfig) {
        self.hub().config = config;
    }

    /// Drop every packet for which `rule(from, to, packet)` returns `true`.
    pub fn drop_when<F>(&self, rule: F)
    where
        F: FnMut(SocketAddr, SocketAddr, &Packet) -> bool + Send + 'static,
    {
        self.hub().rules.push(Box::new(rule));
    }

    /// Remove every drop rule.
    pub fn clear_rules(&self) {
        self.hub().rules.clear();
    }

    /// Every send attempt so far, in order.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.hub().log.clone()
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, packet: &Packet) {
        let mut guard = self.hub();
        let hub = &mut *guard;

        let scripted = hub.rules.iter_mut().any(|rule| rule(from, to, packet));
        let lost = hub.rng.gen_bool(hub.config.loss_rate.clamp(0.0, 1.0));
        let dest = hub.routes.get(&to).cloned();

        let fate = match dest {
            // Like UDP: a datagram to nobody vanishes.
            None => Fate::Dropped,
            Some(_) if scripted || lost => Fate::Dropped,
            Some(_) if hub.rng.gen_bool(hub.config.duplicate_rate.clamp(0.0, 1.0)) => {
                Fate::Duplicated
            }
            Some(_) if hub.rng.gen_bool(hub.config.reorder_rate.clamp(0.0, 1.0)) => Fate::Delayed,
            Some(_) => Fate::Delivered,
        };

        hub.log.push(Transmission {
            from,
            to,
            packet: packet.clone(),
            fate,
        });

        let Some(dest) = dest else { return };
        match fate {
            Fate::Dropped => {}
            Fate::Delivered => {
                let _ = dest.send((packet.clone(), from));
            }
            Fate::Duplicated => {
                let _ = dest.send((packet.clone(), from));
                let _ = dest.send((packet.clone(), from));
            }
            Fate::Delayed => {
                let delay = hub.config.reorder_delay;
                let packet = packet.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = dest.send((packet, from));
                });
            }
        }
    }

    fn detach(&self, addr: SocketAddr) {
        self.hub().routes.remove(&addr);
    }
}

/// One endpoint on a [`SimNetwork`].
pub struct SimSocket {
    addr: SocketAddr,
    net: SimNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Packet, SocketAddr)>>,
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.net.detach(self.addr);
    }
}

impl Transport for SimSocket {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send_to(&self, packet: &Packet, peer: SocketAddr) -> Result<usize, TransportError> {
        self.net.route(self.addr, peer, packet);
        Ok(PACKET_LEN)
    }

    async fn recv_from(
        &self,
        wait: Option<Duration>,
    ) -> Result<(Packet, SocketAddr), TransportError> {
        let mut inbox = self.inbox.lock().await;
        let next = match wait {
            None => inbox.recv().await,
            Some(wait) => tokio::time::timeout(wait, inbox.recv())
                .await
                .map_err(|_| TransportError::Timeout)?,
        };
        next.ok_or(TransportError::Closed)
    }
}
