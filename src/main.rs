//! Entry point for `gbn-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! Protocol work lives in the library; `main.rs` owns process setup (logging,
//! argument parsing, socket binding) and the console: stdin lines go to the
//! endpoint, delivered text goes to stdout.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use gbn_over_udp::config::{self, Config};
use gbn_over_udp::input::{pump, LineCollector, LineSink};
use gbn_over_udp::{Client, Delivery, Listener, Shutdown, Socket};

/// Reliable line-oriented text streaming over UDP (Go-Back-N).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Listen for clients on a local port.
    Server {
        /// UDP port to bind on all interfaces.
        port: u16,
    },
    /// Connect to a listening server.
    Client {
        /// Server host name or address.
        host: String,
        /// Server UDP port.
        port: u16,
    },
}

#[derive(Args)]
struct Tuning {
    /// Go-Back-N window size.
    #[arg(long, global = true, default_value_t = config::WINDOW_SIZE)]
    window: usize,

    /// Retransmission interval in milliseconds.
    #[arg(long, global = true, default_value_t = config::RETRANSMIT_INTERVAL.as_millis() as u64)]
    retransmit_ms: u64,

    /// Quiet period after termination, in milliseconds.
    #[arg(long, global = true, default_value_t = config::GRACE_PERIOD.as_millis() as u64)]
    grace_ms: u64,

    /// How long to wait for queued lines on close, in milliseconds.
    #[arg(long, global = true, default_value_t = config::DRAIN_TIMEOUT.as_millis() as u64)]
    drain_ms: u64,

    /// Server: keep running after every client has left.
    #[arg(long, global = true)]
    stay: bool,
}

impl Tuning {
    fn config(&self) -> Config {
        Config {
            window_size: self.window,
            retransmit_interval: Duration::from_millis(self.retransmit_ms),
            grace_period: Duration::from_millis(self.grace_ms),
            drain_timeout: Duration::from_millis(self.drain_ms),
            exit_when_idle: !self.stay,
        }
        .normalized()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.config();

    match cli.mode {
        Mode::Server { port } => run_server(port, config).await?,
        Mode::Client { host, port } => run_client(&host, port, config).await?,
    }

    // The stdin reader may still be parked in a blocking read; do not wait
    // for it during runtime shutdown.
    std::process::exit(0);
}

async fn run_server(port: u16, config: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    let (listener, deliveries) = Listener::new(socket, config);
    spawn_console(listener.handle());
    let printer = tokio::spawn(print_deliveries(deliveries));

    listener.run().await?;
    printer.await?.context("writing to stdout")?;
    log::info!("Server finished");
    Ok(())
}

async fn run_client(host: &str, port: u16, config: Config) -> anyhow::Result<()> {
    let server = Socket::resolve((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?;
    let socket = Socket::bind_for(server)
        .await
        .context("cannot bind client socket")?;

    let (client, deliveries) = Client::connect(socket, server, config);
    spawn_console(client.sink());
    let printer = tokio::spawn(print_deliveries(deliveries));

    let shutdown = client.run().await?;
    printer.await?.context("writing to stdout")?;
    match shutdown {
        Shutdown::Closed => log::info!("Connection closed"),
        Shutdown::PeerTerminated => log::info!("Server closed the connection"),
    }
    Ok(())
}

/// Forward operator lines from stdin to `sink`.
fn spawn_console<S>(sink: S)
where
    S: LineSink + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let lines = LineCollector::new(BufReader::new(tokio::io::stdin()));
        if let Err(e) = pump(lines, &sink).await {
            log::warn!("console input stopped: {e}");
        }
    });
}

/// Write delivered text to stdout, one complete line at a time per peer.
async fn print_deliveries(
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut partial: HashMap<SocketAddr, Vec<u8>> = HashMap::new();

    while let Some(delivery) = deliveries.recv().await {
        let buf = partial.entry(delivery.peer).or_default();
        buf.extend_from_slice(&delivery.data);
        while let Some(end) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=end).collect();
            stdout.write_all(&line).await?;
        }
        stdout.flush().await?;
    }

    for rest in partial.into_values().filter(|rest| !rest.is_empty()) {
        stdout.write_all(&rest).await?;
    }
    stdout.flush().await
}
