//! Go-Back-N send-side state machine.
//!
//! One [`run`] task exists per peer.  It loops until the connection is
//! released:
//!
//! ```text
//!            ┌──────────── queue empty ────────────┐
//!            ▼                                     │
//!   wait for append ──▶ transmit window (≤ N) ──▶ wait for ACK progress
//!                              ▲                   │   or interval
//!                              └───────────────────┘
//! ```
//!
//! - The window is transmitted while holding the queue lock, so an ACK can
//!   never shrink the queue mid-iteration.
//! - On timeout the *same* window goes out again (go back N); there is no
//!   selective retransmission.
//! - On progress the new window goes out immediately.
//! - A failed send is logged; the retransmission path recovers it.

use std::sync::Arc;

use crate::connection::Connection;
use crate::socket::Transport;
use crate::timer::Wakeup;

/// Drive the sender for `conn` until [`Connection::release`] is called.
pub async fn run<T: Transport>(conn: Arc<Connection>, transport: Arc<T>, window_size: usize) {
    let id = conn.id();
    let peer = conn.peer();
    log::debug!("[sender {id}] started for {peer}");

    while !conn.is_closed() {
        let mut queue = conn.queue().lock().await;
        if queue.is_empty() {
            drop(queue);
            conn.timer().wait_for_data().await;
            continue;
        }

        let window = queue.window(window_size);
        for packet in &window {
            match transport.send_to(packet, peer).await {
                Ok(_) => log::trace!("[sender {id}] → seq={} to {peer}", packet.seq),
                Err(e) => log::warn!("[sender {id}] send of seq={} failed: {e}", packet.seq),
            }
        }
        if let Some(last) = window.last() {
            queue.record_transmitted(last.seq);
        }
        let head = queue.head_seq().unwrap_or_default();
        let sent_through = queue.last_transmitted().unwrap_or_default();
        drop(queue);

        match conn.timer().wait_for_progress().await {
            Wakeup::Progress => {}
            Wakeup::Elapsed => {
                if !conn.is_closed() {
                    log::debug!(
                        "[sender {id}] timeout: going back from seq={sent_through} to seq={head}"
                    );
                }
            }
        }
    }

    log::debug!("[sender {id}] stopped");
}
