//! Retransmission timer for one peer.
//!
//! The sender task sleeps in exactly two ways:
//! - queue empty: until something is appended ([`RetransmitTimer::wait_for_data`]);
//! - window in flight: until an ACK makes progress **or** the retransmission
//!   interval elapses, whichever comes first
//!   ([`RetransmitTimer::wait_for_progress`]).
//!
//! Both signals are backed by [`tokio::sync::Notify`].  A notification that
//! arrives while nobody is waiting is stored as a permit and consumed by the
//! next wait, so a signal raised between "check the queue" and "start
//! waiting" is never lost.

use std::time::Duration;

use tokio::sync::Notify;

/// Why [`RetransmitTimer::wait_for_progress`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// An acknowledgment evicted at least one packet.
    Progress,
    /// The retransmission interval passed without progress.
    Elapsed,
}

/// Per-peer wait-with-timeout primitive.
#[derive(Debug)]
pub struct RetransmitTimer {
    interval: Duration,
    appended: Notify,
    progress: Notify,
}

impl RetransmitTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            appended: Notify::new(),
            progress: Notify::new(),
        }
    }

    /// Fixed retransmission interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signal that a packet was appended to the queue.
    pub fn notify_appended(&self) {
        self.appended.notify_one();
    }

    /// Signal that an acknowledgment evicted packets from the queue.
    pub fn notify_progress(&self) {
        self.progress.notify_one();
    }

    /// Wait, without bound, for [`notify_appended`](Self::notify_appended).
    pub async fn wait_for_data(&self) {
        self.appended.notified().await;
    }

    /// Wait for ACK progress or the retransmission interval.
    pub async fn wait_for_progress(&self) -> Wakeup {
        match tokio::time::timeout(self.interval, self.progress.notified()).await {
            Ok(()) => Wakeup::Progress,
            Err(_elapsed) => Wakeup::Elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_without_progress() {
        let timer = RetransmitTimer::new(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        assert_eq!(timer.wait_for_progress().await, Wakeup::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_before_wait_is_not_lost() {
        let timer = RetransmitTimer::new(Duration::from_millis(100));
        timer.notify_progress();
        let start = tokio::time::Instant::now();
        assert_eq!(timer.wait_for_progress().await, Wakeup::Progress);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_wakes_waiter_early() {
        let timer = std::sync::Arc::new(RetransmitTimer::new(Duration::from_secs(5)));
        let signaller = timer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signaller.notify_progress();
        });
        assert_eq!(timer.wait_for_progress().await, Wakeup::Progress);
    }

    #[tokio::test(start_paused = true)]
    async fn append_signal_is_stored() {
        let timer = RetransmitTimer::new(Duration::from_millis(100));
        timer.notify_appended();
        tokio::time::timeout(Duration::from_millis(1), timer.wait_for_data())
            .await
            .expect("stored permit should release the waiter");
    }

    #[tokio::test(start_paused = true)]
    async fn append_signal_does_not_count_as_progress() {
        let timer = RetransmitTimer::new(Duration::from_millis(100));
        timer.notify_appended();
        assert_eq!(timer.wait_for_progress().await, Wakeup::Elapsed);
    }
}
