//! Stale-feed detection.
//!
//! Any frame proves the feed is alive. When nothing has arrived for
//! `interval`, the connection sends an app-level ping; if nothing arrives
//! within `timeout` of that ping, the session is considered stale.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Liveness tracker owned by one connection session.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// Idle time before a ping is sent.
    interval: Duration,
    /// How long to wait for any frame after a ping.
    timeout: Duration,
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_ping: None,
            last_message: Instant::now(),
            waiting_for_pong: false,
        }
    }

    /// Reset state at the start of a session.
    pub fn reset(&mut self) {
        self.last_ping = None;
        self.last_message = Instant::now();
        self.waiting_for_pong = false;
    }

    /// Period at which the connection loop should call `is_timed_out`
    /// and `should_send_ping`.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(10))
    }

    pub fn record_ping(&mut self) {
        self.last_ping = Some(Instant::now());
        self.waiting_for_pong = true;
    }

    pub fn record_pong(&mut self) {
        self.waiting_for_pong = false;

        if let Some(ping_time) = self.last_ping {
            let rtt_ms = ping_time.elapsed().as_millis() as u64;
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Any frame counts as proof of life.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
        self.waiting_for_pong = false;
    }

    pub fn is_timed_out(&self) -> bool {
        if !self.waiting_for_pong {
            return false;
        }
        self.last_ping
            .map(|ping| ping.elapsed() > self.timeout)
            .unwrap_or(false)
    }

    pub fn should_send_ping(&self) -> bool {
        !self.waiting_for_pong && self.last_message.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_feed_triggers_ping_then_timeout() {
        let mut hb = HeartbeatMonitor::new(1000, 500);
        assert!(!hb.should_send_ping());

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(hb.should_send_ping());

        hb.record_ping();
        assert!(!hb.should_send_ping());
        assert!(!hb.is_timed_out());

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(hb.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_frame_clears_pending_ping() {
        let mut hb = HeartbeatMonitor::new(1000, 500);
        tokio::time::advance(Duration::from_millis(1000)).await;
        hb.record_ping();

        tokio::time::advance(Duration::from_millis(200)).await;
        hb.record_message();

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(!hb.is_timed_out());
        assert!(!hb.should_send_ping());
    }

    #[test]
    fn test_check_period() {
        let hb = HeartbeatMonitor::new(10_000, 5_000);
        assert_eq!(hb.check_period(), Duration::from_secs(5));
    }
}
