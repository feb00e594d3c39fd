//! Session metrics counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for one session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Sessions started via `run_session`
    pub sessions_started: AtomicU64,
    /// Message blocks sent
    pub blocks_sent: AtomicU64,
    /// Message blocks received and dispatched
    pub blocks_received: AtomicU64,
    /// Channels opened successfully (either role)
    pub channels_opened: AtomicU64,
    /// Channel creation requests that timed out or were refused
    pub channel_requests_failed: AtomicU64,
    /// Fatal session errors
    pub fatal_errors: AtomicU64,
}

impl SessionMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocks_sent(&self) {
        self.blocks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocks_received(&self) {
        self.blocks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_channels_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_channel_requests_failed(&self) {
        self.channel_requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fatal_errors(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            blocks_sent: self.blocks_sent.load(Ordering::Relaxed),
            blocks_received: self.blocks_received.load(Ordering::Relaxed),
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channel_requests_failed: self.channel_requests_failed.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub blocks_sent: u64,
    pub blocks_received: u64,
    pub channels_opened: u64,
    pub channel_requests_failed: u64,
    pub fatal_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = SessionMetrics::new();
        metrics.inc_sessions_started();
        metrics.inc_blocks_sent();
        metrics.inc_blocks_sent();
        metrics.inc_blocks_received();
        metrics.inc_channels_opened();
        metrics.inc_channel_requests_failed();
        metrics.inc_fatal_errors();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_started, 1);
        assert_eq!(snapshot.blocks_sent, 2);
        assert_eq!(snapshot.blocks_received, 1);
        assert_eq!(snapshot.channels_opened, 1);
        assert_eq!(snapshot.channel_requests_failed, 1);
        assert_eq!(snapshot.fatal_errors, 1);
    }
}
