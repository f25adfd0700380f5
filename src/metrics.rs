use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Process-wide relay counters. Observability only; session state lives in
/// the registry.
#[derive(Debug)]
pub struct RelayMetrics {
    // uploads
    pub uploads_accepted_total: AtomicU64,
    pub uploads_rejected_total: AtomicU64,

    // sessions
    pub sessions_active: AtomicU64,
    pub sessions_started_total: AtomicU64,
    pub sessions_stopped_total: AtomicU64,
    pub sessions_failed_total: AtomicU64,

    // transport
    pub bytes_sent_total: AtomicU64,
    pub packets_sent_total: AtomicU64,
    pub reconnects_total: AtomicU64,

    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            uploads_accepted_total: AtomicU64::new(0),
            uploads_rejected_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_started_total: AtomicU64::new(0),
            sessions_stopped_total: AtomicU64::new(0),
            sessions_failed_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),
            packets_sent_total: AtomicU64::new(0),
            reconnects_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_uploads_accepted(&self) {
        self.uploads_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_uploads_rejected(&self) {
        self.uploads_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions(&self) {
        self.sessions_started_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_sessions(&self, failed: bool) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.sessions_failed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sessions_stopped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent_total.fetch_add(bytes, Ordering::Relaxed);
        self.packets_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconnects(&self) {
        self.reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed();
        let uptime_seconds = uptime.as_secs_f64();
        let bytes_sent_total = self.bytes_sent_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            uptime_seconds: uptime.as_secs(),
            uploads_accepted_total: self.uploads_accepted_total.load(Ordering::Relaxed),
            uploads_rejected_total: self.uploads_rejected_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_started_total: self.sessions_started_total.load(Ordering::Relaxed),
            sessions_stopped_total: self.sessions_stopped_total.load(Ordering::Relaxed),
            sessions_failed_total: self.sessions_failed_total.load(Ordering::Relaxed),
            bytes_sent_total,
            packets_sent_total: self.packets_sent_total.load(Ordering::Relaxed),
            reconnects_total: self.reconnects_total.load(Ordering::Relaxed),
            bytes_sent_per_second: if uptime_seconds > 0.0 {
                bytes_sent_total as f64 / uptime_seconds
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,

    pub uploads_accepted_total: u64,
    pub uploads_rejected_total: u64,

    pub sessions_active: u64,
    pub sessions_started_total: u64,
    pub sessions_stopped_total: u64,
    pub sessions_failed_total: u64,

    pub bytes_sent_total: u64,
    pub packets_sent_total: u64,
    pub bytes_sent_per_second: f64,
    pub reconnects_total: u64,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn get_global_metrics() -> Arc<RelayMetrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(RelayMetrics::new()))
        .clone()
}

#[macro_export]
macro_rules! metrics {
    (increment_uploads_accepted) => {
        $crate::metrics::get_global_metrics().increment_uploads_accepted()
    };
    (increment_uploads_rejected) => {
        $crate::metrics::get_global_metrics().increment_uploads_rejected()
    };
    (increment_sessions) => {
        $crate::metrics::get_global_metrics().increment_sessions()
    };
    (decrement_sessions, $failed:expr) => {
        $crate::metrics::get_global_metrics().decrement_sessions($failed)
    };
    (add_bytes_sent, $bytes:expr) => {
        $crate::metrics::get_global_metrics().add_bytes_sent($bytes)
    };
    (increment_reconnects) => {
        $crate::metrics::get_global_metrics().increment_reconnects()
    };
}
