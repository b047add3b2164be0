//! Health counters for the frame pump

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Health metrics for a pump
///
/// Counters survive restarts and sink swaps, they describe the pump over its
/// whole lifetime. All fields use atomic operations for thread-safe access.
pub struct PumpHealth {
    /// Number of ticks that fired
    pub ticks: AtomicU64,

    /// Number of frames a sink accepted
    pub frames_delivered: AtomicU64,

    /// Total bytes of frame data a sink accepted
    pub bytes_delivered: AtomicU64,

    /// Ticks skipped because the source was not ready
    pub not_ready_skips: AtomicU64,

    /// Ticks skipped because no sink was assigned
    pub no_sink_skips: AtomicU64,

    /// Sends a sink rejected
    pub send_failures: AtomicU64,

    /// Ticks that never fired because the previous one ran late
    pub overruns: AtomicU64,

    /// Unix microseconds of the last delivered frame
    pub last_frame_time: AtomicU64,
}

impl PumpHealth {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            not_ready_skips: AtomicU64::new(0),
            no_sink_skips: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame accepted by the sink
    pub fn record_delivery(&self, size: usize) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_not_ready(&self) {
        self.not_ready_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_sink(&self) {
        self.no_sink_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overruns(&self, count: u64) {
        if count > 0 {
            self.overruns.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }

    pub fn not_ready_skips(&self) -> u64 {
        self.not_ready_skips.load(Ordering::Relaxed)
    }

    pub fn no_sink_skips(&self) -> u64 {
        self.no_sink_skips.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last delivered frame (Unix microseconds)
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Percentage of send attempts the sink rejected
    pub fn failure_rate(&self) -> f64 {
        let failures = self.send_failures();
        let attempts = failures + self.frames_delivered();
        if attempts == 0 {
            return 0.0;
        }
        (failures as f64 / attempts as f64) * 100.0
    }

    /// Check if no frame was delivered for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_frame_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            ticks: self.ticks(),
            frames_delivered: self.frames_delivered(),
            bytes_delivered: self.bytes_delivered(),
            not_ready_skips: self.not_ready_skips(),
            no_sink_skips: self.no_sink_skips(),
            send_failures: self.send_failures(),
            overruns: self.overruns(),
            failure_rate: self.failure_rate(),
        }
    }
}

impl Default for PumpHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub ticks: u64,
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub not_ready_skips: u64,
    pub no_sink_skips: u64,
    pub send_failures: u64,
    pub overruns: u64,
    pub failure_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} ticks, {} frames ({} bytes), {} send failures ({:.2}%), skipped {} not ready / {} no sink, {} overruns",
            self.ticks,
            self.frames_delivered,
            self.bytes_delivered,
            self.send_failures,
            self.failure_rate,
            self.not_ready_skips,
            self.no_sink_skips,
            self.overruns
        )
    }
}
