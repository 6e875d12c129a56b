//! Per-pool job counters and a latency histogram.

use crate::error::{Error, Result};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// One hour, in microseconds.
const HIGHEST_TRACKED_US: u64 = 3_600_000_000;

/// Counters one pool updates as jobs finish or get turned away.
#[derive(Debug)]
pub struct Metrics {
    completed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
    busy_us: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
    since: Instant,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let latency_us = Histogram::new_with_bounds(1, HIGHEST_TRACKED_US, 2)
            .map_err(|e| Error::config(format!("latency histogram: {e}")))?;

        Ok(Self {
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            busy_us: AtomicU64::new(0),
            latency_us: Mutex::new(latency_us),
            since: Instant::now(),
        })
    }

    /// Counts one finished job. A panicking job still counts as completed.
    pub fn record_job(&self, elapsed: Duration, panicked: bool) {
        let us = (elapsed.as_micros() as u64).clamp(1, HIGHEST_TRACKED_US);

        self.completed.fetch_add(1, Ordering::Relaxed);
        self.busy_us.fetch_add(us, Ordering::Relaxed);
        if panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }

        // Samples are skipped under contention; counters stay exact.
        if let Some(mut histogram) = self.latency_us.try_lock() {
            histogram.saturating_record(us);
        }
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_us.lock();
        let quantile = |q: f64| {
            if histogram.is_empty() {
                Duration::ZERO
            } else {
                Duration::from_micros(histogram.value_at_quantile(q))
            }
        };

        MetricsSnapshot {
            uptime: self.since.elapsed(),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            busy: Duration::from_micros(self.busy_us.load(Ordering::Relaxed)),
            p50_latency: quantile(0.50),
            p99_latency: quantile(0.99),
            max_latency: if histogram.is_empty() {
                Duration::ZERO
            } else {
                Duration::from_micros(histogram.max())
            },
        }
    }
}

/// Point-in-time copy of a pool's [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub completed: u64,
    pub panicked: u64,
    /// Submissions turned away by a shut down, zero-sized or saturated pool
    pub rejected: u64,
    /// Summed run time of all completed jobs
    pub busy: Duration,
    pub p50_latency: Duration,
    pub p99_latency: Duration,
    pub max_latency: Duration,
}

impl MetricsSnapshot {
    pub fn jobs_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            0.0
        } else {
            self.completed as f64 / seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_jobs_and_panics() {
        let metrics = Metrics::new().unwrap();

        metrics.record_job(Duration::from_micros(100), false);
        metrics.record_job(Duration::from_micros(300), true);
        metrics.record_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.panicked, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.busy, Duration::from_micros(400));
        assert!(snapshot.max_latency >= snapshot.p50_latency);
        assert_eq!(metrics.completed(), 2);
    }

    #[test]
    fn test_empty_snapshot_has_zero_latency() {
        let snapshot = Metrics::new().unwrap().snapshot();
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.p99_latency, Duration::ZERO);
        assert_eq!(snapshot.max_latency, Duration::ZERO);
    }

    #[test]
    fn test_sub_microsecond_jobs_are_recorded() {
        let metrics = Metrics::new().unwrap();
        metrics.record_job(Duration::from_nanos(10), false);
        assert_eq!(metrics.snapshot().max_latency, Duration::from_micros(1));
    }
}
