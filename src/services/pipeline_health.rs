//! Process-wide health counters for the metric ingestion pipeline.
//!
//! Written from the hot path (drop accounting) and the writer loop (buffer
//! usage, aggregate refresh marks); read by alert rules and dashboards. All
//! updates are atomic or take a sub-microsecond std mutex: nothing here
//! suspends or performs I/O.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

/// Bounded number of retained drop records.
const DROP_HISTORY_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct DropRecord {
    at: DateTime<Utc>,
    count: u64,
}

/// Pipeline health counters.
pub struct PipelineHealth {
    dropped_total: AtomicU64,
    buffer_usage_pct: AtomicU8,
    /// Millis since epoch of the last successful aggregate refresh (writer
    /// flush); 0 until the first flush.
    last_refresh_epoch_ms: AtomicI64,
    drop_history: Mutex<VecDeque<DropRecord>>,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            dropped_total: AtomicU64::new(0),
            buffer_usage_pct: AtomicU8::new(0),
            last_refresh_epoch_ms: AtomicI64::new(0),
            drop_history: Mutex::new(VecDeque::with_capacity(DROP_HISTORY_LIMIT)),
        }
    }

    /// Record `n` dropped events.
    pub fn record_drop(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.dropped_total.fetch_add(n, Ordering::Relaxed);

        let record = DropRecord {
            at: Utc::now(),
            count: n,
        };
        if let Ok(mut history) = self.drop_history.lock() {
            if history.len() == DROP_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(record);
        }
    }

    /// Total drops since process start.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Drops recorded at or after `since`, from the bounded history.
    pub fn dropped_since(&self, since: DateTime<Utc>) -> u64 {
        self.drop_history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|r| r.at >= since)
                    .map(|r| r.count)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Set by the pipeline writer each tick.
    pub fn update_buffer_usage(&self, percent: u8) {
        self.buffer_usage_pct
            .store(percent.min(100), Ordering::Relaxed);
    }

    pub fn buffer_usage_percent(&self) -> u8 {
        self.buffer_usage_pct.load(Ordering::Relaxed)
    }

    /// Mark a successful aggregate refresh (called by the writer after a
    /// flush lands).
    pub fn mark_aggregate_refresh(&self, at: DateTime<Utc>) {
        self.last_refresh_epoch_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since aggregates were last refreshed. Zero before the
    /// first refresh so a freshly started process does not alert.
    pub fn aggregate_refresh_lag_ms(&self) -> i64 {
        let last = self.last_refresh_epoch_ms.load(Ordering::Relaxed);
        if last == 0 {
            return 0;
        }
        (Utc::now().timestamp_millis() - last).max(0)
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_accumulate() {
        let health = PipelineHealth::new();
        health.record_drop(3);
        health.record_drop(0);
        health.record_drop(2);
        assert_eq!(health.dropped_total(), 5);
    }

    #[test]
    fn dropped_since_filters_by_time() {
        let health = PipelineHealth::new();
        let before = Utc::now() - chrono::Duration::seconds(60);
        health.record_drop(4);
        assert_eq!(health.dropped_since(before), 4);
        assert_eq!(
            health.dropped_since(Utc::now() + chrono::Duration::seconds(60)),
            0
        );
    }

    #[test]
    fn buffer_usage_clamped() {
        let health = PipelineHealth::new();
        health.update_buffer_usage(250);
        assert_eq!(health.buffer_usage_percent(), 100);
        health.update_buffer_usage(37);
        assert_eq!(health.buffer_usage_percent(), 37);
    }

    #[test]
    fn refresh_lag_zero_until_first_mark() {
        let health = PipelineHealth::new();
        assert_eq!(health.aggregate_refresh_lag_ms(), 0);
        health.mark_aggregate_refresh(Utc::now() - chrono::Duration::seconds(5));
        assert!(health.aggregate_refresh_lag_ms() >= 5000);
    }

    #[test]
    fn history_is_bounded() {
        let health = PipelineHealth::new();
        for _ in 0..(DROP_HISTORY_LIMIT + 100) {
            health.record_drop(1);
        }
        let early = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(health.dropped_since(early) as usize, DROP_HISTORY_LIMIT);
        assert_eq!(health.dropped_total() as usize, DROP_HISTORY_LIMIT + 100);
    }
}
