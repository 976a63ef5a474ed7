// File: src/stats.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use herald_common::models::log::{LogEntry, LogLevel};
use herald_common::models::stats::StatsSnapshot;

pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Run counters. Written only through `reset` / `record_attempt`; safe
/// under concurrent workers.
pub struct StatsTracker {
    total_sent: AtomicU64,
    attempts: AtomicU64,
    uptime_start: Mutex<Option<DateTime<Utc>>>,
    last_activity_at: Mutex<Option<DateTime<Utc>>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            total_sent: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            uptime_start: Mutex::new(None),
            last_activity_at: Mutex::new(None),
        }
    }

    /// Zeroes the counters for a fresh run.
    pub fn reset(&self, now: DateTime<Utc>) {
        self.total_sent.store(0, Ordering::Relaxed);
        self.attempts.store(0, Ordering::Relaxed);
        *self.uptime_start.lock() = Some(now);
        *self.last_activity_at.lock() = None;
    }

    /// Every attempt bumps `last_activity_at`; only successes count
    /// toward `total_sent`.
    pub fn record_attempt(&self, success: bool, now: DateTime<Utc>) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_sent.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_activity_at.lock() = Some(now);
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(
        &self,
        active_accounts: usize,
        total_destinations: usize,
        now: DateTime<Utc>,
    ) -> StatsSnapshot {
        let uptime_secs = (*self.uptime_start.lock())
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0);
        StatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            active_accounts,
            total_destinations,
            uptime_secs,
            last_activity_at: *self.last_activity_at.lock(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity activity log; the newest entry overwrites the oldest
/// once full. `append` is the only mutator and also mirrors the entry to
/// the process log so both views stay in sync.
pub struct LogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn append(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Current contents, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_overwrites_oldest() {
        let logs = LogBuffer::new(3);
        for i in 0..5 {
            logs.append(LogLevel::Info, format!("entry {i}"));
        }
        let entries = logs.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 2");
        assert_eq!(entries[2].message, "entry 4");
    }

    #[test]
    fn counters_reset_on_new_run() {
        let stats = StatsTracker::new();
        let now = Utc::now();
        stats.reset(now);
        stats.record_attempt(true, now);
        stats.record_attempt(false, now);
        assert_eq!(stats.total_sent(), 1);

        let snap = stats.snapshot(2, 3, now);
        assert_eq!(snap.attempts, 2);
        assert_eq!(snap.active_accounts, 2);
        assert_eq!(snap.total_destinations, 3);

        stats.reset(now);
        assert_eq!(stats.total_sent(), 0);
        assert!(stats.snapshot(0, 0, now).last_activity_at.is_none());
    }
}
