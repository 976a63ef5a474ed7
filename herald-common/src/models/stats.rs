// File: herald-common/src/models/stats.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the run counters, as served by `GET stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_sent: u64,
    pub attempts: u64,
    pub active_accounts: usize,
    pub total_destinations: usize,
    pub uptime_secs: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Answer to `GET advertiser/status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub active_tokens: usize,
    pub channels_tracked: usize,
}
