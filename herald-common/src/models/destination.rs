// File: herald-common/src/models/destination.rs

use serde::{Deserialize, Serialize};

/// Persisted assignment of a destination channel to one account slot.
///
/// `account_index` is the position of the owning credential in the
/// credential list; `cooldown_minutes` overrides the engine default when
/// set. Cooldown *state* (last send time, in-flight claim) is runtime-only
/// and lives in the cooldown registry, keyed by `channel_id` alone so the
/// spacing bound holds even when several accounts alias one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub account_index: usize,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<u64>,
}
