// File: src/cooldown.rs
//
// Per-destination send spacing and mutual exclusion. `try_claim` /
// `release` is the only way any component touches a destination's
// cooldown state.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Granted,
    Denied(Denial),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Another send to this destination is currently in flight.
    InFlight,
    /// The destination is still cooling down; remaining wait attached.
    Cooling(Duration),
}

#[derive(Debug, Clone)]
struct DestinationState {
    cooldown: Duration,
    last_sent_at: Option<DateTime<Utc>>,
    claimed: bool,
}

/// Tracks last-send time per destination and hands out exclusive claims.
///
/// Keyed by destination id alone: accounts aliasing the same destination
/// share one cooldown, so they can never collectively exceed the spacing
/// bound. The map's per-entry locking makes each claim/release atomic
/// under concurrent workers.
pub struct CooldownRegistry {
    destinations: DashMap<String, DestinationState>,
    default_cooldown: Duration,
}

impl CooldownRegistry {
    pub fn new(default_cooldown_minutes: u64) -> Self {
        Self {
            destinations: DashMap::new(),
            default_cooldown: Duration::minutes(default_cooldown_minutes as i64),
        }
    }

    /// Registers a destination, overriding the default cooldown when the
    /// record carries one. Re-registering keeps existing runtime state.
    pub fn register(&self, destination_id: &str, cooldown_minutes: Option<u64>) {
        let cooldown = cooldown_minutes
            .map(|m| Duration::minutes(m as i64))
            .unwrap_or(self.default_cooldown);
        self.destinations
            .entry(destination_id.to_string())
            .and_modify(|state| state.cooldown = cooldown)
            .or_insert(DestinationState {
                cooldown,
                last_sent_at: None,
                claimed: false,
            });
    }

    /// Attempts to claim `destination_id` for one send. An unknown id is
    /// registered on the fly with the default cooldown.
    pub fn try_claim(&self, destination_id: &str, now: DateTime<Utc>) -> Claim {
        let mut state = self
            .destinations
            .entry(destination_id.to_string())
            .or_insert(DestinationState {
                cooldown: self.default_cooldown,
                last_sent_at: None,
                claimed: false,
            });

        if state.claimed {
            return Claim::Denied(Denial::InFlight);
        }
        if let Some(last) = state.last_sent_at {
            let elapsed = now - last;
            if elapsed < state.cooldown {
                return Claim::Denied(Denial::Cooling(state.cooldown - elapsed));
            }
        }
        state.claimed = true;
        Claim::Granted
    }

    /// Releases a claim. Only a successful send advances `last_sent_at`;
    /// a failed or cancelled send leaves the destination immediately
    /// eligible again.
    pub fn release(&self, destination_id: &str, success: bool, now: DateTime<Utc>) {
        if let Some(mut state) = self.destinations.get_mut(destination_id) {
            state.claimed = false;
            if success {
                state.last_sent_at = Some(now);
            }
        }
    }

    pub fn set_cooldown(&self, destination_id: &str, minutes: u64) -> bool {
        match self.destinations.get_mut(destination_id) {
            Some(mut state) => {
                state.cooldown = Duration::minutes(minutes as i64);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, destination_id: &str) -> bool {
        self.destinations.remove(destination_id).is_some()
    }

    /// Drops every outstanding claim. Used when a stop cancels in-flight
    /// sends: a cancelled send must not keep its destination locked.
    pub fn clear_claims(&self) {
        for mut entry in self.destinations.iter_mut() {
            entry.claimed = false;
        }
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn last_sent(&self, destination_id: &str) -> Option<DateTime<Utc>> {
        self.destinations
            .get(destination_id)
            .and_then(|state| state.last_sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().to_utc()
            + Duration::minutes(minutes)
    }

    #[test]
    fn second_claim_before_release_is_denied() {
        let registry = CooldownRegistry::new(0);
        registry.register("chan-1", None);

        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
        assert_eq!(
            registry.try_claim("chan-1", at(0)),
            Claim::Denied(Denial::InFlight)
        );

        registry.release("chan-1", true, at(0));
        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
    }

    #[test]
    fn failed_release_does_not_consume_cooldown() {
        let registry = CooldownRegistry::new(60);
        registry.register("chan-1", None);

        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
        registry.release("chan-1", false, at(0));

        assert!(registry.last_sent("chan-1").is_none());
        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
    }

    #[test]
    fn cooldown_window_is_enforced() {
        let registry = CooldownRegistry::new(60);
        registry.register("chan-1", None);

        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
        registry.release("chan-1", true, at(0));

        match registry.try_claim("chan-1", at(10)) {
            Claim::Denied(Denial::Cooling(remaining)) => {
                assert_eq!(remaining, Duration::minutes(50));
            }
            other => panic!("expected cooling denial, got {:?}", other),
        }

        // Exactly at the boundary the destination is eligible again.
        assert_eq!(registry.try_claim("chan-1", at(60)), Claim::Granted);
    }

    #[test]
    fn per_destination_cooldown_overrides_default() {
        let registry = CooldownRegistry::new(60);
        registry.register("slow", Some(120));
        registry.register("fast", Some(0));

        assert_eq!(registry.try_claim("slow", at(0)), Claim::Granted);
        registry.release("slow", true, at(0));
        assert!(matches!(
            registry.try_claim("slow", at(90)),
            Claim::Denied(Denial::Cooling(_))
        ));

        assert_eq!(registry.try_claim("fast", at(0)), Claim::Granted);
        registry.release("fast", true, at(0));
        assert_eq!(registry.try_claim("fast", at(0)), Claim::Granted);
    }

    #[test]
    fn unknown_destination_is_registered_with_default() {
        let registry = CooldownRegistry::new(30);
        assert_eq!(registry.try_claim("surprise", at(0)), Claim::Granted);
        registry.release("surprise", true, at(0));
        assert!(matches!(
            registry.try_claim("surprise", at(15)),
            Claim::Denied(Denial::Cooling(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_claims_releases_without_touching_last_sent() {
        let registry = CooldownRegistry::new(0);
        registry.register("chan-1", None);
        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);

        registry.clear_claims();
        assert!(registry.last_sent("chan-1").is_none());
        assert_eq!(registry.try_claim("chan-1", at(0)), Claim::Granted);
    }
}
