// File: src/proxy.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use herald_common::models::proxy::{ProxyHealth, ProxySpec};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ProxyEntry {
    pub proxy_id: Uuid,
    pub spec: ProxySpec,
    pub health: ProxyHealth,
    consecutive_failures: u32,
}

/// Holds the outbound proxies and their health, and assigns them to
/// accounts. Assignment is sticky: an account keeps its proxy for session
/// continuity until that proxy degrades, then it is rotated onto the next
/// healthy entry. When the pool is disabled (`use_proxies = false`),
/// `acquire` always answers `None` and accounts connect directly.
pub struct ProxyPool {
    entries: DashMap<Uuid, ProxyEntry>,
    assignments: DashMap<Uuid, Uuid>,
    order: Vec<Uuid>,
    cursor: AtomicUsize,
    enabled: bool,
    failure_threshold: u32,
}

impl ProxyPool {
    pub fn new(specs: Vec<ProxySpec>, enabled: bool) -> Self {
        Self::with_threshold(specs, enabled, DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(specs: Vec<ProxySpec>, enabled: bool, failure_threshold: u32) -> Self {
        let entries = DashMap::new();
        let mut order = Vec::with_capacity(specs.len());
        for spec in specs {
            let proxy_id = Uuid::new_v4();
            order.push(proxy_id);
            entries.insert(
                proxy_id,
                ProxyEntry {
                    proxy_id,
                    spec,
                    health: ProxyHealth::Healthy,
                    consecutive_failures: 0,
                },
            );
        }
        Self {
            entries,
            assignments: DashMap::new(),
            order,
            cursor: AtomicUsize::new(0),
            enabled,
            failure_threshold,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Healthy entries currently available for assignment.
    pub fn usable(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.health == ProxyHealth::Healthy)
            .count()
    }

    /// Returns the account's proxy, assigning one if needed. `None` means
    /// either the pool is disabled or no healthy proxy remains; in the
    /// latter case the caller fails the connect attempt rather than
    /// silently bypassing the proxy requirement.
    pub fn acquire(&self, account_id: Uuid) -> Option<ProxyEntry> {
        if !self.enabled {
            return None;
        }

        if let Some(assigned) = self.assignments.get(&account_id).map(|r| *r) {
            if let Some(entry) = self.entries.get(&assigned) {
                if entry.health == ProxyHealth::Healthy {
                    return Some(entry.clone());
                }
            }
            debug!("account {} loses degraded proxy assignment", account_id);
            self.assignments.remove(&account_id);
        }

        let total = self.order.len();
        for _ in 0..total {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
            let proxy_id = self.order[idx];
            if let Some(entry) = self.entries.get(&proxy_id) {
                if entry.health == ProxyHealth::Healthy {
                    self.assignments.insert(account_id, proxy_id);
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Reports a connection outcome for a proxy. Consecutive failures
    /// demote it to `Unreachable` and then `Disabled` once the threshold
    /// is reached; any success restores it fully.
    pub fn report(&self, proxy_id: Uuid, outcome: ProxyOutcome) {
        let Some(mut entry) = self.entries.get_mut(&proxy_id) else {
            return;
        };
        match outcome {
            ProxyOutcome::Success => {
                entry.consecutive_failures = 0;
                entry.health = ProxyHealth::Healthy;
            }
            ProxyOutcome::Failure => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    if entry.health != ProxyHealth::Disabled {
                        warn!(
                            "proxy {} disabled after {} consecutive failures",
                            entry.spec, entry.consecutive_failures
                        );
                    }
                    entry.health = ProxyHealth::Disabled;
                } else {
                    entry.health = ProxyHealth::Unreachable;
                }
            }
        }
    }

    /// Re-checks every degraded proxy with a plain TCP connect and
    /// restores the ones that answer.
    pub async fn probe(&self, per_proxy_timeout: Duration) {
        let targets: Vec<(Uuid, String)> = self
            .entries
            .iter()
            .filter(|e| e.health != ProxyHealth::Healthy)
            .map(|e| (e.proxy_id, e.spec.addr()))
            .collect();

        for (proxy_id, addr) in targets {
            let reachable = matches!(
                timeout(per_proxy_timeout, TcpStream::connect(&addr)).await,
                Ok(Ok(_))
            );
            if reachable {
                if let Some(mut entry) = self.entries.get_mut(&proxy_id) {
                    info!("proxy {} back to healthy after probe", entry.spec);
                    entry.health = ProxyHealth::Healthy;
                    entry.consecutive_failures = 0;
                }
            } else {
                debug!("proxy probe: {} still unreachable", addr);
            }
        }
    }
}
