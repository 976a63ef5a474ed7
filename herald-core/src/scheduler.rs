// File: src/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use herald_common::models::log::LogLevel;

use crate::cooldown::{Claim, CooldownRegistry, Denial};
use crate::stats::{LogBuffer, StatsTracker};
use crate::worker::AccountWorker;
use crate::Error;

/// Timing knobs for the dispatch loop. Production values come from the
/// engine config; tests inject millisecond-scale ones.
#[derive(Debug, Clone)]
pub struct SchedulerTiming {
    pub cycle_interval: Duration,
    pub send_timeout: Duration,
    /// Randomized pause between consecutive sends of one account.
    pub send_gap: (Duration, Duration),
}

impl SchedulerTiming {
    pub fn from_interval_minutes(minutes: u64) -> Self {
        Self {
            cycle_interval: Duration::from_secs(minutes.max(1) * 60),
            send_timeout: Duration::from_secs(30),
            send_gap: (Duration::from_secs(2), Duration::from_secs(5)),
        }
    }
}

/// Drives the periodic advertise cycle. Between cycles the task is
/// suspended on a timer that the shutdown signal can cut short; within a
/// cycle, each eligible account runs its destination pass as its own
/// task, so the fan-out is bounded by the number of active accounts.
pub struct DispatchScheduler {
    registry: Arc<CooldownRegistry>,
    workers: Vec<Arc<AccountWorker>>,
    assignments: HashMap<usize, Vec<String>>,
    message: Arc<RwLock<String>>,
    timing: SchedulerTiming,
    stats: Arc<StatsTracker>,
    logs: Arc<LogBuffer>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DispatchScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<CooldownRegistry>,
        workers: Vec<Arc<AccountWorker>>,
        assignments: HashMap<usize, Vec<String>>,
        message: Arc<RwLock<String>>,
        timing: SchedulerTiming,
        stats: Arc<StatsTracker>,
        logs: Arc<LogBuffer>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            workers,
            assignments,
            message,
            timing,
            stats,
            logs,
            shutdown_rx,
        }
    }

    pub async fn run(self) {
        info!(
            "dispatch scheduler started; cycle interval {:?}",
            self.timing.cycle_interval
        );
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.run_cycle().await;

            let mut shutdown_rx = self.shutdown_rx.clone();
            tokio::select! {
                _ = sleep(self.timing.cycle_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("dispatch scheduler stopped");
    }

    async fn run_cycle(&self) {
        let message = self.message.read().clone();
        if message.trim().is_empty() {
            self.logs.append(
                LogLevel::Warn,
                "no advertisement message configured; skipping cycle",
            );
            return;
        }

        let mut passes = Vec::new();
        for worker in &self.workers {
            if !worker.is_eligible() {
                continue;
            }
            let destinations = self
                .assignments
                .get(&worker.index())
                .cloned()
                .unwrap_or_default();
            // Accounts with nothing assigned are skipped entirely.
            if destinations.is_empty() {
                continue;
            }
            passes.push(tokio::spawn(account_pass(
                Arc::clone(worker),
                destinations,
                message.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                Arc::clone(&self.logs),
                self.timing.clone(),
                self.shutdown_rx.clone(),
            )));
        }

        let sent: u64 = join_all(passes)
            .await
            .into_iter()
            .filter_map(|result| result.ok())
            .sum();
        if sent > 0 {
            self.logs
                .append(LogLevel::Info, format!("cycle complete: {sent} message(s) sent"));
        } else {
            debug!("cycle complete: nothing eligible");
        }
    }
}

/// One account's walk over its assigned destinations. Returns the number
/// of successful sends.
#[allow(clippy::too_many_arguments)]
async fn account_pass(
    worker: Arc<AccountWorker>,
    destinations: Vec<String>,
    message: String,
    registry: Arc<CooldownRegistry>,
    stats: Arc<StatsTracker>,
    logs: Arc<LogBuffer>,
    timing: SchedulerTiming,
    shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut sent = 0u64;
    for destination in destinations {
        if *shutdown_rx.borrow() {
            break;
        }
        if worker.is_denied(&destination) {
            continue;
        }

        match registry.try_claim(&destination, Utc::now()) {
            Claim::Denied(Denial::InFlight) => {
                debug!("destination {destination} already has a send in flight");
            }
            Claim::Denied(Denial::Cooling(remaining)) => {
                debug!(
                    "destination {destination} cooling for another {}s",
                    remaining.num_seconds()
                );
            }
            Claim::Granted => {
                let outcome = timeout(timing.send_timeout, worker.send(&destination, &message)).await;
                let (success, failure): (bool, Option<Error>) = match outcome {
                    Ok(Ok(())) => (true, None),
                    Ok(Err(e)) => (false, Some(e)),
                    Err(elapsed) => (false, Some(elapsed.into())),
                };
                registry.release(&destination, success, Utc::now());
                stats.record_attempt(success, Utc::now());

                if success {
                    sent += 1;
                    logs.append(
                        LogLevel::Info,
                        format!(
                            "sent advertisement to {destination} via account {}",
                            worker.masked()
                        ),
                    );
                } else if let Some(e) = failure {
                    let level = match e {
                        Error::Unauthorized(_) => LogLevel::Error,
                        _ => LogLevel::Warn,
                    };
                    logs.append(
                        level,
                        format!(
                            "send to {destination} via account {} failed: {e}",
                            worker.masked()
                        ),
                    );
                }

                let gap = jitter(timing.send_gap);
                if !gap.is_zero() {
                    let mut shutdown_rx = shutdown_rx.clone();
                    tokio::select! {
                        _ = sleep(gap) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
    }
    sent
}

fn jitter((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand::rng().random_range(0..=span))
}
