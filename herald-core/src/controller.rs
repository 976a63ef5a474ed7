// File: src/controller.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use herald_common::models::account::AccountHealth;
use herald_common::models::config::EngineConfig;
use herald_common::models::log::LogLevel;
use herald_common::models::stats::{EngineStatus, StatsSnapshot};
use herald_common::traits::repository_traits::{
    ConfigRepository, CredentialRepository, DestinationRepository, ProxyRepository,
};

use crate::cooldown::CooldownRegistry;
use crate::gateway::GatewayFactory;
use crate::proxy::ProxyPool;
use crate::scheduler::{DispatchScheduler, SchedulerTiming};
use crate::stats::{LogBuffer, StatsTracker};
use crate::tasks::{spawn_keepalive_task, spawn_proxy_probe_task};
use crate::worker::AccountWorker;
use crate::Error;

/// How long `stop` lets in-flight sends finish before cancelling them.
const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Starting => write!(f, "starting"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Answer to a start/stop request.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
}

impl RunOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// External collaborators the engine reads at start, plus the gateway
/// transport. Bundled so the server wires everything in one place and
/// tests swap in in-memory stand-ins.
pub struct EngineDeps {
    pub config_repo: Arc<dyn ConfigRepository>,
    pub credential_repo: Arc<dyn CredentialRepository>,
    pub destination_repo: Arc<dyn DestinationRepository>,
    pub proxy_repo: Arc<dyn ProxyRepository>,
    pub gateway_factory: Arc<dyn GatewayFactory>,
}

/// Everything owned by one run, torn down on stop.
struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
    workers: Vec<Arc<AccountWorker>>,
    registry: Arc<CooldownRegistry>,
    message: Arc<RwLock<String>>,
}

/// Start/stop/status state machine for the engine. `status` answers
/// synchronously from shared state at any time; `start`/`stop` are
/// serialized and idempotent.
pub struct RunController {
    deps: EngineDeps,
    state: RwLock<RunState>,
    lifecycle: Mutex<()>,
    run: SyncMutex<Option<RunHandle>>,
    last_error: SyncMutex<Option<String>>,
    stats: Arc<StatsTracker>,
    logs: Arc<LogBuffer>,
    timing_override: SyncMutex<Option<SchedulerTiming>>,
}

impl RunController {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            state: RwLock::new(RunState::Stopped),
            lifecycle: Mutex::new(()),
            run: SyncMutex::new(None),
            last_error: SyncMutex::new(None),
            stats: Arc::new(StatsTracker::new()),
            logs: Arc::new(LogBuffer::default()),
            timing_override: SyncMutex::new(None),
        }
    }

    /// Replaces the config-derived scheduler timing. Test hook; the
    /// production path derives timing from `interval_minutes`.
    pub fn with_timing(self, timing: SchedulerTiming) -> Self {
        *self.timing_override.lock() = Some(timing);
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    fn set_state(&self, state: RunState) {
        *self.state.write() = state;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn log_entries(&self) -> Vec<herald_common::models::log::LogEntry> {
        self.logs.entries()
    }

    /// Non-blocking status for the dashboard poller.
    pub fn status(&self) -> EngineStatus {
        let running = self.state() == RunState::Running;
        let run = self.run.lock();
        match run.as_ref() {
            Some(handle) => EngineStatus {
                running,
                active_tokens: handle.workers.iter().filter(|w| w.is_eligible()).count(),
                channels_tracked: handle.registry.len(),
            },
            None => EngineStatus {
                running: false,
                active_tokens: 0,
                channels_tracked: 0,
            },
        }
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let (active, tracked) = {
            let run = self.run.lock();
            match run.as_ref() {
                Some(handle) => (
                    handle.workers.iter().filter(|w| w.is_eligible()).count(),
                    handle.registry.len(),
                ),
                None => (0, 0),
            }
        };
        self.stats.snapshot(active, tracked, Utc::now())
    }

    /// Hot-reloads the advertisement text into a running scheduler.
    /// Structural config fields still require a restart.
    pub fn update_message(&self, text: &str) {
        if let Some(handle) = self.run.lock().as_ref() {
            *handle.message.write() = text.to_string();
            info!("advertisement message hot-reloaded");
        }
    }

    pub async fn start(&self) -> RunOutcome {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            RunState::Running | RunState::Starting => {
                return RunOutcome::ok("advertiser is already running");
            }
            RunState::Stopping => {
                return RunOutcome::failed("advertiser is stopping; retry shortly");
            }
            RunState::Stopped => {}
        }

        self.set_state(RunState::Starting);
        *self.last_error.lock() = None;
        self.stats.reset(Utc::now());
        self.logs.append(LogLevel::Info, "advertiser starting");

        match self.spin_up().await {
            Ok(handle) => {
                let active = handle.workers.iter().filter(|w| w.is_eligible()).count();
                let tracked = handle.registry.len();
                *self.run.lock() = Some(handle);
                self.set_state(RunState::Running);
                self.logs.append(
                    LogLevel::Info,
                    format!(
                        "advertiser running with {active} account(s) over {tracked} destination(s)"
                    ),
                );
                RunOutcome::ok("advertiser started")
            }
            Err(e) => {
                self.set_state(RunState::Stopped);
                *self.last_error.lock() = Some(e.to_string());
                self.logs
                    .append(LogLevel::Error, format!("start failed: {e}"));
                RunOutcome::failed(e.to_string())
            }
        }
    }

    async fn spin_up(&self) -> Result<RunHandle, Error> {
        let config = self.deps.config_repo.get_config().await?;
        config.validate()?;

        let credentials = self.deps.credential_repo.list_credentials().await?;
        if credentials.is_empty() {
            return Err(Error::ConfigInvalid("no credentials configured".to_string()));
        }
        let records = self.deps.destination_repo.list_destinations().await?;
        let proxies = self.deps.proxy_repo.list_proxies().await?;
        if config.use_proxies && proxies.is_empty() {
            return Err(Error::ConfigInvalid(
                "proxy use is enabled but no proxies are configured".to_string(),
            ));
        }

        let pool = Arc::new(ProxyPool::new(proxies, config.use_proxies));
        let registry = Arc::new(CooldownRegistry::new(config.default_cooldown_minutes));
        let mut assignments: HashMap<usize, Vec<String>> = HashMap::new();
        for record in &records {
            registry.register(&record.channel_id, record.cooldown_minutes);
            assignments
                .entry(record.account_index)
                .or_default()
                .push(record.channel_id.clone());
        }

        let workers = self.build_workers(&config, &credentials, &pool);

        // Wait for every initial connect to resolve, success or permanent
        // failure, before deciding whether the run is viable.
        join_all(workers.iter().filter(|w| w.is_eligible()).map(|worker| {
            let worker = Arc::clone(worker);
            async move {
                let _ = worker.connect().await;
            }
        }))
        .await;

        let active = workers.iter().filter(|w| w.is_eligible()).count();
        if active == 0 {
            return Err(Error::Gateway(
                "no accounts reached an active state".to_string(),
            ));
        }

        for worker in workers.iter().filter(|w| w.is_eligible()) {
            if let Err(e) = worker.set_presence(config.online_status).await {
                self.logs.append(
                    LogLevel::Warn,
                    format!(
                        "could not set presence for account {}: {e}",
                        worker.masked()
                    ),
                );
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let message = Arc::new(RwLock::new(config.advertisement_message.clone()));
        let timing = self
            .timing_override
            .lock()
            .clone()
            .unwrap_or_else(|| SchedulerTiming::from_interval_minutes(config.interval_minutes));

        let scheduler = DispatchScheduler::new(
            Arc::clone(&registry),
            workers.clone(),
            assignments,
            Arc::clone(&message),
            timing,
            Arc::clone(&self.stats),
            Arc::clone(&self.logs),
            shutdown_rx.clone(),
        );
        let scheduler_handle = tokio::spawn(scheduler.run());

        let mut background = Vec::new();
        if config.keep_accounts_online {
            background.push(spawn_keepalive_task(
                workers.clone(),
                shutdown_rx.clone(),
                Arc::clone(&self.logs),
            ));
        }
        if pool.enabled() {
            background.push(spawn_proxy_probe_task(Arc::clone(&pool), shutdown_rx));
        }

        Ok(RunHandle {
            shutdown_tx,
            scheduler: scheduler_handle,
            background,
            workers,
            registry,
            message,
        })
    }

    fn build_workers(
        &self,
        config: &EngineConfig,
        credentials: &[String],
        pool: &Arc<ProxyPool>,
    ) -> Vec<Arc<AccountWorker>> {
        let mut workers = Vec::with_capacity(credentials.len());
        for (index, credential) in credentials.iter().enumerate() {
            let account_id = Uuid::new_v4();
            let proxy_entry = pool.acquire(account_id);
            let gateway = self
                .deps
                .gateway_factory
                .build(credential, proxy_entry.as_ref().map(|p| &p.spec));
            let worker = AccountWorker::new(
                account_id,
                index,
                credential,
                gateway,
                proxy_entry
                    .as_ref()
                    .map(|p| (p.proxy_id, Arc::clone(pool))),
            );
            // Proxy required but none assignable: the account fails its
            // connect outright instead of silently going direct.
            if config.use_proxies && proxy_entry.is_none() {
                worker.set_health(AccountHealth::Disabled);
                worker.record_error("no healthy proxy available");
                self.logs.append(
                    LogLevel::Warn,
                    format!(
                        "account {} disabled: no healthy proxy available",
                        worker.masked()
                    ),
                );
            }
            workers.push(Arc::new(worker));
        }
        workers
    }

    pub async fn stop(&self) -> RunOutcome {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            RunState::Stopped | RunState::Stopping => {
                return RunOutcome::ok("advertiser is already stopped");
            }
            RunState::Starting | RunState::Running => {}
        }

        self.set_state(RunState::Stopping);
        self.logs.append(LogLevel::Info, "advertiser stopping");

        let handle = self.run.lock().take();
        if let Some(mut handle) = handle {
            let _ = handle.shutdown_tx.send(true);

            match timeout(STOP_GRACE, &mut handle.scheduler).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("in-flight sends did not finish within {STOP_GRACE:?}; cancelling");
                    self.logs.append(
                        LogLevel::Warn,
                        "shutdown grace expired; cancelling in-flight sends",
                    );
                    handle.scheduler.abort();
                    let _ = (&mut handle.scheduler).await;
                }
            }
            for task in handle.background {
                task.abort();
            }
            join_all(handle.workers.iter().map(|worker| {
                let worker = Arc::clone(worker);
                async move {
                    worker.disconnect().await;
                }
            }))
            .await;
            // Cancelled sends must not keep destinations locked or
            // consume cooldown.
            handle.registry.clear_claims();
        }

        self.set_state(RunState::Stopped);
        self.logs.append(LogLevel::Info, "advertiser stopped");
        RunOutcome::ok("advertiser stopped")
    }
}
