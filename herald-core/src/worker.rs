// File: src/worker.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use herald_common::models::account::{mask_credential, AccountHealth};
use herald_common::models::config::OnlineStatus;

use crate::gateway::Gateway;
use crate::proxy::{ProxyOutcome, ProxyPool};
use crate::Error;

const CONNECT_BASE_DELAY: Duration = Duration::from_secs(2);
const CONNECT_DELAY_CAP: Duration = Duration::from_secs(60);
const CONNECT_MAX_ATTEMPTS: u32 = 5;

/// Extra in-cycle attempts after the first send fails transiently.
const SEND_RETRIES: u32 = 2;
const SEND_RETRY_DELAY: Duration = Duration::from_secs(1);
const RATE_LIMIT_WAIT_CAP: Duration = Duration::from_secs(60);

/// Owns one account: its gateway connection, presence, health, and the
/// raw credential (which never leaves this struct or its gateway). All
/// gateway traffic for the account funnels through the internal mutex,
/// so sends for one account are naturally serialized.
pub struct AccountWorker {
    account_id: Uuid,
    index: usize,
    masked: String,
    gateway: Mutex<Box<dyn Gateway>>,
    health: RwLock<AccountHealth>,
    last_error: SyncMutex<Option<String>>,
    denied_destinations: SyncMutex<HashSet<String>>,
    proxy: Option<(Uuid, Arc<ProxyPool>)>,
}

impl AccountWorker {
    pub fn new(
        account_id: Uuid,
        index: usize,
        credential: &str,
        gateway: Box<dyn Gateway>,
        proxy: Option<(Uuid, Arc<ProxyPool>)>,
    ) -> Self {
        Self {
            account_id,
            index,
            masked: mask_credential(credential),
            gateway: Mutex::new(gateway),
            health: RwLock::new(AccountHealth::Active),
            last_error: SyncMutex::new(None),
            denied_destinations: SyncMutex::new(HashSet::new()),
            proxy,
        }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Log-safe preview of the credential.
    pub fn masked(&self) -> &str {
        &self.masked
    }

    pub fn health(&self) -> AccountHealth {
        *self.health.read()
    }

    pub fn set_health(&self, health: AccountHealth) {
        *self.health.write() = health;
    }

    /// Rate-limited accounts stay eligible; only `Invalid` and `Disabled`
    /// take an account out of the dispatch rotation.
    pub fn is_eligible(&self) -> bool {
        matches!(
            self.health(),
            AccountHealth::Active | AccountHealth::RateLimited
        )
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    /// Destinations that answered permission-denied this run.
    pub fn is_denied(&self, destination: &str) -> bool {
        self.denied_destinations.lock().contains(destination)
    }

    fn report_proxy(&self, outcome: ProxyOutcome) {
        if let Some((proxy_id, pool)) = &self.proxy {
            pool.report(*proxy_id, outcome);
        }
    }

    /// Connects with bounded exponential backoff. An invalid credential
    /// is permanent for the run; exhausting the retries disables the
    /// account until the next start.
    pub async fn connect(&self) -> Result<(), Error> {
        match self.health() {
            AccountHealth::Invalid => {
                return Err(Error::Unauthorized(format!(
                    "account {} has an invalid credential",
                    self.masked
                )));
            }
            AccountHealth::Disabled => {
                return Err(Error::Gateway(format!(
                    "account {} is disabled",
                    self.masked
                )));
            }
            _ => {}
        }

        let mut delay = CONNECT_BASE_DELAY;
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            let result = self.gateway.lock().await.connect().await;
            match result {
                Ok(()) => {
                    self.report_proxy(ProxyOutcome::Success);
                    self.set_health(AccountHealth::Active);
                    info!("account {} connected", self.masked);
                    return Ok(());
                }
                Err(Error::Unauthorized(msg)) => {
                    self.set_health(AccountHealth::Invalid);
                    self.record_error(&msg);
                    error!("account {} credential rejected: {msg}", self.masked);
                    return Err(Error::Unauthorized(msg));
                }
                Err(e) => {
                    self.report_proxy(ProxyOutcome::Failure);
                    self.record_error(e.to_string());
                    if attempt == CONNECT_MAX_ATTEMPTS {
                        break;
                    }
                    warn!(
                        "account {} connect attempt {attempt}/{CONNECT_MAX_ATTEMPTS} failed: {e}; retrying in {delay:?}",
                        self.masked
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_DELAY_CAP);
                }
            }
        }

        self.set_health(AccountHealth::Disabled);
        error!(
            "account {} disabled after {CONNECT_MAX_ATTEMPTS} connect attempts",
            self.masked
        );
        Err(Error::Gateway(format!(
            "connect failed after {CONNECT_MAX_ATTEMPTS} attempts"
        )))
    }

    /// One send attempt toward `destination`, with the per-class retry
    /// policy applied: permission-denied skip-lists the destination for
    /// the rest of the run, rate limits honor the platform hint, and
    /// transient failures get a small bounded number of retries before
    /// the cycle gives up on this destination.
    pub async fn send(&self, destination: &str, message: &str) -> Result<(), Error> {
        if self.is_denied(destination) {
            return Err(Error::PermissionDenied(format!(
                "destination {destination} is skip-listed for this run"
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .gateway
                .lock()
                .await
                .send_message(destination, message)
                .await;

            match result {
                Ok(()) => {
                    if self.health() == AccountHealth::RateLimited {
                        self.set_health(AccountHealth::Active);
                    }
                    return Ok(());
                }
                Err(Error::PermissionDenied(msg)) => {
                    self.denied_destinations
                        .lock()
                        .insert(destination.to_string());
                    warn!(
                        "account {} has no permission for {destination}; skipping it from now on",
                        self.masked
                    );
                    return Err(Error::PermissionDenied(msg));
                }
                Err(Error::Unauthorized(msg)) => {
                    self.set_health(AccountHealth::Invalid);
                    self.record_error(&msg);
                    error!(
                        "account {} credential rejected mid-run: {msg}",
                        self.masked
                    );
                    return Err(Error::Unauthorized(msg));
                }
                Err(Error::RateLimited { retry_after }) => {
                    self.set_health(AccountHealth::RateLimited);
                    if attempt > SEND_RETRIES {
                        return Err(Error::RateLimited { retry_after });
                    }
                    let wait = retry_after.min(RATE_LIMIT_WAIT_CAP);
                    warn!(
                        "account {} rate limited on {destination}; waiting {wait:?}",
                        self.masked
                    );
                    sleep(wait).await;
                }
                Err(e) if attempt <= SEND_RETRIES => {
                    debug!(
                        "account {} transient send failure on {destination} (attempt {attempt}): {e}",
                        self.masked
                    );
                    sleep(SEND_RETRY_DELAY).await;
                }
                Err(e) => {
                    self.record_error(e.to_string());
                    return Err(e);
                }
            }
        }
    }

    pub async fn set_presence(&self, status: OnlineStatus) -> Result<(), Error> {
        self.gateway.lock().await.set_presence(status).await
    }

    pub async fn heartbeat(&self) -> Result<(), Error> {
        self.gateway.lock().await.heartbeat().await
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.gateway.lock().await.disconnect().await {
            debug!("account {} disconnect error: {e}", self.masked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;

    fn worker_with(gateway: MockGateway) -> AccountWorker {
        AccountWorker::new(
            Uuid::new_v4(),
            0,
            "token-abcdefghijklmnop",
            Box::new(gateway),
            None,
        )
    }

    #[tokio::test]
    async fn invalid_credential_is_not_retried() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .times(1)
            .returning(|| Err(Error::Unauthorized("bad token".to_string())));

        let worker = worker_with(gateway);
        let result = worker.connect().await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert_eq!(worker.health(), AccountHealth::Invalid);

        // A second connect attempt must fail fast without touching the
        // gateway again (times(1) above would trip otherwise).
        assert!(worker.connect().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connect_failures_back_off_then_disable() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_connect()
            .times(5)
            .returning(|| Err(Error::Gateway("connection refused".to_string())));

        let worker = worker_with(gateway);
        let result = worker.connect().await;
        assert!(result.is_err());
        assert_eq!(worker.health(), AccountHealth::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_recovers_after_transient_failures() {
        let mut gateway = MockGateway::new();
        let mut calls = 0;
        gateway.expect_connect().times(3).returning(move || {
            calls += 1;
            if calls < 3 {
                Err(Error::Gateway("timeout".to_string()))
            } else {
                Ok(())
            }
        });

        let worker = worker_with(gateway);
        assert!(worker.connect().await.is_ok());
        assert_eq!(worker.health(), AccountHealth::Active);
    }

    #[tokio::test]
    async fn permission_denied_skip_lists_the_destination() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_send_message()
            .times(1)
            .returning(|_, _| Err(Error::PermissionDenied("403".to_string())));

        let worker = worker_with(gateway);
        assert!(worker.send("chan-1", "hello").await.is_err());
        assert!(worker.is_denied("chan-1"));

        // Skip-listed: the gateway is not called again.
        let second = worker.send("chan-1", "hello").await;
        assert!(matches!(second, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_then_retries() {
        let mut gateway = MockGateway::new();
        let mut calls = 0;
        gateway.expect_send_message().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(Error::RateLimited {
                    retry_after: Duration::from_secs(3),
                })
            } else {
                Ok(())
            }
        });

        let worker = worker_with(gateway);
        assert!(worker.send("chan-1", "hello").await.is_ok());
        assert_eq!(worker.health(), AccountHealth::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_send_failure_is_bounded() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_send_message()
            .times(3)
            .returning(|_, _| Err(Error::Gateway("502".to_string())));

        let worker = worker_with(gateway);
        let result = worker.send("chan-1", "hello").await;
        assert!(matches!(result, Err(Error::Gateway(_))));
        // Not skip-listed: next cycle may try again.
        assert!(!worker.is_denied("chan-1"));
    }
}
