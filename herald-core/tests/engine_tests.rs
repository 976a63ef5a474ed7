// tests/engine_tests.rs

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use herald_common::models::config::{EngineConfig, OnlineStatus};
use herald_common::models::destination::DestinationRecord;
use herald_common::models::proxy::ProxySpec;
use herald_common::traits::repository_traits::{
    ConfigRepository, CredentialRepository, DestinationRepository, ProxyRepository,
};
use herald_common::Error;
use herald_core::controller::{EngineDeps, RunController, RunState};
use herald_core::gateway::{Gateway, GatewayFactory};
use herald_core::scheduler::SchedulerTiming;

/// In-memory stand-in for the persisted state store.
#[derive(Default)]
struct MemStore {
    config: StdMutex<EngineConfig>,
    tokens: StdMutex<Vec<String>>,
    destinations: StdMutex<Vec<DestinationRecord>>,
    proxies: StdMutex<Vec<ProxySpec>>,
}

impl MemStore {
    fn with(
        config: EngineConfig,
        tokens: &[&str],
        destinations: Vec<(usize, &str)>,
    ) -> Arc<Self> {
        let store = Self::default();
        *store.config.lock().unwrap() = config;
        *store.tokens.lock().unwrap() = tokens.iter().map(|t| t.to_string()).collect();
        *store.destinations.lock().unwrap() = destinations
            .into_iter()
            .map(|(account_index, channel_id)| DestinationRecord {
                account_index,
                channel_id: channel_id.to_string(),
                cooldown_minutes: None,
            })
            .collect();
        Arc::new(store)
    }
}

#[async_trait]
impl ConfigRepository for MemStore {
    async fn get_config(&self) -> Result<EngineConfig, Error> {
        Ok(self.config.lock().unwrap().clone())
    }
    async fn set_config(&self, config: &EngineConfig) -> Result<(), Error> {
        *self.config.lock().unwrap() = config.clone();
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for MemStore {
    async fn list_credentials(&self) -> Result<Vec<String>, Error> {
        Ok(self.tokens.lock().unwrap().clone())
    }
    async fn credential_count(&self) -> Result<usize, Error> {
        Ok(self.tokens.lock().unwrap().len())
    }
    async fn replace_credentials(&self, credentials: &[String]) -> Result<(), Error> {
        *self.tokens.lock().unwrap() = credentials.to_vec();
        Ok(())
    }
}

#[async_trait]
impl DestinationRepository for MemStore {
    async fn list_destinations(&self) -> Result<Vec<DestinationRecord>, Error> {
        Ok(self.destinations.lock().unwrap().clone())
    }
    async fn add_destination(&self, record: &DestinationRecord) -> Result<(), Error> {
        self.destinations.lock().unwrap().push(record.clone());
        Ok(())
    }
    async fn remove_destination(
        &self,
        account_index: usize,
        channel_id: &str,
    ) -> Result<bool, Error> {
        let mut destinations = self.destinations.lock().unwrap();
        let before = destinations.len();
        destinations.retain(|d| !(d.account_index == account_index && d.channel_id == channel_id));
        Ok(destinations.len() < before)
    }
    async fn set_cooldown(&self, channel_id: &str, minutes: u64) -> Result<bool, Error> {
        let mut matched = false;
        for record in self.destinations.lock().unwrap().iter_mut() {
            if record.channel_id == channel_id {
                record.cooldown_minutes = Some(minutes);
                matched = true;
            }
        }
        Ok(matched)
    }
}

#[async_trait]
impl ProxyRepository for MemStore {
    async fn list_proxies(&self) -> Result<Vec<ProxySpec>, Error> {
        Ok(self.proxies.lock().unwrap().clone())
    }
    async fn replace_proxies(&self, proxies: &[ProxySpec]) -> Result<(), Error> {
        *self.proxies.lock().unwrap() = proxies.to_vec();
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum GatewayMode {
    Ok,
    RejectCredential,
}

/// Scripted gateway that records every send.
struct FakeGateway {
    mode: GatewayMode,
    sent: Arc<StdMutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn connect(&mut self) -> Result<(), Error> {
        match self.mode {
            GatewayMode::Ok => Ok(()),
            GatewayMode::RejectCredential => {
                Err(Error::Unauthorized("invalid credential".to_string()))
            }
        }
    }
    async fn disconnect(&mut self) -> Result<(), Error> {
        Ok(())
    }
    async fn send_message(&self, destination: &str, content: &str) -> Result<(), Error> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), content.to_string()));
        Ok(())
    }
    async fn set_presence(
        &self,
        _status: herald_common::models::config::OnlineStatus,
    ) -> Result<(), Error> {
        Ok(())
    }
    async fn heartbeat(&self) -> Result<(), Error> {
        Ok(())
    }
}

struct FakeGatewayFactory {
    mode: GatewayMode,
    sent: Arc<StdMutex<Vec<(String, String)>>>,
}

impl FakeGatewayFactory {
    fn new(mode: GatewayMode) -> (Arc<Self>, Arc<StdMutex<Vec<(String, String)>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        (
            Arc::new(Self {
                mode,
                sent: Arc::clone(&sent),
            }),
            sent,
        )
    }
}

impl GatewayFactory for FakeGatewayFactory {
    fn build(
        &self,
        _credential: &str,
        _proxy: Option<&herald_common::models::proxy::ProxySpec>,
    ) -> Box<dyn Gateway> {
        Box::new(FakeGateway {
            mode: self.mode,
            sent: Arc::clone(&self.sent),
        })
    }
}

fn test_config(cooldown_minutes: u64) -> EngineConfig {
    EngineConfig {
        advertisement_message: "hello".to_string(),
        interval_minutes: 10,
        default_cooldown_minutes: cooldown_minutes,
        online_status: OnlineStatus::Online,
        use_proxies: false,
        keep_accounts_online: false,
    }
}

fn fast_timing() -> SchedulerTiming {
    SchedulerTiming {
        cycle_interval: Duration::from_millis(50),
        send_timeout: Duration::from_secs(2),
        send_gap: (Duration::ZERO, Duration::ZERO),
    }
}

fn engine(store: Arc<MemStore>, factory: Arc<FakeGatewayFactory>) -> RunController {
    RunController::new(EngineDeps {
        config_repo: store.clone(),
        credential_repo: store.clone(),
        destination_repo: store.clone(),
        proxy_repo: store,
        gateway_factory: factory,
    })
    .with_timing(fast_timing())
}

#[tokio::test]
async fn shared_destination_is_sent_once_per_cooldown_window() {
    // Two accounts alias one destination with a long cooldown: exactly
    // one of them may send within the window, no matter how many cycles
    // elapse.
    let store = MemStore::with(test_config(60), &["tok-a", "tok-b"], vec![(0, "chan-1"), (1, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    let outcome = controller.start().await;
    assert!(outcome.success, "start failed: {}", outcome.message);

    sleep(Duration::from_millis(300)).await;
    controller.stop().await;

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "cooldown must limit the shared destination to one send");
    assert_eq!(sent[0], ("chan-1".to_string(), "hello".to_string()));
    assert_eq!(controller.stats_snapshot().total_sent, 1);
}

#[tokio::test]
async fn zero_cooldown_destination_is_sent_every_cycle() {
    let store = MemStore::with(test_config(0), &["tok-a"], vec![(0, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    assert!(controller.start().await.success);
    sleep(Duration::from_millis(220)).await;
    controller.stop().await;

    let count = sent.lock().unwrap().len();
    assert!(count >= 2, "expected repeated sends, got {count}");
}

#[tokio::test]
async fn start_with_no_credentials_reports_and_stays_stopped() {
    let store = MemStore::with(test_config(60), &[], vec![(0, "chan-1")]);
    let (factory, _) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    let outcome = controller.start().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("credential"));
    assert_eq!(controller.state(), RunState::Stopped);
    assert!(!controller.status().running);
}

#[tokio::test]
async fn start_with_only_invalid_credentials_fails() {
    let store = MemStore::with(test_config(60), &["bad-1", "bad-2"], vec![(0, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::RejectCredential);
    let controller = engine(store, factory);

    let outcome = controller.start().await;
    assert!(!outcome.success);
    assert_eq!(controller.state(), RunState::Stopped);
    assert!(controller.last_error().is_some());
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn no_sends_happen_after_stop() {
    let store = MemStore::with(test_config(0), &["tok-a"], vec![(0, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    assert!(controller.start().await.success);
    sleep(Duration::from_millis(120)).await;
    let stop = controller.stop().await;
    assert!(stop.success);
    assert_eq!(controller.state(), RunState::Stopped);

    let after_stop = sent.lock().unwrap().len();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(
        sent.lock().unwrap().len(),
        after_stop,
        "no new cycle may begin after stop"
    );
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let store = MemStore::with(test_config(60), &["tok-a"], vec![(0, "chan-1")]);
    let (factory, _) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    assert!(controller.start().await.success);
    let second = controller.start().await;
    assert!(second.success);
    assert!(second.message.contains("already"));

    assert!(controller.stop().await.success);
    let second_stop = controller.stop().await;
    assert!(second_stop.success);
    assert!(second_stop.message.contains("already"));
}

#[tokio::test]
async fn credential_replace_while_stopped_is_picked_up_by_next_start() {
    let store = MemStore::with(test_config(60), &["tok-a"], vec![(0, "chan-1")]);
    let (factory, _) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store.clone(), factory);

    assert!(controller.start().await.success);
    assert_eq!(controller.status().active_tokens, 1);
    controller.stop().await;

    store
        .replace_credentials(&["tok-x".to_string(), "tok-y".to_string()])
        .await
        .unwrap();

    assert!(controller.start().await.success);
    assert_eq!(controller.status().active_tokens, 2);
    controller.stop().await;
}

#[tokio::test]
async fn proxies_required_but_missing_blocks_start() {
    let mut config = test_config(60);
    config.use_proxies = true;
    let store = MemStore::with(config, &["tok-a"], vec![(0, "chan-1")]);
    let (factory, _) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    let outcome = controller.start().await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("prox"));
    assert_eq!(controller.state(), RunState::Stopped);
}

#[tokio::test]
async fn message_text_hot_reloads_into_a_running_scheduler() {
    let store = MemStore::with(test_config(0), &["tok-a"], vec![(0, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    assert!(controller.start().await.success);
    sleep(Duration::from_millis(120)).await;
    controller.update_message("fresh text");
    sleep(Duration::from_millis(150)).await;
    controller.stop().await;

    let sent = sent.lock().unwrap();
    assert!(sent.iter().any(|(_, content)| content == "hello"));
    assert!(
        sent.iter().any(|(_, content)| content == "fresh text"),
        "hot-reloaded message never went out"
    );
}

#[tokio::test]
async fn accounts_with_no_destinations_are_skipped() {
    // Account 1 has no assignments; only account 0's destination is hit.
    let store = MemStore::with(test_config(0), &["tok-a", "tok-b"], vec![(0, "chan-1")]);
    let (factory, sent) = FakeGatewayFactory::new(GatewayMode::Ok);
    let controller = engine(store, factory);

    assert!(controller.start().await.success);
    sleep(Duration::from_millis(120)).await;
    controller.stop().await;

    assert!(sent.lock().unwrap().iter().all(|(dest, _)| dest == "chan-1"));
}
