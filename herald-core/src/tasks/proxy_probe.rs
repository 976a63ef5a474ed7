// File: src/tasks/proxy_probe.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::proxy::ProxyPool;

pub const PROBE_INTERVAL: Duration = Duration::from_secs(300);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodically re-checks degraded proxies so a recovered proxy returns
/// to the assignable set without operator intervention.
pub fn spawn_proxy_probe_task(
    pool: Arc<ProxyPool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(PROBE_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            pool.probe(PROBE_TIMEOUT).await;
        }
    })
}
