// File: src/tasks/keepalive.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use herald_common::models::log::LogLevel;

use crate::stats::LogBuffer;
use crate::worker::AccountWorker;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps accounts visibly online between cycles by heartbeating each
/// eligible worker. Presence failures are logged and otherwise ignored;
/// they never affect the send path.
pub fn spawn_keepalive_task(
    workers: Vec<Arc<AccountWorker>>,
    mut shutdown_rx: watch::Receiver<bool>,
    logs: Arc<LogBuffer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(KEEPALIVE_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            for worker in workers.iter().filter(|w| w.is_eligible()) {
                match worker.heartbeat().await {
                    Ok(()) => debug!("presence heartbeat ok for account {}", worker.masked()),
                    Err(e) => logs.append(
                        LogLevel::Warn,
                        format!(
                            "presence heartbeat failed for account {}: {e}",
                            worker.masked()
                        ),
                    ),
                }
            }
        }
    })
}
