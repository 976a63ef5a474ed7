// File: src/store.rs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use herald_common::models::config::EngineConfig;
use herald_common::models::destination::DestinationRecord;
use herald_common::models::proxy::ProxySpec;
use herald_common::traits::repository_traits::{
    ConfigRepository, CredentialRepository, DestinationRepository, ProxyRepository,
};
use herald_common::Error;

/// Shape of the state file on disk. Destination cooldown *state*
/// (last-send times, claims) is runtime-only and never persisted; it
/// resets when the engine restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    config: EngineConfig,
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    destinations: Vec<DestinationRecord>,
    #[serde(default)]
    proxies: Vec<ProxySpec>,
}

/// Single-file JSON store backing all four repository traits. The HTTP
/// boundary is its only writer; the engine reads it at start.
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<PersistedState>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    async fn persist(&self) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(&*self.state.read())?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for JsonFileStore {
    async fn get_config(&self) -> Result<EngineConfig, Error> {
        Ok(self.state.read().config.clone())
    }

    async fn set_config(&self, config: &EngineConfig) -> Result<(), Error> {
        self.state.write().config = config.clone();
        self.persist().await
    }
}

#[async_trait]
impl CredentialRepository for JsonFileStore {
    async fn list_credentials(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read().tokens.clone())
    }

    async fn credential_count(&self) -> Result<usize, Error> {
        Ok(self.state.read().tokens.len())
    }

    async fn replace_credentials(&self, credentials: &[String]) -> Result<(), Error> {
        self.state.write().tokens = credentials.to_vec();
        self.persist().await
    }
}

#[async_trait]
impl DestinationRepository for JsonFileStore {
    async fn list_destinations(&self) -> Result<Vec<DestinationRecord>, Error> {
        Ok(self.state.read().destinations.clone())
    }

    async fn add_destination(&self, record: &DestinationRecord) -> Result<(), Error> {
        {
            let mut state = self.state.write();
            let exists = state.destinations.iter().any(|d| {
                d.account_index == record.account_index && d.channel_id == record.channel_id
            });
            if !exists {
                state.destinations.push(record.clone());
            }
        }
        self.persist().await
    }

    async fn remove_destination(
        &self,
        account_index: usize,
        channel_id: &str,
    ) -> Result<bool, Error> {
        let removed = {
            let mut state = self.state.write();
            let before = state.destinations.len();
            state
                .destinations
                .retain(|d| !(d.account_index == account_index && d.channel_id == channel_id));
            state.destinations.len() < before
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn set_cooldown(&self, channel_id: &str, minutes: u64) -> Result<bool, Error> {
        let matched = {
            let mut state = self.state.write();
            let mut matched = false;
            for record in state.destinations.iter_mut() {
                if record.channel_id == channel_id {
                    record.cooldown_minutes = Some(minutes);
                    matched = true;
                }
            }
            matched
        };
        if matched {
            self.persist().await?;
        }
        Ok(matched)
    }
}

#[async_trait]
impl ProxyRepository for JsonFileStore {
    async fn list_proxies(&self) -> Result<Vec<ProxySpec>, Error> {
        Ok(self.state.read().proxies.clone())
    }

    async fn replace_proxies(&self, proxies: &[ProxySpec]) -> Result<(), Error> {
        self.state.write().proxies = proxies.to_vec();
        self.persist().await
    }
}
