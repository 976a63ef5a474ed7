// File: herald-common/src/traits/repository_traits.rs
//
// Persistence boundary of the engine. The engine only *reads* these at
// start; the HTTP boundary is the only writer. What backs them (JSON
// file, database, ...) is an external choice.

use async_trait::async_trait;

use crate::error::Error;
use crate::models::config::EngineConfig;
use crate::models::destination::DestinationRecord;
use crate::models::proxy::ProxySpec;

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_config(&self) -> Result<EngineConfig, Error>;
    async fn set_config(&self, config: &EngineConfig) -> Result<(), Error>;
}

/// Credential values flow only into the engine; outward interfaces may
/// report the count but never the values themselves.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn list_credentials(&self) -> Result<Vec<String>, Error>;
    async fn credential_count(&self) -> Result<usize, Error>;
    /// Full-list replace semantics: the new list supersedes the old one.
    async fn replace_credentials(&self, credentials: &[String]) -> Result<(), Error>;
}

#[async_trait]
pub trait DestinationRepository: Send + Sync {
    async fn list_destinations(&self) -> Result<Vec<DestinationRecord>, Error>;
    async fn add_destination(&self, record: &DestinationRecord) -> Result<(), Error>;
    /// Returns false when no matching record existed.
    async fn remove_destination(&self, account_index: usize, channel_id: &str)
        -> Result<bool, Error>;
    /// Applies to every record for `channel_id`, regardless of account.
    async fn set_cooldown(&self, channel_id: &str, minutes: u64) -> Result<bool, Error>;
}

#[async_trait]
pub trait ProxyRepository: Send + Sync {
    async fn list_proxies(&self) -> Result<Vec<ProxySpec>, Error>;
    async fn replace_proxies(&self, proxies: &[ProxySpec]) -> Result<(), Error>;
}
