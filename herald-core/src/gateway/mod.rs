// File: src/gateway/mod.rs

use async_trait::async_trait;

use herald_common::models::config::OnlineStatus;
use herald_common::models::proxy::ProxySpec;

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error(String),
}

/// Opaque "send message to destination D as account A" capability. The
/// destination platform's wire protocol stays behind this seam; errors
/// come back classified (`Unauthorized`, `PermissionDenied`,
/// `RateLimited`, ...) so the worker can decide retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(&mut self) -> Result<(), Error>;
    async fn disconnect(&mut self) -> Result<(), Error>;
    async fn send_message(&self, destination: &str, content: &str) -> Result<(), Error>;
    async fn set_presence(&self, status: OnlineStatus) -> Result<(), Error>;
    async fn heartbeat(&self) -> Result<(), Error>;
}

/// Builds one gateway per credential. The server picks the transport;
/// tests substitute scripted fakes.
pub trait GatewayFactory: Send + Sync {
    fn build(&self, credential: &str, proxy: Option<&ProxySpec>) -> Box<dyn Gateway>;
}

pub mod rest;

pub use rest::{RestGateway, RestGatewayFactory};
