// File: src/gateway/rest.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use herald_common::models::config::OnlineStatus;
use herald_common::models::proxy::ProxySpec;

use crate::Error;

use super::{ConnectionStatus, Gateway, GatewayFactory};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Default `Gateway` implementation: a thin adapter over the platform's
/// REST message endpoint. `connect` builds the HTTP client (optionally
/// through the account's proxy) and validates the credential with an
/// authenticated self-lookup; it performs no stateful session setup
/// beyond that.
pub struct RestGateway {
    api_base: String,
    token: String,
    proxy: Option<ProxySpec>,
    client: Option<Client>,
    status: ConnectionStatus,
}

impl RestGateway {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, proxy: Option<ProxySpec>) -> Self {
        let api_base = api_base.into();
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            proxy,
            client: None,
            status: ConnectionStatus::Disconnected,
        }
    }

    fn client(&self) -> Result<&Client, Error> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Gateway("gateway is not connected".to_string()))
    }

    fn build_client(&self) -> Result<Client, Error> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(spec) = &self.proxy {
            let mut proxy =
                reqwest::Proxy::all(spec.url()).map_err(|e| Error::Proxy(e.to_string()))?;
            if let (Some(user), Some(pass)) = (&spec.username, &spec.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }

    /// Maps an HTTP response onto the engine's error taxonomy.
    async fn classify(response: reqwest::Response, context: &str) -> Result<(), Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(Error::Unauthorized(format!(
                "credential rejected at {context}"
            ))),
            StatusCode::FORBIDDEN => Err(Error::PermissionDenied(format!(
                "not allowed to post to {context}"
            ))),
            StatusCode::TOO_MANY_REQUESTS => {
                let body = response.json::<Value>().await.unwrap_or(Value::Null);
                Err(Error::RateLimited {
                    retry_after: parse_retry_after(&body),
                })
            }
            other => Err(Error::Gateway(format!("status {other} from {context}"))),
        }
    }
}

/// Pulls the platform's `retry_after` hint (seconds, possibly fractional)
/// out of a 429 body, falling back to a small fixed wait.
pub(crate) fn parse_retry_after(body: &Value) -> Duration {
    body.get("retry_after")
        .and_then(Value::as_f64)
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl Gateway for RestGateway {
    async fn connect(&mut self) -> Result<(), Error> {
        if matches!(self.status, ConnectionStatus::Connected) {
            debug!("gateway already connected, skipping");
            return Ok(());
        }
        let client = self.build_client()?;
        let response = client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", &self.token)
            .send()
            .await?;
        Self::classify(response, "credential check").await?;

        self.client = Some(client);
        self.status = ConnectionStatus::Connected;
        info!(
            "gateway connected{}",
            if self.proxy.is_some() { " via proxy" } else { "" }
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.client = None;
        self.status = ConnectionStatus::Disconnected;
        Ok(())
    }

    async fn send_message(&self, destination: &str, content: &str) -> Result<(), Error> {
        let response = self
            .client()?
            .post(format!("{}/channels/{}/messages", self.api_base, destination))
            .header("Authorization", &self.token)
            .json(&json!({ "content": content }))
            .send()
            .await?;
        Self::classify(response, destination).await
    }

    async fn set_presence(&self, status: OnlineStatus) -> Result<(), Error> {
        let response = self
            .client()?
            .patch(format!("{}/users/@me/settings", self.api_base))
            .header("Authorization", &self.token)
            .json(&json!({ "status": status.to_string() }))
            .send()
            .await?;
        Self::classify(response, "presence update").await
    }

    async fn heartbeat(&self) -> Result<(), Error> {
        let response = self
            .client()?
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", &self.token)
            .send()
            .await?;
        Self::classify(response, "heartbeat").await
    }
}

pub struct RestGatewayFactory {
    api_base: String,
}

impl RestGatewayFactory {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

impl GatewayFactory for RestGatewayFactory {
    fn build(&self, credential: &str, proxy: Option<&ProxySpec>) -> Box<dyn Gateway> {
        Box::new(RestGateway::new(
            self.api_base.clone(),
            credential,
            proxy.cloned(),
        ))
    }
}
