// File: src/routes.rs
//
// REST boundary consumed by the operator dashboard. Everything lives
// under /api; credentials are write-only (the count is the only thing
// ever reported back).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use herald_common::models::config::EngineConfig;
use herald_common::models::destination::DestinationRecord;
use herald_common::models::proxy::ProxySpec;
use herald_common::traits::repository_traits::{
    ConfigRepository, CredentialRepository, DestinationRepository, ProxyRepository,
};
use herald_common::Error;
use herald_core::controller::{RunController, RunState};

use crate::store::JsonFileStore;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RunController>,
    pub store: Arc<JsonFileStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/stats", get(get_stats))
        .route("/api/channels", get(list_channels))
        .route("/api/channels/add", post(add_channel))
        .route("/api/channels/remove", post(remove_channel))
        .route("/api/channels/cooldown", post(set_channel_cooldown))
        .route("/api/tokens", get(get_tokens).post(replace_tokens))
        .route("/api/proxies", get(get_proxies).post(replace_proxies))
        .route("/api/advertiser/start", post(start_advertiser))
        .route("/api/advertiser/stop", post(stop_advertiser))
        .route("/api/advertiser/status", get(advertiser_status))
        .route("/api/logs", get(get_logs))
        .with_state(state)
}

/// Wraps engine errors into the `{success, message}` shape the dashboard
/// expects, with a status code matching the error class.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::ConfigInvalid(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "success": false, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Splits newline-delimited operator input; blank lines and `#` comments
/// are ignored.
fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

async fn get_config(State(state): State<AppState>) -> Result<Json<EngineConfig>, ApiError> {
    Ok(Json(state.store.get_config().await?))
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    advertisement_message: Option<String>,
    interval_minutes: Option<u64>,
    default_cooldown_minutes: Option<u64>,
    online_status: Option<String>,
    use_proxies: Option<bool>,
    keep_accounts_online: Option<bool>,
}

async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut config = state.store.get_config().await?;
    let previous = config.clone();

    if let Some(message) = update.advertisement_message {
        config.advertisement_message = message;
    }
    if let Some(interval) = update.interval_minutes {
        config.interval_minutes = interval;
    }
    if let Some(cooldown) = update.default_cooldown_minutes {
        config.default_cooldown_minutes = cooldown;
    }
    if let Some(status) = update.online_status {
        config.online_status = status
            .parse()
            .map_err(|e: String| Error::ConfigInvalid(e))?;
    }
    if let Some(use_proxies) = update.use_proxies {
        config.use_proxies = use_proxies;
    }
    if let Some(keep_online) = update.keep_accounts_online {
        config.keep_accounts_online = keep_online;
    }
    if config.interval_minutes == 0 {
        return Err(Error::ConfigInvalid("interval must be at least one minute".to_string()).into());
    }

    state.store.set_config(&config).await?;

    let running = state.controller.state() == RunState::Running;
    if running && config.advertisement_message != previous.advertisement_message {
        state.controller.update_message(&config.advertisement_message);
    }
    let structural_changed = config.interval_minutes != previous.interval_minutes
        || config.default_cooldown_minutes != previous.default_cooldown_minutes
        || config.online_status != previous.online_status
        || config.use_proxies != previous.use_proxies
        || config.keep_accounts_online != previous.keep_accounts_online;

    let message = if running && structural_changed {
        "configuration saved; structural changes apply on next start"
    } else {
        "configuration saved"
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.store.get_config().await?;
    let snapshot = state.controller.stats_snapshot();
    Ok(Json(json!({
        "total_sent": snapshot.total_sent,
        "attempts": snapshot.attempts,
        "active_accounts": snapshot.active_accounts,
        "total_destinations": snapshot.total_destinations,
        "uptime": snapshot.uptime_secs,
        "last_activity": snapshot.last_activity_at,
        "use_proxies": config.use_proxies,
        "keep_online": config.keep_accounts_online,
        "online_status": config.online_status,
    })))
}

async fn list_channels(
    State(state): State<AppState>,
) -> Result<Json<Vec<DestinationRecord>>, ApiError> {
    Ok(Json(state.store.list_destinations().await?))
}

#[derive(Debug, Deserialize)]
struct ChannelAdd {
    account_index: usize,
    channel_id: String,
    cooldown_minutes: Option<u64>,
}

async fn add_channel(
    State(state): State<AppState>,
    Json(body): Json<ChannelAdd>,
) -> Result<Json<Value>, ApiError> {
    if body.channel_id.trim().is_empty() {
        return Err(Error::ConfigInvalid("channel id is empty".to_string()).into());
    }
    state
        .store
        .add_destination(&DestinationRecord {
            account_index: body.account_index,
            channel_id: body.channel_id.trim().to_string(),
            cooldown_minutes: body.cooldown_minutes,
        })
        .await?;
    Ok(Json(json!({ "success": true, "message": "channel added" })))
}

#[derive(Debug, Deserialize)]
struct ChannelRemove {
    account_index: usize,
    channel_id: String,
}

async fn remove_channel(
    State(state): State<AppState>,
    Json(body): Json<ChannelRemove>,
) -> Result<Json<Value>, ApiError> {
    let removed = state
        .store
        .remove_destination(body.account_index, &body.channel_id)
        .await?;
    if !removed {
        return Err(Error::NotFound(format!("channel {} not tracked", body.channel_id)).into());
    }
    Ok(Json(json!({ "success": true, "message": "channel removed" })))
}

#[derive(Debug, Deserialize)]
struct ChannelCooldown {
    channel_id: String,
    cooldown_minutes: u64,
}

async fn set_channel_cooldown(
    State(state): State<AppState>,
    Json(body): Json<ChannelCooldown>,
) -> Result<Json<Value>, ApiError> {
    let matched = state
        .store
        .set_cooldown(&body.channel_id, body.cooldown_minutes)
        .await?;
    if !matched {
        return Err(Error::NotFound(format!("channel {} not tracked", body.channel_id)).into());
    }
    Ok(Json(json!({ "success": true, "message": "cooldown updated" })))
}

async fn get_tokens(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // Counts only; credential values never leave the engine.
    let count = state.store.credential_count().await?;
    Ok(Json(json!({ "count": count })))
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    tokens: String,
}

async fn replace_tokens(
    State(state): State<AppState>,
    Json(body): Json<TokenPayload>,
) -> Result<Json<Value>, ApiError> {
    let tokens = parse_list(&body.tokens);
    state.store.replace_credentials(&tokens).await?;
    Ok(Json(json!({ "success": true, "count": tokens.len() })))
}

async fn get_proxies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let proxies = state.store.list_proxies().await?;
    // Display form strips proxy credentials.
    let addresses: Vec<String> = proxies.iter().map(|p| p.to_string()).collect();
    Ok(Json(json!({ "count": addresses.len(), "proxies": addresses })))
}

#[derive(Debug, Deserialize)]
struct ProxyPayload {
    proxies: String,
}

async fn replace_proxies(
    State(state): State<AppState>,
    Json(body): Json<ProxyPayload>,
) -> Result<Json<Value>, ApiError> {
    let mut parsed = Vec::new();
    for line in parse_list(&body.proxies) {
        parsed.push(line.parse::<ProxySpec>()?);
    }
    state.store.replace_proxies(&parsed).await?;
    Ok(Json(json!({ "success": true, "count": parsed.len() })))
}

async fn start_advertiser(State(state): State<AppState>) -> Json<Value> {
    let outcome = state.controller.start().await;
    Json(json!({ "success": outcome.success, "message": outcome.message }))
}

async fn stop_advertiser(State(state): State<AppState>) -> Json<Value> {
    let outcome = state.controller.stop().await;
    Json(json!({ "success": outcome.success, "message": outcome.message }))
}

async fn advertiser_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.controller.status();
    Json(json!({
        "running": status.running,
        "active_tokens": status.active_tokens,
        "channels_tracked": status.channels_tracked,
    }))
}

async fn get_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "logs": state.controller.log_entries() }))
}
