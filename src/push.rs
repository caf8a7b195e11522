use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Channel prefix for per-recipient private channels.
pub const PRIVATE_CHANNEL_PREFIX: &str = "private-user-";
/// Event name carried on every new-listing push.
pub const NEW_NOTIFICATION_EVENT: &str = "new-notification";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("push endpoint returned HTTP {0}")]
    Status(u16),
}

/// Best-effort real-time delivery to a named channel.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn trigger(&self, channel: &str, event: &str, payload: Value) -> Result<(), PushError>;
}

/// REST-backed gateway. Configured from `PUSH_BASE_URL` and `PUSH_APP_KEY`.
#[derive(Debug, Clone)]
pub struct RestPushClient {
    base_url: String,
    app_key: String,
    http: Client,
}

impl RestPushClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PUSH_BASE_URL").ok()?;
        let app_key = std::env::var("PUSH_APP_KEY").ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key,
            http: build_client(),
        })
    }
}

#[async_trait]
impl PushGateway for RestPushClient {
    async fn trigger(&self, channel: &str, event: &str, payload: Value) -> Result<(), PushError> {
        let url = format!("{}/events", self.base_url);
        let body = json!({
            "channel": channel,
            "name": event,
            "data": payload,
        });
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.app_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| PushError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Gateway for deployments without a push backend: accepts every event and
/// leaves a trace-level breadcrumb.
#[derive(Debug, Clone, Default)]
pub struct NoopPush;

#[async_trait]
impl PushGateway for NoopPush {
    async fn trigger(&self, channel: &str, event: &str, _payload: Value) -> Result<(), PushError> {
        debug!(
            target = "autolist.notify",
            channel = channel,
            event = event,
            "push_skipped_no_gateway",
        );
        Ok(())
    }
}

fn build_client() -> Client {
    let timeout = std::env::var("PUSH_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    let connect = std::env::var("PUSH_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}
