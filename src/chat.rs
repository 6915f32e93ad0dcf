use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::DeliveryError;
use crate::models::{ChatTarget, MessageSegment};

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Post a new message; returns its handle (`ts`).
    async fn post_message(&self, target: &ChatTarget, attachments: &[MessageSegment]) -> Result<String, DeliveryError>;
    async fn update_message(&self, target: &ChatTarget, ts: &str, attachments: &[MessageSegment]) -> Result<(), DeliveryError>;
    async fn delete_message(&self, target: &ChatTarget, ts: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// Web API client. The bot token travels with each [`ChatTarget`], so one
/// client serves every course.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
}

impl SlackClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn call(&self, method: &str, token: &str, body: Value) -> Result<ApiResponse, DeliveryError> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport { method: method.to_string(), reason: e.to_string() })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status { method: method.to_string(), status: status.as_u16() });
        }
        // the platform reports application errors with 200 + `ok: false`
        let body = resp
            .bytes()
            .await
            .map_err(|e| DeliveryError::Transport { method: method.to_string(), reason: e.to_string() })?;
        let parsed: ApiResponse = serde_json::from_slice(&body)
            .map_err(|e| DeliveryError::Shape { method: method.to_string(), reason: e.to_string() })?;
        if !parsed.ok {
            return Err(DeliveryError::NotOk {
                method: method.to_string(),
                error: parsed.error.unwrap_or_else(|| "unknown".into()),
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ChatApi for SlackClient {
    async fn post_message(&self, target: &ChatTarget, attachments: &[MessageSegment]) -> Result<String, DeliveryError> {
        let method = "chat.postMessage";
        let body = json!({ "channel": target.channel, "username": target.username, "attachments": attachments });
        self.call(method, &target.token, body)
            .await?
            .ts
            .ok_or_else(|| DeliveryError::MissingHandle { method: method.to_string() })
    }

    async fn update_message(&self, target: &ChatTarget, ts: &str, attachments: &[MessageSegment]) -> Result<(), DeliveryError> {
        let body = json!({ "channel": target.channel, "ts": ts, "attachments": attachments });
        self.call("chat.update", &target.token, body).await.map(|_| ())
    }

    async fn delete_message(&self, target: &ChatTarget, ts: &str) -> Result<(), DeliveryError> {
        let body = json!({ "channel": target.channel, "ts": ts });
        self.call("chat.delete", &target.token, body).await.map(|_| ())
    }
}
