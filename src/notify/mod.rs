//! Rollout notifications
//!
//! Progress messages go to a chat-robot webhook. Notification is
//! best-effort: a missing robot id or secret turns it off, and delivery
//! failures are logged and dropped so they never change a rollout's outcome.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Default webhook base; the robot id is appended as the last path segment
pub const DEFAULT_WEBHOOK_BASE: &str = "https://open.feishu.cn/open-apis/bot/v2/hook";

/// Sends human-readable progress messages
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a text message; never fails
    async fn send_text(&self, text: &str);
}

/// Notifier that drops every message
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_text(&self, _text: &str) {}
}

/// Webhook request body
#[derive(Debug, Serialize, PartialEq)]
pub struct TextMessage {
    /// Unix seconds, as a string
    pub timestamp: String,
    /// Request signature
    pub sign: String,
    /// Always `text`
    pub msg_type: &'static str,
    /// Message content
    pub content: TextContent,
}

/// Text message content
#[derive(Debug, Serialize, PartialEq)]
pub struct TextContent {
    /// The message
    pub text: String,
}

/// Signature over a timestamp: HMAC-SHA256 keyed with `"<timestamp>\n<secret>"`
/// over an empty message, base64-encoded
///
/// This is the robot webhook's documented scheme. The variant that keys the
/// HMAC with the bare secret and signs `"<timestamp>\n<secret>"` as the
/// message yields a different value and is not used.
pub fn sign(timestamp: i64, secret: &str) -> Option<String> {
    let key = format!("{}\n{}", timestamp, secret);
    let mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Chat-robot webhook notifier
#[derive(Clone, Debug)]
pub struct FeishuNotifier {
    client: reqwest::Client,
    base_url: String,
    robot_id: Option<String>,
    secret: Option<String>,
}

impl FeishuNotifier {
    /// Create a notifier; empty credentials disable it
    pub fn new(robot_id: Option<String>, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: DEFAULT_WEBHOOK_BASE.to_string(),
            robot_id: robot_id.filter(|s| !s.is_empty()),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Override the webhook base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether messages will be sent at all
    pub fn is_configured(&self) -> bool {
        self.robot_id.is_some() && self.secret.is_some()
    }

    /// Signed request body for a message
    pub fn message(text: &str, timestamp: i64, secret: &str) -> Option<TextMessage> {
        Some(TextMessage {
            timestamp: timestamp.to_string(),
            sign: sign(timestamp, secret)?,
            msg_type: "text",
            content: TextContent {
                text: text.to_string(),
            },
        })
    }

    async fn deliver(&self, url: &str, body: &TextMessage) -> std::result::Result<(), String> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("webhook returned {}: {}", status, text));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for FeishuNotifier {
    async fn send_text(&self, text: &str) {
        let (Some(robot_id), Some(secret)) = (&self.robot_id, &self.secret) else {
            return;
        };

        let timestamp = chrono::Utc::now().timestamp();
        let Some(body) = Self::message(text, timestamp, secret) else {
            warn!("could not sign notification");
            return;
        };

        let url = format!("{}/{}", self.base_url, robot_id);
        match self.deliver(&url, &body).await {
            Ok(()) => debug!("notification sent"),
            Err(e) => warn!(error = %e, "notification failed"),
        }
    }
}
