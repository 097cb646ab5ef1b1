//! Incoming-webhook announcement channels (Slack, Discord, Mattermost and friends).

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::broadcast::AnnouncementChannel;
use super::http::{check, transport_error, USER_AGENT};
use crate::errors::AdapterError;

/// Posts the announcement as JSON to a webhook URL.
///
/// The body carries the message under both `text` and `content` so one
/// payload is accepted by the common chat webhook flavours.
#[derive(Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for WebhookChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Webhook URLs embed their secret.
        f.debug_struct("WebhookChannel").field("name", &self.name).finish_non_exhaustive()
    }
}

impl WebhookChannel {
    /// Creates a channel named `name` posting to `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AnnouncementChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, message: &str) -> Result<Option<String>, AdapterError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .json(&json!({ "text": message, "content": message }))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let response = check(response, &self.name).await?;
        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        Ok((!body.is_empty() && body.len() <= 200).then(|| body.to_string()))
    }
}
