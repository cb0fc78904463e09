//! Webhook-backed notification channel.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, warn};
use vigil_broker::Notifier;

/// Logs every alert at warn level and, when configured, POSTs
/// `{title, message}` to a webhook. Delivery is best-effort.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Option<String>,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook: sanitize_webhook(webhook),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) {
        warn!(message = text, "alert raised");
        let Some(url) = self.webhook.as_ref() else {
            return;
        };
        let payload = json!({ "title": "vigil heartbeat", "message": text });
        if let Err(err) = self.client.post(url).json(&payload).send().await {
            error!(error = %err, "failed to send alert webhook");
        }
    }
}

/// Treat blank webhook strings as unset.
pub fn sanitize_webhook(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
