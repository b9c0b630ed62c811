//! # Staff Notification System
//!
//! Delivers dispute and workflow alerts to staff contacts. The engine sees
//! only the [`Notifier`] trait; the webhook implementation posts to a
//! configured internal endpoint, and the logging implementation stands in
//! when none is configured. Notification failures are reported to callers
//! but never escalate into workflow failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::DisputeConfig;

/// Staff-facing notification sender.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification to a single recipient contact.
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Errors surfaced by notifiers.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification endpoint rejected the request: {0}")]
    Rejected(String),
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("invalid webhook URL")]
    InvalidWebhook,
}

/// Build the notifier matching the configuration: webhook when an endpoint
/// is configured, log-only otherwise.
pub fn notifier_from_config(config: &DisputeConfig) -> Arc<dyn Notifier> {
    match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            config.webhook_timeout_seconds,
        )),
        None => Arc::new(LogNotifier),
    }
}

/// Posts notifications to an internal staff webhook.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    /// Create a new webhook notifier
    pub fn new(webhook_url: String, timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            webhook_url,
        }
    }

    /// Validate webhook URL according to security and reliability constraints:
    /// - Must be HTTPS
    /// - Length must be reasonable (<= 2048 chars)
    fn validate_webhook_url(&self) -> bool {
        if self.webhook_url.len() > 2048 {
            warn!(length = self.webhook_url.len(), "Webhook URL exceeds maximum length");
            return false;
        }

        if !self.webhook_url.to_lowercase().starts_with("https://") {
            warn!("Rejected non-HTTPS webhook URL");
            return false;
        }

        true
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if !self.validate_webhook_url() {
            return Err(NotifyError::InvalidWebhook);
        }

        let payload = json!({
            "recipient": recipient,
            "subject": subject,
            "body": body,
        });

        // Retry with exponential backoff; the alert matters more than latency
        let max_retries = 3;
        let mut delay = Duration::from_secs(1);

        for attempt in 1..=max_retries {
            match self
                .client
                .post(&self.webhook_url)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    info!(recipient, attempt, "Notification delivered");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        recipient,
                        status = response.status().as_u16(),
                        attempt,
                        "Notification endpoint returned error status"
                    );

                    if attempt == max_retries {
                        return Err(NotifyError::Rejected(response.status().to_string()));
                    }
                }
                Err(err) => {
                    error!(recipient, attempt, error = %err, "Notification request failed");

                    if attempt == max_retries {
                        return Err(NotifyError::Request(err.to_string()));
                    }
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Err(NotifyError::Request("retries exhausted".to_string()))
    }
}

/// Logs notifications instead of delivering them (development profile).
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        info!(recipient, subject, body, "Notification (log only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        let result = notifier
            .notify("ops@example.com", "Lease disputed", "details")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_notifier_rejects_non_https() {
        let notifier = WebhookNotifier::new("http://insecure.example.com/hook".to_string(), 1);
        let result = notifier.notify("ops@example.com", "subject", "body").await;
        assert!(matches!(result, Err(NotifyError::InvalidWebhook)));
    }

    #[test]
    fn test_factory_selects_implementation() {
        let log_only = notifier_from_config(&DisputeConfig::default());
        // Trait objects carry no type info; exercising notify is enough
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(
            rt.block_on(log_only.notify("ops@example.com", "s", "b"))
                .is_ok()
        );
    }
}
