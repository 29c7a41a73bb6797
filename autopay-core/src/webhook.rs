//! Webhook dispatcher: delivers outbox events to merchant endpoints.
//!
//! Delivery is at-least-once. The stored payload is posted verbatim on
//! every attempt, so redeliveries carry the same event id and receivers can
//! deduplicate. A crash between the POST and mark-delivered simply delivers
//! again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;

use autopay_sdk::signature;

use crate::executor::BackoffPreset;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How a merchant endpoint is reached. Production uses [`HttpTransport`];
/// tests script responses.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST a signed body, returning the HTTP status code. Timeouts and
    /// connection errors are `Err` and count as failed attempts.
    async fn post(&self, url: &str, body: &[u8], signature: &str) -> Result<u16, String>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, url: &str, body: &[u8], signature: &str) -> Result<u16, String> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(signature::SIGNATURE_HEADER, signature)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub backoff: BackoffPreset,
}

impl WebhookSettings {
    /// Default delivery schedule: 3 attempts at 10s / 1m / 10m.
    pub fn default_backoff() -> BackoffPreset {
        BackoffPreset::Custom {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(600),
            ],
        }
    }
}

pub struct WebhookDispatcher {
    store: Arc<dyn Store>,
    transport: Arc<dyn WebhookTransport>,
    settings: WebhookSettings,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn WebhookTransport>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
        }
    }

    /// Deliver due outbox events, returning how many were delivered.
    pub async fn run_once(&self, now: OffsetDateTime) -> Result<u64, DispatcherError> {
        let due = self
            .store
            .due_webhooks(now, self.settings.batch_size)
            .await?;
        let mut delivered = 0u64;

        for event in due {
            let merchant = match self.resolve_merchant(event.chain_id, &event.policy_id).await? {
                Some(merchant) => merchant,
                None => {
                    // Nothing to deliver to and nothing a retry could fix.
                    self.store
                        .mark_webhook_failed(
                            event.id,
                            event.attempt_count,
                            "no merchant registered",
                        )
                        .await?;
                    tracing::warn!(
                        event_id = %event.id,
                        policy_id = %event.policy_id,
                        "dropping webhook for unregistered merchant"
                    );
                    continue;
                }
            };

            let body = serde_json::to_vec(&event.payload)?;
            let signed = signature::sign(merchant.secret.as_bytes(), &body);

            let result = self
                .transport
                .post(&merchant.webhook_url, &body, &signed)
                .await;
            match result {
                Ok(status) if (200..300).contains(&status) => {
                    self.store.mark_webhook_delivered(event.id).await?;
                    delivered += 1;
                    tracing::debug!(event_id = %event.id, status, "webhook delivered");
                }
                outcome => {
                    let error = match outcome {
                        Ok(status) => format!("unexpected status {status}"),
                        Err(e) => e,
                    };
                    let attempt = event.attempt_count + 1;
                    if (attempt as u32) < self.settings.backoff.max_attempts() {
                        let next = now + self.settings.backoff.delay_for(attempt as u32);
                        self.store
                            .reschedule_webhook(event.id, attempt, next, &error)
                            .await?;
                        tracing::warn!(
                            event_id = %event.id,
                            attempt,
                            error,
                            "webhook delivery failed, rescheduled"
                        );
                    } else {
                        self.store
                            .mark_webhook_failed(event.id, attempt, &error)
                            .await?;
                        tracing::error!(
                            event_id = %event.id,
                            attempt,
                            error,
                            "webhook delivery failed permanently"
                        );
                    }
                }
            }
        }
        Ok(delivered)
    }

    async fn resolve_merchant(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<crate::entities::Merchant>, DispatcherError> {
        let Some(policy) = self.store.get_policy(chain_id, policy_id).await? else {
            return Ok(None);
        };
        Ok(self.store.get_merchant(chain_id, &policy.merchant).await?)
    }

    /// Poll until the shutdown signal flips. A failed pass is logged and
    /// retried on the next tick.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("webhook dispatcher loop started");
        loop {
            if let Err(error) = self.run_once(OffsetDateTime::now_utc()).await {
                tracing::error!(%error, "webhook dispatch pass failed");
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        tracing::info!("webhook dispatcher loop stopped");
    }
}
