//! Charge executor: selects due policies and submits charges.
//!
//! Every confirmed or failed attempt lands in exactly one of three buckets:
//! success (funds moved), soft failure (tx confirmed, contract declined) or
//! hard failure (revert / submission error, classified for retry). Each
//! bucket owns its policy updates and webhook enqueues, so no attempt
//! produces zero or two notifications.
//!
//! Due-selection and submission are not wrapped in a locking transaction;
//! the executor must run as a single active instance per database.

pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use autopay_sdk::events::{
    ChargeFailedData, ChargeSucceededData, EventKind, PolicyCancelledData, WebhookPayload,
};

use crate::chain::{ChainClient, ChainSettings, ChargeOutcome};
use crate::entities::{NewCharge, NewWebhookEvent, Policy, encode_b256};
use crate::store::{Store, StoreError};

pub use retry::{BackoffPreset, is_retryable};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown chain {0}")]
    UnknownChain(i64),

    #[error("policy {0} not found")]
    PolicyNotFound(String),
}

/// One chain the executor charges on.
pub struct ExecutorChain {
    pub settings: ChainSettings,
    pub client: Arc<dyn ChainClient>,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub run_interval: Duration,
    pub batch_size: i64,
    pub backoff: BackoffPreset,
    /// Consecutive soft failures that trigger on-chain cancellation.
    pub failure_threshold: i32,
}

/// What one executor pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorOutcome {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Terminal classification of a single charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeResult {
    Succeeded { tx_hash: String },
    SoftFailed { reason: String },
    RetryScheduled { attempt: i32, next_attempt_at: OffsetDateTime },
    Failed { error: String },
}

pub struct Executor {
    store: Arc<dyn Store>,
    chains: Vec<ExecutorChain>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(store: Arc<dyn Store>, chains: Vec<ExecutorChain>, settings: ExecutorSettings) -> Self {
        Self {
            store,
            chains,
            settings,
        }
    }

    /// Charge every due policy across all chains, up to the batch size per
    /// chain. Store failures abort the pass; chain failures are absorbed
    /// into the per-policy buckets.
    pub async fn run_once(&self, now: OffsetDateTime) -> Result<ExecutorOutcome, ExecutorError> {
        let mut outcome = ExecutorOutcome::default();
        for chain in &self.chains {
            let due = self
                .store
                .due_policies(chain.settings.chain_id, now, self.settings.batch_size)
                .await?;
            for policy in due {
                let result = self.charge_one(chain, &policy, now).await?;
                outcome.processed += 1;
                match result {
                    ChargeResult::Succeeded { .. } => outcome.succeeded += 1,
                    ChargeResult::SoftFailed { .. } | ChargeResult::Failed { .. } => {
                        outcome.failed += 1
                    }
                    ChargeResult::RetryScheduled { .. } => {}
                }
            }
        }
        Ok(outcome)
    }

    /// Charge one policy immediately, bypassing due-selection (CLI path).
    pub async fn charge_policy_by_id(
        &self,
        chain_id: i64,
        policy_id: &str,
        now: OffsetDateTime,
    ) -> Result<ChargeResult, ExecutorError> {
        let chain = self
            .chains
            .iter()
            .find(|c| c.settings.chain_id == chain_id)
            .ok_or(ExecutorError::UnknownChain(chain_id))?;
        let policy = self
            .store
            .get_policy(chain_id, policy_id)
            .await?
            .ok_or_else(|| ExecutorError::PolicyNotFound(policy_id.to_string()))?;
        self.charge_one(chain, &policy, now).await
    }

    async fn charge_one(
        &self,
        chain: &ExecutorChain,
        policy: &Policy,
        now: OffsetDateTime,
    ) -> Result<ChargeResult, ExecutorError> {
        let chain_id = chain.settings.chain_id;

        // Reuse the pending charge left by a retryable hard failure so the
        // attempt counter carries across passes.
        let (charge_id, prior_attempts) = match self
            .store
            .find_pending_charge(chain_id, &policy.policy_id)
            .await?
        {
            Some(charge) => (charge.id, charge.attempt_count),
            None => {
                let id = self
                    .store
                    .create_charge(NewCharge::for_policy(policy))
                    .await?;
                (id, 0)
            }
        };
        let attempt = prior_attempts + 1;

        let policy_key: B256 = match policy.policy_id.parse() {
            Ok(key) => key,
            Err(_) => {
                let error = format!("malformed policy id {}", policy.policy_id);
                return self
                    .fail_terminally(policy, charge_id, attempt, &error, now)
                    .await;
            }
        };

        match chain.client.charge(policy_key).await {
            Ok(receipt) => match receipt.outcome {
                ChargeOutcome::Applied {
                    amount,
                    protocol_fee,
                    log_index,
                } => {
                    let tx_hash = encode_b256(receipt.tx_hash);
                    let amount = crate::entities::u256_to_decimal(amount)
                        .unwrap_or(policy.charge_amount);
                    let protocol_fee =
                        crate::entities::u256_to_decimal(protocol_fee).unwrap_or_default();

                    self.store
                        .mark_charge_succeeded(charge_id, &tx_hash, protocol_fee)
                        .await?;
                    // Recording the receipt's position here makes the
                    // indexer's later pass over the same event a no-op.
                    self.store
                        .apply_charge_succeeded(
                            chain_id,
                            &policy.policy_id,
                            amount,
                            now.unix_timestamp(),
                            receipt.block_number as i64,
                            log_index as i64,
                        )
                        .await?;

                    self.enqueue_event(
                        policy,
                        EventKind::ChargeSucceeded,
                        serde_json::to_value(ChargeSucceededData {
                            policy_id: policy.policy_id.clone(),
                            chain_id,
                            payer: policy.payer.clone(),
                            merchant: policy.merchant.clone(),
                            amount: amount.to_string(),
                            protocol_fee: protocol_fee.to_string(),
                            tx_hash: tx_hash.clone(),
                        })?,
                        Some(charge_id),
                        now,
                    )
                    .await?;

                    tracing::info!(chain_id, policy_id = %policy.policy_id, %tx_hash, "charge succeeded");
                    Ok(ChargeResult::Succeeded { tx_hash })
                }
                ChargeOutcome::Declined { reason } => {
                    self.soft_failure(chain, policy, charge_id, attempt, &reason, receipt.tx_hash, now)
                        .await
                }
            },
            Err(error) => {
                self.hard_failure(policy, charge_id, attempt, &error.to_string(), now)
                    .await
            }
        }
    }

    /// Confirmed transaction, contract declined the charge. Counts toward
    /// the consecutive-failure threshold; at the threshold the policy is
    /// cancelled on chain.
    #[allow(clippy::too_many_arguments)]
    async fn soft_failure(
        &self,
        chain: &ExecutorChain,
        policy: &Policy,
        charge_id: Uuid,
        attempt: i32,
        reason: &str,
        tx_hash: B256,
        now: OffsetDateTime,
    ) -> Result<ChargeResult, ExecutorError> {
        let chain_id = chain.settings.chain_id;
        self.store
            .mark_charge_failed(charge_id, reason, attempt)
            .await?;
        let failures = self
            .store
            .increment_consecutive_failures(chain_id, &policy.policy_id, reason)
            .await?;

        self.enqueue_event(
            policy,
            EventKind::ChargeFailed,
            serde_json::to_value(ChargeFailedData {
                policy_id: policy.policy_id.clone(),
                chain_id,
                payer: policy.payer.clone(),
                merchant: policy.merchant.clone(),
                reason: reason.to_string(),
                tx_hash: Some(encode_b256(tx_hash)),
            })?,
            Some(charge_id),
            now,
        )
        .await?;

        tracing::warn!(
            chain_id,
            policy_id = %policy.policy_id,
            failures,
            reason,
            "charge declined by contract"
        );

        if failures >= self.settings.failure_threshold {
            match policy.policy_id.parse::<B256>() {
                Ok(key) => match chain.client.cancel_failed_policy(key).await {
                    Ok(cancel_tx) => {
                        // Deactivating here (not waiting for the indexer)
                        // keeps the cancellation webhook single-shot: the
                        // policy drops out of due-selection immediately.
                        self.store
                            .deactivate_policy(chain_id, &policy.policy_id, now.unix_timestamp())
                            .await?;
                        self.enqueue_event(
                            policy,
                            EventKind::PolicyCancelledByFailure,
                            serde_json::to_value(PolicyCancelledData {
                                policy_id: policy.policy_id.clone(),
                                chain_id,
                                payer: policy.payer.clone(),
                                merchant: policy.merchant.clone(),
                                consecutive_failures: failures,
                                tx_hash: encode_b256(cancel_tx),
                            })?,
                            None,
                            now,
                        )
                        .await?;
                        tracing::warn!(
                            chain_id,
                            policy_id = %policy.policy_id,
                            "policy cancelled after repeated failures"
                        );
                    }
                    Err(error) => {
                        // The policy stays active; the next soft failure
                        // crosses the threshold again and retries the cancel.
                        tracing::error!(
                            chain_id,
                            policy_id = %policy.policy_id,
                            %error,
                            "cancelFailedPolicy submission failed"
                        );
                    }
                },
                Err(_) => {
                    tracing::error!(chain_id, policy_id = %policy.policy_id, "malformed policy id");
                }
            }
        }

        Ok(ChargeResult::SoftFailed {
            reason: reason.to_string(),
        })
    }

    /// Revert or submission error. Retryable causes stay pending on a
    /// backoff; the rest fail the charge and flag the policy.
    async fn hard_failure(
        &self,
        policy: &Policy,
        charge_id: Uuid,
        attempt: i32,
        error: &str,
        now: OffsetDateTime,
    ) -> Result<ChargeResult, ExecutorError> {
        let attempts_remain = (attempt as u32) < self.settings.backoff.max_attempts();
        if is_retryable(error) && attempts_remain {
            let delay = self.settings.backoff.delay_for(attempt as u32);
            let next_attempt_at = now + delay;
            self.store
                .schedule_charge_retry(charge_id, attempt, next_attempt_at, error)
                .await?;
            tracing::warn!(
                chain_id = policy.chain_id,
                policy_id = %policy.policy_id,
                attempt,
                delay_secs = delay.as_secs(),
                error,
                "charge failed, retry scheduled"
            );
            return Ok(ChargeResult::RetryScheduled {
                attempt,
                next_attempt_at,
            });
        }
        self.fail_terminally(policy, charge_id, attempt, error, now)
            .await
    }

    async fn fail_terminally(
        &self,
        policy: &Policy,
        charge_id: Uuid,
        attempt: i32,
        error: &str,
        now: OffsetDateTime,
    ) -> Result<ChargeResult, ExecutorError> {
        self.store
            .mark_charge_failed(charge_id, error, attempt)
            .await?;
        self.store
            .mark_policy_needs_attention(policy.chain_id, &policy.policy_id, error)
            .await?;
        self.enqueue_event(
            policy,
            EventKind::ChargeFailed,
            serde_json::to_value(ChargeFailedData {
                policy_id: policy.policy_id.clone(),
                chain_id: policy.chain_id,
                payer: policy.payer.clone(),
                merchant: policy.merchant.clone(),
                reason: error.to_string(),
                tx_hash: None,
            })?,
            Some(charge_id),
            now,
        )
        .await?;
        tracing::error!(
            chain_id = policy.chain_id,
            policy_id = %policy.policy_id,
            attempt,
            error,
            "charge failed terminally"
        );
        Ok(ChargeResult::Failed {
            error: error.to_string(),
        })
    }

    async fn enqueue_event(
        &self,
        policy: &Policy,
        kind: EventKind,
        data: serde_json::Value,
        charge_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> Result<(), ExecutorError> {
        let id = Uuid::now_v7();
        let payload = serde_json::to_value(WebhookPayload {
            id,
            event: kind,
            timestamp: now,
            data,
        })?;
        self.store
            .enqueue_webhook(NewWebhookEvent {
                id,
                policy_id: policy.policy_id.clone(),
                chain_id: policy.chain_id,
                event_type: kind.as_str().to_string(),
                payload,
                charge_id,
            })
            .await?;
        Ok(())
    }

    /// Poll until the shutdown signal flips. A failed pass is logged and
    /// retried on the next tick.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("executor loop started");
        loop {
            if let Err(error) = self.run_once(OffsetDateTime::now_utc()).await {
                tracing::error!(%error, "executor pass failed");
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.run_interval) => {}
            }
        }
        tracing::info!("executor loop stopped");
    }
}
