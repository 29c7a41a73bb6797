//! Durable relational state.
//!
//! The [`Store`] is the sole owner of persisted state; the indexer, executor
//! and webhook dispatcher hold transient working sets re-derived from it each
//! iteration. It is a trait so components receive an explicit dependency
//! ([`PgStore`] in production, an in-memory double in tests) instead of a
//! process-global pool.

pub mod pg;

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::{
    ChainStatus, Charge, Merchant, NewCharge, NewPolicy, NewWebhookEvent, Policy, WebhookCounts,
    WebhookOutboxEvent,
};

pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- Policies -----------------------------------------------------------

    /// Insert a policy observed via `PolicyCreated`.
    ///
    /// Idempotent on (chain_id, policy_id): returns `false` without touching
    /// the row if it already exists, guarding against re-indexing.
    async fn insert_policy_if_absent(&self, policy: NewPolicy) -> Result<bool, StoreError>;

    async fn get_policy(&self, chain_id: i64, policy_id: &str)
    -> Result<Option<Policy>, StoreError>;

    async fn list_policies(&self, chain_id: i64) -> Result<Vec<Policy>, StoreError>;

    /// Policies due for charging at `now`, oldest due first, at most `limit`.
    ///
    /// Excludes policies whose pending charge is backing off
    /// (`next_attempt_at` in the future), which also enforces the
    /// one-pending-charge-per-policy invariant without row locking.
    async fn due_policies(
        &self,
        chain_id: i64,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Policy>, StoreError>;

    /// Mark a policy inactive (revoked or cancelled), recording its end time.
    async fn deactivate_policy(
        &self,
        chain_id: i64,
        policy_id: &str,
        end_time: i64,
    ) -> Result<(), StoreError>;

    /// Apply a successful charge to the policy aggregates.
    ///
    /// Guarded by the (block, log index) position: returns `false` without
    /// mutating if the position is not strictly past the last applied one,
    /// so the indexer replaying a range and the executor writing at charge
    /// time never double-count `total_spent`.
    #[allow(clippy::too_many_arguments)]
    async fn apply_charge_succeeded(
        &self,
        chain_id: i64,
        policy_id: &str,
        amount: Decimal,
        charged_at: i64,
        block_number: i64,
        log_index: i64,
    ) -> Result<bool, StoreError>;

    /// Bookkeeping for an observed `ChargeFailed` event; does not change the
    /// policy lifecycle.
    async fn record_charge_failed_event(
        &self,
        chain_id: i64,
        policy_id: &str,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Increment the off-chain consecutive-failure counter, returning the
    /// new value.
    async fn increment_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<i32, StoreError>;

    async fn reset_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<(), StoreError>;

    /// Flag a policy for operator attention after exhausted retries.
    async fn mark_policy_needs_attention(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<(), StoreError>;

    // -- Charges ------------------------------------------------------------

    async fn create_charge(&self, charge: NewCharge) -> Result<Uuid, StoreError>;

    async fn find_pending_charge(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<Charge>, StoreError>;

    async fn mark_charge_succeeded(
        &self,
        id: Uuid,
        tx_hash: &str,
        protocol_fee: Decimal,
    ) -> Result<(), StoreError>;

    async fn mark_charge_failed(
        &self,
        id: Uuid,
        error: &str,
        attempt_count: i32,
    ) -> Result<(), StoreError>;

    /// Keep a charge pending after a retryable hard failure, recording the
    /// attempt count and when the executor may try again.
    async fn schedule_charge_retry(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError>;

    // -- Chain cursor -------------------------------------------------------

    async fn cursor(&self, chain_id: i64) -> Result<Option<i64>, StoreError>;

    /// Advance the cursor. Monotonic: a smaller value than the stored one is
    /// ignored. Called only after a batch's event writes have landed.
    async fn set_cursor(&self, chain_id: i64, last_block: i64) -> Result<(), StoreError>;

    // -- Webhook outbox -----------------------------------------------------

    async fn enqueue_webhook(&self, event: NewWebhookEvent) -> Result<(), StoreError>;

    async fn due_webhooks(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WebhookOutboxEvent>, StoreError>;

    async fn mark_webhook_delivered(&self, id: Uuid) -> Result<(), StoreError>;

    async fn reschedule_webhook(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn mark_webhook_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> Result<(), StoreError>;

    // -- Merchants ----------------------------------------------------------

    async fn get_merchant(
        &self,
        chain_id: i64,
        address: &str,
    ) -> Result<Option<Merchant>, StoreError>;

    async fn register_merchant(&self, merchant: Merchant) -> Result<(), StoreError>;

    // -- Status -------------------------------------------------------------

    async fn chain_status(&self, chain_id: i64) -> Result<ChainStatus, StoreError>;

    async fn webhook_counts(&self) -> Result<WebhookCounts, StoreError>;
}
