//! Postgres-backed [`Store`].
//!
//! All idempotence guards live in the SQL itself (`ON CONFLICT DO NOTHING`,
//! position-guarded updates, `GREATEST` cursor writes) so concurrent writers
//! and crash-replays stay correct without application-side locking.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::{
    ChainStatus, Charge, ChargeStatus, Merchant, NewCharge, NewPolicy, NewWebhookEvent, Policy,
    WebhookCounts, WebhookOutboxEvent, WebhookStatus,
};

use super::{Store, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_policy_if_absent(&self, policy: NewPolicy) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO policies (
                policy_id, chain_id, payer, merchant,
                charge_amount, spending_cap, interval_seconds, metadata_url,
                last_event_block, last_event_log_index
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (chain_id, policy_id) DO NOTHING
            "#,
        )
        .bind(&policy.policy_id)
        .bind(policy.chain_id)
        .bind(&policy.payer)
        .bind(&policy.merchant)
        .bind(policy.charge_amount)
        .bind(policy.spending_cap)
        .bind(policy.interval_seconds)
        .bind(&policy.metadata_url)
        .bind(policy.created_block)
        .bind(policy.created_log_index)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_policy(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<Policy>, StoreError> {
        let policy = sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies WHERE chain_id = $1 AND policy_id = $2",
        )
        .bind(chain_id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(policy)
    }

    async fn list_policies(&self, chain_id: i64) -> Result<Vec<Policy>, StoreError> {
        let policies = sqlx::query_as::<_, Policy>(
            "SELECT * FROM policies WHERE chain_id = $1 ORDER BY created_at",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn due_policies(
        &self,
        chain_id: i64,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Policy>, StoreError> {
        let now_unix = now.unix_timestamp();
        let policies = sqlx::query_as::<_, Policy>(
            r#"
            SELECT p.* FROM policies p
            WHERE p.chain_id = $1
              AND p.active
              AND p.last_charged_at + p.interval_seconds <= $2
              AND (p.end_time = 0 OR p.end_time > $2)
              AND NOT EXISTS (
                  SELECT 1 FROM charges c
                  WHERE c.chain_id = p.chain_id
                    AND c.policy_id = p.policy_id
                    AND c.status = 'pending'
                    AND c.next_attempt_at IS NOT NULL
                    AND c.next_attempt_at > $3
              )
            ORDER BY p.last_charged_at + p.interval_seconds
            LIMIT $4
            "#,
        )
        .bind(chain_id)
        .bind(now_unix)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn deactivate_policy(
        &self,
        chain_id: i64,
        policy_id: &str,
        end_time: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE policies
            SET active = FALSE, end_time = $3, updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .bind(end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_charge_succeeded(
        &self,
        chain_id: i64,
        policy_id: &str,
        amount: Decimal,
        charged_at: i64,
        block_number: i64,
        log_index: i64,
    ) -> Result<bool, StoreError> {
        // The position guard makes this a no-op when the indexer replays an
        // event the executor already applied, and vice versa.
        let result = sqlx::query(
            r#"
            UPDATE policies
            SET total_spent = total_spent + $3,
                charge_count = charge_count + 1,
                last_charged_at = $4,
                consecutive_failures = 0,
                needs_attention = FALSE,
                last_error = NULL,
                last_event_block = $5,
                last_event_log_index = $6,
                updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
              AND (last_event_block, last_event_log_index) < ($5, $6)
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .bind(amount)
        .bind(charged_at)
        .bind(block_number)
        .bind(log_index)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_charge_failed_event(
        &self,
        chain_id: i64,
        policy_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE policies
            SET last_error = $3, updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<i32, StoreError> {
        let (failures,): (i32,) = sqlx::query_as(
            r#"
            UPDATE policies
            SET consecutive_failures = consecutive_failures + 1,
                last_error = $3,
                updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
            RETURNING consecutive_failures
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("policy"))?;
        Ok(failures)
    }

    async fn reset_consecutive_failures(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE policies
            SET consecutive_failures = 0,
                needs_attention = FALSE,
                last_error = NULL,
                updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_policy_needs_attention(
        &self,
        chain_id: i64,
        policy_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE policies
            SET needs_attention = TRUE, last_error = $3, updated_at = now()
            WHERE chain_id = $1 AND policy_id = $2
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_charge(&self, charge: NewCharge) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO charges (id, policy_id, chain_id, amount, status)
            VALUES ($1, $2, $3, $4, 'pending')
            "#,
        )
        .bind(charge.id)
        .bind(&charge.policy_id)
        .bind(charge.chain_id)
        .bind(charge.amount)
        .execute(&self.pool)
        .await?;
        Ok(charge.id)
    }

    async fn find_pending_charge(
        &self,
        chain_id: i64,
        policy_id: &str,
    ) -> Result<Option<Charge>, StoreError> {
        let charge = sqlx::query_as::<_, Charge>(
            r#"
            SELECT * FROM charges
            WHERE chain_id = $1 AND policy_id = $2 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(chain_id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(charge)
    }

    async fn mark_charge_succeeded(
        &self,
        id: Uuid,
        tx_hash: &str,
        protocol_fee: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE charges
            SET status = $2, tx_hash = $3, protocol_fee = $4,
                error = NULL, next_attempt_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ChargeStatus::Succeeded)
        .bind(tx_hash)
        .bind(protocol_fee)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_charge_failed(
        &self,
        id: Uuid,
        error: &str,
        attempt_count: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE charges
            SET status = $2, error = $3, attempt_count = $4,
                next_attempt_at = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ChargeStatus::Failed)
        .bind(error)
        .bind(attempt_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_charge_retry(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE charges
            SET attempt_count = $2, next_attempt_at = $3, error = $4, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cursor(&self, chain_id: i64) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM chain_cursors WHERE chain_id = $1")
                .bind(chain_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(b,)| b))
    }

    async fn set_cursor(&self, chain_id: i64, last_block: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_block)
            VALUES ($1, $2)
            ON CONFLICT (chain_id) DO UPDATE
            SET last_block = GREATEST(chain_cursors.last_block, EXCLUDED.last_block),
                updated_at = now()
            "#,
        )
        .bind(chain_id)
        .bind(last_block)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enqueue_webhook(&self, event: NewWebhookEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (id, policy_id, chain_id, event_type, payload, charge_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(&event.policy_id)
        .bind(event.chain_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.charge_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_webhooks(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WebhookOutboxEvent>, StoreError> {
        let events = sqlx::query_as::<_, WebhookOutboxEvent>(
            r#"
            SELECT * FROM webhook_events
            WHERE status = 'pending' AND next_attempt_at <= $1
            ORDER BY next_attempt_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn mark_webhook_delivered(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, error = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(WebhookStatus::Delivered)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule_webhook(
        &self,
        id: Uuid,
        attempt_count: i32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET attempt_count = $2, next_attempt_at = $3, error = $4, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_webhook_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, attempt_count = $3, error = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(WebhookStatus::Failed)
        .bind(attempt_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_merchant(
        &self,
        chain_id: i64,
        address: &str,
    ) -> Result<Option<Merchant>, StoreError> {
        let merchant = sqlx::query_as::<_, Merchant>(
            "SELECT * FROM merchants WHERE chain_id = $1 AND address = $2",
        )
        .bind(chain_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(merchant)
    }

    async fn register_merchant(&self, merchant: Merchant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO merchants (chain_id, address, webhook_url, secret)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id, address) DO UPDATE
            SET webhook_url = EXCLUDED.webhook_url, secret = EXCLUDED.secret
            "#,
        )
        .bind(merchant.chain_id)
        .bind(&merchant.address)
        .bind(&merchant.webhook_url)
        .bind(&merchant.secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chain_status(&self, chain_id: i64) -> Result<ChainStatus, StoreError> {
        let last_indexed_block = self.cursor(chain_id).await?;
        let (active_policies,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM policies WHERE chain_id = $1 AND active")
                .bind(chain_id)
                .fetch_one(&self.pool)
                .await?;
        let (pending_charges,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM charges WHERE chain_id = $1 AND status = 'pending'",
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChainStatus {
            chain_id,
            last_indexed_block,
            active_policies,
            pending_charges,
        })
    }

    async fn webhook_counts(&self) -> Result<WebhookCounts, StoreError> {
        let (pending,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM webhook_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let (failed,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM webhook_events WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        Ok(WebhookCounts { pending, failed })
    }
}
