use rust_decimal::Decimal;
use uuid::Uuid;

/// Charge status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "charge_status", rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
}

/// One attempt to collect a payment for a policy.
///
/// A charge transitions `pending -> {succeeded | failed}` exactly once.
/// Retryable hard failures keep the row pending and bump `attempt_count`
/// with a `next_attempt_at` backoff; the due-query skips the policy until
/// that time passes.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Charge {
    pub id: Uuid,
    pub policy_id: String,
    pub chain_id: i64,
    pub amount: Decimal,
    pub attempt_count: i32,
    pub status: ChargeStatus,
    pub tx_hash: Option<String>,
    pub protocol_fee: Option<Decimal>,
    pub error: Option<String>,
    pub next_attempt_at: Option<time::OffsetDateTime>,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

/// Data for inserting a charge immediately before submission.
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub id: Uuid,
    pub policy_id: String,
    pub chain_id: i64,
    pub amount: Decimal,
}

impl NewCharge {
    pub fn for_policy(policy: &super::Policy) -> Self {
        Self {
            id: Uuid::now_v7(),
            policy_id: policy.policy_id.clone(),
            chain_id: policy.chain_id,
            amount: policy.charge_amount,
        }
    }
}
