use uuid::Uuid;

/// Delivery status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "webhook_status", rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Failed,
}

/// An outbound notification awaiting delivery to a merchant.
///
/// The payload is written once at enqueue time and never mutated; only the
/// delivery metadata (`status`, `attempt_count`, `next_attempt_at`, `error`)
/// changes. Redeliveries therefore carry byte-identical bodies with the same
/// event id.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WebhookOutboxEvent {
    pub id: Uuid,
    pub policy_id: String,
    pub chain_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub charge_id: Option<Uuid>,
    pub status: WebhookStatus,
    pub attempt_count: i32,
    pub next_attempt_at: time::OffsetDateTime,
    pub error: Option<String>,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

/// Data for enqueueing a notification.
///
/// The id is generated by the caller so it can be embedded in the payload
/// envelope before the row is written.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub id: Uuid,
    pub policy_id: String,
    pub chain_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub charge_id: Option<Uuid>,
}

/// Outbox counters for the status CLI/API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WebhookCounts {
    pub pending: i64,
    pub failed: i64,
}
