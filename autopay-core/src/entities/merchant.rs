/// A merchant registration: where to deliver webhooks and the HMAC secret
/// to sign them with.
///
/// Webhooks for a policy are resolved policy -> merchant address -> this
/// row; a policy whose merchant never registered gets its notifications
/// marked permanently failed rather than retried.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Merchant {
    pub chain_id: i64,
    pub address: String,
    pub webhook_url: String,
    pub secret: String,
    pub created_at: time::OffsetDateTime,
}
