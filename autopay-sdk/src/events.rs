//! Webhook payload types delivered to merchant endpoints.
//!
//! These are wire DTOs, kept separate from the relayer's database entities.
//! Every payload has the same envelope: `{id, event, timestamp, data}`.
//! The `id` is stable across redeliveries of the same event, so receivers
//! can deduplicate; `timestamp` is RFC 3339.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The kind of event a webhook notifies about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "charge.succeeded")]
    ChargeSucceeded,
    #[serde(rename = "charge.failed")]
    ChargeFailed,
    #[serde(rename = "policy.cancelled_by_failure")]
    PolicyCancelledByFailure,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChargeSucceeded => "charge.succeeded",
            EventKind::ChargeFailed => "charge.failed",
            EventKind::PolicyCancelledByFailure => "policy.cancelled_by_failure",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The webhook envelope.
///
/// `data` defaults to raw JSON so the relayer can forward stored payloads
/// verbatim; merchant code can re-parse with a typed `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload<T = serde_json::Value> {
    /// Stable event id, identical across redeliveries.
    pub id: Uuid,
    pub event: EventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub data: T,
}

/// Data for a `charge.succeeded` event.
///
/// Amounts are decimal strings in the token's smallest unit, matching the
/// on-chain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSucceededData {
    pub policy_id: String,
    pub chain_id: i64,
    pub payer: String,
    pub merchant: String,
    pub amount: String,
    pub protocol_fee: String,
    pub tx_hash: String,
}

/// Data for a `charge.failed` event.
///
/// `tx_hash` is present for soft failures (the transaction confirmed but the
/// contract declined the charge) and absent when the failure happened before
/// a transaction was mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeFailedData {
    pub policy_id: String,
    pub chain_id: i64,
    pub payer: String,
    pub merchant: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Data for a `policy.cancelled_by_failure` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCancelledData {
    pub policy_id: String,
    pub chain_id: i64,
    pub payer: String,
    pub merchant: String,
    pub consecutive_failures: i32,
    pub tx_hash: String,
}
