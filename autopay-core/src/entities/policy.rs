use rust_decimal::Decimal;

/// A recurring-charge authorization mirrored from chain state.
///
/// Rows are created when the indexer observes `PolicyCreated` and are never
/// deleted (audit trail). Aggregate fields (`total_spent`, `charge_count`,
/// `last_charged_at`) are updated by both the executor (at charge time) and
/// the indexer (on replayed `ChargeSucceeded` events); the
/// `last_event_block`/`last_event_log_index` pair is the replay guard that
/// keeps those two writers from double-applying the same charge.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Policy {
    pub policy_id: String,
    pub chain_id: i64,
    pub payer: String,
    pub merchant: String,
    pub charge_amount: Decimal,
    pub spending_cap: Decimal,
    pub total_spent: Decimal,
    pub interval_seconds: i64,
    /// Unix seconds of the last successful charge; 0 for never charged.
    pub last_charged_at: i64,
    pub charge_count: i64,
    pub consecutive_failures: i32,
    /// Unix seconds after which the policy stops; 0 means open-ended.
    pub end_time: i64,
    pub active: bool,
    /// Set when charge retries are exhausted; cleared on the next success.
    pub needs_attention: bool,
    pub last_error: Option<String>,
    pub metadata_url: String,
    pub last_event_block: i64,
    pub last_event_log_index: i64,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

impl Policy {
    /// Due-selection rule: active, interval elapsed, not past its end time.
    pub fn is_due(&self, now_unix: i64) -> bool {
        self.active
            && now_unix >= self.last_charged_at + self.interval_seconds
            && (self.end_time == 0 || now_unix < self.end_time)
    }
}

/// Data for inserting a policy from a `PolicyCreated` event.
#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub policy_id: String,
    pub chain_id: i64,
    pub payer: String,
    pub merchant: String,
    pub charge_amount: Decimal,
    pub spending_cap: Decimal,
    pub interval_seconds: i64,
    pub metadata_url: String,
    pub created_block: i64,
    pub created_log_index: i64,
}

/// Aggregate counters for one chain, read by the status CLI/API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    pub chain_id: i64,
    pub last_indexed_block: Option<i64>,
    pub active_policies: i64,
    pub pending_charges: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(last_charged_at: i64, interval: i64, end_time: i64) -> Policy {
        Policy {
            policy_id: "0x01".into(),
            chain_id: 1,
            payer: "0xaa".into(),
            merchant: "0xbb".into(),
            charge_amount: Decimal::from(10),
            spending_cap: Decimal::from(100),
            total_spent: Decimal::ZERO,
            interval_seconds: interval,
            last_charged_at,
            charge_count: 0,
            consecutive_failures: 0,
            end_time,
            active: true,
            needs_attention: false,
            last_error: None,
            metadata_url: String::new(),
            last_event_block: 0,
            last_event_log_index: 0,
            created_at: time::OffsetDateTime::UNIX_EPOCH,
            updated_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn due_exactly_at_interval_boundary() {
        let p = policy(1_000, 86_400, 0);
        assert!(!p.is_due(1_000 + 86_399));
        assert!(p.is_due(1_000 + 86_400));
    }

    #[test]
    fn inactive_or_ended_policies_are_not_due() {
        let mut p = policy(0, 60, 0);
        p.active = false;
        assert!(!p.is_due(1_000));

        let p = policy(0, 60, 500);
        assert!(!p.is_due(500));
        assert!(p.is_due(499));
    }
}
