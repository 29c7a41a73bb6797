//! Block-range indexer: pulls PolicyManager logs and applies them to the
//! store, advancing a per-chain cursor.
//!
//! The cursor is written last, after every event in the batch has landed, so
//! a crash mid-batch re-runs the same range. Every apply below is idempotent
//! (insert-if-absent, position-guarded update) which makes that replay safe.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::chain::{ChainClient, ChainError, ChainSettings, ParsedLog, PolicyEvent, parse_log};
use crate::entities::{NewPolicy, encode_address, encode_b256, u256_to_decimal};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one indexing pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexOutcome {
    pub blocks_processed: u64,
    pub events_applied: u64,
}

pub struct Indexer {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
    settings: ChainSettings,
}

impl Indexer {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn ChainClient>, settings: ChainSettings) -> Self {
        Self {
            store,
            chain,
            settings,
        }
    }

    /// Index one block range.
    ///
    /// `from_override` forces the starting block (backfill / CLI); otherwise
    /// the range resumes at cursor + 1, never before the contract's start
    /// block. The upper bound stays `confirmations` blocks behind the head.
    /// An empty range is a no-op. RPC or store errors abort without moving
    /// the cursor, so the same range is retried next pass.
    pub async fn run_once(
        &self,
        from_override: Option<u64>,
        now: OffsetDateTime,
    ) -> Result<IndexOutcome, IndexerError> {
        let chain_id = self.settings.chain_id;

        let from_block = match from_override {
            Some(from) => from,
            None => {
                let cursor = self.store.cursor(chain_id).await?;
                match cursor {
                    Some(last) => (last as u64 + 1).max(self.settings.start_block),
                    None => self.settings.start_block,
                }
            }
        };

        let head = self.chain.block_number().await?;
        let safe_head = head.saturating_sub(self.settings.confirmations);
        let to_block = safe_head.min(from_block + self.settings.batch_size - 1);
        if to_block < from_block {
            return Ok(IndexOutcome::default());
        }

        let logs = self.chain.logs(from_block, to_block).await?;
        let mut parsed: Vec<ParsedLog> = logs.iter().filter_map(parse_log).collect();
        parsed.sort_by_key(|p| p.meta);

        let mut events_applied = 0u64;
        for ParsedLog { meta, event } in parsed {
            self.apply(event, meta.block_number, meta.log_index, now)
                .await?;
            events_applied += 1;
        }

        self.store.set_cursor(chain_id, to_block as i64).await?;
        tracing::debug!(
            chain_id,
            from_block,
            to_block,
            events_applied,
            "indexed block range"
        );

        Ok(IndexOutcome {
            blocks_processed: to_block - from_block + 1,
            events_applied,
        })
    }

    async fn apply(
        &self,
        event: PolicyEvent,
        block_number: u64,
        log_index: u64,
        now: OffsetDateTime,
    ) -> Result<(), IndexerError> {
        let chain_id = self.settings.chain_id;
        match event {
            PolicyEvent::PolicyCreated {
                policy_id,
                payer,
                merchant,
                charge_amount,
                spending_cap,
                interval,
                metadata_url,
            } => {
                let (Some(charge_amount), Some(spending_cap)) =
                    (u256_to_decimal(charge_amount), u256_to_decimal(spending_cap))
                else {
                    tracing::warn!(
                        chain_id,
                        policy_id = %policy_id,
                        "skipping policy with out-of-range amounts"
                    );
                    return Ok(());
                };
                let inserted = self
                    .store
                    .insert_policy_if_absent(NewPolicy {
                        policy_id: encode_b256(policy_id),
                        chain_id,
                        payer: encode_address(payer),
                        merchant: encode_address(merchant),
                        charge_amount,
                        spending_cap,
                        interval_seconds: interval as i64,
                        metadata_url,
                        created_block: block_number as i64,
                        created_log_index: log_index as i64,
                    })
                    .await?;
                if inserted {
                    tracing::info!(chain_id, policy_id = %policy_id, "policy created");
                }
            }
            PolicyEvent::PolicyRevoked {
                policy_id,
                end_time,
            } => {
                self.store
                    .deactivate_policy(chain_id, &encode_b256(policy_id), end_time as i64)
                    .await?;
                tracing::info!(chain_id, policy_id = %policy_id, "policy revoked");
            }
            PolicyEvent::ChargeSucceeded {
                policy_id, amount, ..
            } => {
                let Some(amount) = u256_to_decimal(amount) else {
                    return Ok(());
                };
                // No-op when the executor already applied this charge at
                // submission time.
                self.store
                    .apply_charge_succeeded(
                        chain_id,
                        &encode_b256(policy_id),
                        amount,
                        now.unix_timestamp(),
                        block_number as i64,
                        log_index as i64,
                    )
                    .await?;
            }
            PolicyEvent::ChargeFailed { policy_id, reason } => {
                self.store
                    .record_charge_failed_event(chain_id, &encode_b256(policy_id), &reason)
                    .await?;
            }
            PolicyEvent::PolicyCancelledByFailure {
                policy_id,
                end_time,
                ..
            } => {
                self.store
                    .deactivate_policy(chain_id, &encode_b256(policy_id), end_time as i64)
                    .await?;
                tracing::warn!(chain_id, policy_id = %policy_id, "policy cancelled by failure");
            }
        }
        Ok(())
    }

    /// Repeat `run_once` from `from_block` until the range comes back empty.
    /// Returns the total number of events applied.
    pub async fn backfill(&self, from_block: u64) -> Result<u64, IndexerError> {
        let mut from = Some(from_block);
        let mut total = 0u64;
        loop {
            let outcome = self.run_once(from.take(), OffsetDateTime::now_utc()).await?;
            if outcome.blocks_processed == 0 {
                return Ok(total);
            }
            total += outcome.events_applied;
        }
    }

    /// Poll until the shutdown signal flips. A failed iteration is logged
    /// and retried on the next tick.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let chain = self.settings.name.clone();
        tracing::info!(chain = %chain, "indexer loop started");
        loop {
            if let Err(error) = self.run_once(None, OffsetDateTime::now_utc()).await {
                tracing::error!(chain = %chain, %error, "indexing pass failed");
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
        tracing::info!(chain = %chain, "indexer loop stopped");
    }
}
