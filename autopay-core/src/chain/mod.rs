//! Chain access: the [`ChainClient`] trait and its EVM implementation.
//!
//! Components take `Arc<dyn ChainClient>` rather than a concrete provider so
//! tests can substitute a mock chain and so multiple chains coexist without
//! shared global state.

pub mod contract;
pub mod evm;

use alloy::primitives::{B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

pub use contract::{EventMeta, ParsedLog, PolicyEvent, parse_log};
pub use evm::EvmChainClient;

/// Errors from chain reads and writes.
///
/// The executor's retry classification works on the rendered message (see
/// `executor::retry`), so `Display` carries whatever detail the underlying
/// transport or contract error reported.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// RPC transport failure: timeouts, connection errors, rate limits.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The transaction was mined but reverted.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    /// The call could not be submitted or produced an unusable result.
    #[error("contract call failed: {0}")]
    Contract(String),
}

/// Result of a confirmed charge transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub outcome: ChargeOutcome,
}

/// What the contract reported for a confirmed charge transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Funds moved; the receipt carried a `ChargeSucceeded` event.
    Applied {
        amount: U256,
        protocol_fee: U256,
        log_index: u64,
    },
    /// The transaction confirmed but the contract declined the charge
    /// (soft failure: insufficient balance or allowance).
    Declined { reason: String },
}

/// Static per-chain settings shared by the indexer and executor.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub chain_id: i64,
    pub name: String,
    /// First block the contract existed at; indexing never starts earlier.
    pub start_block: u64,
    /// Maximum block span per `getLogs` call.
    pub batch_size: u64,
    /// Blocks behind the head the indexer stays to dodge reorgs.
    pub confirmations: u64,
    pub poll_interval: std::time::Duration,
}

/// Thin wrapper around blockchain RPC: log reads, head queries, and the two
/// PolicyManager write paths the relayer needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Raw logs emitted by the PolicyManager contract in an inclusive range.
    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError>;

    /// Submit `charge(policyId)` and wait for confirmation.
    ///
    /// A mined-but-reverted transaction or a submission failure is an `Err`
    /// (hard failure); a confirmed transaction yields a [`ChargeReceipt`]
    /// whose outcome distinguishes applied charges from soft failures.
    async fn charge(&self, policy_id: B256) -> Result<ChargeReceipt, ChainError>;

    /// Submit `cancelFailedPolicy(policyId)`, returning the tx hash once
    /// confirmed.
    async fn cancel_failed_policy(&self, policy_id: B256) -> Result<B256, ChainError>;
}
