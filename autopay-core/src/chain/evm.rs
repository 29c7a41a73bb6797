//! EVM implementation of [`ChainClient`] over an alloy HTTP provider.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionReceipt};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use url::Url;

use super::contract::PolicyManager;
use super::{ChainClient, ChainError, ChargeOutcome, ChargeReceipt};

/// [`ChainClient`] backed by a JSON-RPC HTTP endpoint with a local signer.
///
/// The provider stack carries the recommended fillers (nonce, gas, chain id)
/// so charge submissions survive concurrent use of the signing key within
/// this process.
pub struct EvmChainClient {
    provider: DynProvider,
    contract_address: Address,
    contract: PolicyManager::PolicyManagerInstance<DynProvider>,
}

impl EvmChainClient {
    pub fn connect(rpc_url: Url, contract_address: Address, signer: PrivateKeySigner) -> Self {
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();
        let contract = PolicyManager::new(contract_address, provider.clone());
        Self {
            provider,
            contract_address,
            contract,
        }
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(self.contract_address)
            .from_block(from_block)
            .to_block(to_block);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn charge(&self, policy_id: B256) -> Result<ChargeReceipt, ChainError> {
        let pending = self
            .contract
            .charge(policy_id)
            .send()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        if !receipt.status() {
            return Err(ChainError::Reverted(format!(
                "charge tx {} reverted",
                receipt.transaction_hash
            )));
        }

        let outcome = charge_outcome(&receipt)?;
        Ok(ChargeReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            outcome,
        })
    }

    async fn cancel_failed_policy(&self, policy_id: B256) -> Result<B256, ChainError> {
        let pending = self
            .contract
            .cancelFailedPolicy(policy_id)
            .send()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        if !receipt.status() {
            return Err(ChainError::Reverted(format!(
                "cancelFailedPolicy tx {} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(receipt.transaction_hash)
    }
}

/// Classify a confirmed charge by the event the contract emitted.
///
/// The contract reports soft failures by emitting `ChargeFailed` from a
/// successful transaction; reverts never reach this function.
fn charge_outcome(receipt: &TransactionReceipt) -> Result<ChargeOutcome, ChainError> {
    for log in receipt.inner.logs() {
        let Some(topic0) = log.topic0() else { continue };
        if *topic0 == PolicyManager::ChargeSucceeded::SIGNATURE_HASH {
            if let Ok(ev) = PolicyManager::ChargeSucceeded::decode_log_data(&log.inner.data) {
                return Ok(ChargeOutcome::Applied {
                    amount: ev.amount,
                    protocol_fee: ev.protocolFee,
                    log_index: log.log_index.unwrap_or_default(),
                });
            }
        } else if *topic0 == PolicyManager::ChargeFailed::SIGNATURE_HASH {
            if let Ok(ev) = PolicyManager::ChargeFailed::decode_log_data(&log.inner.data) {
                return Ok(ChargeOutcome::Declined { reason: ev.reason });
            }
        }
    }
    Err(ChainError::Contract(
        "confirmed charge emitted neither ChargeSucceeded nor ChargeFailed".into(),
    ))
}
