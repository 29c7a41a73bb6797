//! PolicyManager contract bindings and log decoding.
//!
//! `parse_log` is the pure half of the indexer: it turns a raw RPC log into
//! a typed [`PolicyEvent`], or `None` for logs the relayer does not care
//! about (foreign events, pending logs without block metadata). It never
//! touches the network.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract PolicyManager {
        event PolicyCreated(
            bytes32 indexed policyId,
            address indexed payer,
            address indexed merchant,
            uint256 chargeAmount,
            uint256 spendingCap,
            uint64 interval,
            string metadataUrl
        );

        event PolicyRevoked(
            bytes32 indexed policyId,
            address indexed payer,
            address indexed merchant,
            uint64 endTime
        );

        event ChargeSucceeded(
            bytes32 indexed policyId,
            address indexed payer,
            address indexed merchant,
            uint256 amount,
            uint256 protocolFee
        );

        event ChargeFailed(bytes32 indexed policyId, string reason);

        event PolicyCancelledByFailure(
            bytes32 indexed policyId,
            address indexed payer,
            address indexed merchant,
            uint32 consecutiveFailures,
            uint64 endTime
        );

        function charge(bytes32 policyId) external;
        function cancelFailedPolicy(bytes32 policyId) external;
    }
}

/// Position of a log on chain, used for ordering and replay guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventMeta {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

/// A decoded PolicyManager event. Closed set: downstream handling is
/// exhaustive by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    PolicyCreated {
        policy_id: B256,
        payer: Address,
        merchant: Address,
        charge_amount: U256,
        spending_cap: U256,
        interval: u64,
        metadata_url: String,
    },
    PolicyRevoked {
        policy_id: B256,
        end_time: u64,
    },
    ChargeSucceeded {
        policy_id: B256,
        payer: Address,
        merchant: Address,
        amount: U256,
        protocol_fee: U256,
    },
    ChargeFailed {
        policy_id: B256,
        reason: String,
    },
    PolicyCancelledByFailure {
        policy_id: B256,
        consecutive_failures: u32,
        end_time: u64,
    },
}

/// A decoded event together with its chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    pub meta: EventMeta,
    pub event: PolicyEvent,
}

/// Decode a raw log into a [`ParsedLog`].
///
/// Returns `None` for logs that are not PolicyManager events, fail ABI
/// decoding, or lack block metadata (still pending). Unparseable logs are
/// skipped by the indexer, not treated as fatal.
pub fn parse_log(log: &Log) -> Option<ParsedLog> {
    let meta = EventMeta {
        block_number: log.block_number?,
        log_index: log.log_index?,
        tx_hash: log.transaction_hash?,
    };
    let topic0 = log.topic0()?;
    let data = &log.inner.data;

    let event = if *topic0 == PolicyManager::PolicyCreated::SIGNATURE_HASH {
        let ev = PolicyManager::PolicyCreated::decode_log_data(data).ok()?;
        PolicyEvent::PolicyCreated {
            policy_id: ev.policyId,
            payer: ev.payer,
            merchant: ev.merchant,
            charge_amount: ev.chargeAmount,
            spending_cap: ev.spendingCap,
            interval: ev.interval,
            metadata_url: ev.metadataUrl,
        }
    } else if *topic0 == PolicyManager::PolicyRevoked::SIGNATURE_HASH {
        let ev = PolicyManager::PolicyRevoked::decode_log_data(data).ok()?;
        PolicyEvent::PolicyRevoked {
            policy_id: ev.policyId,
            end_time: ev.endTime,
        }
    } else if *topic0 == PolicyManager::ChargeSucceeded::SIGNATURE_HASH {
        let ev = PolicyManager::ChargeSucceeded::decode_log_data(data).ok()?;
        PolicyEvent::ChargeSucceeded {
            policy_id: ev.policyId,
            payer: ev.payer,
            merchant: ev.merchant,
            amount: ev.amount,
            protocol_fee: ev.protocolFee,
        }
    } else if *topic0 == PolicyManager::ChargeFailed::SIGNATURE_HASH {
        let ev = PolicyManager::ChargeFailed::decode_log_data(data).ok()?;
        PolicyEvent::ChargeFailed {
            policy_id: ev.policyId,
            reason: ev.reason,
        }
    } else if *topic0 == PolicyManager::PolicyCancelledByFailure::SIGNATURE_HASH {
        let ev = PolicyManager::PolicyCancelledByFailure::decode_log_data(data).ok()?;
        PolicyEvent::PolicyCancelledByFailure {
            policy_id: ev.policyId,
            consecutive_failures: ev.consecutiveFailures,
            end_time: ev.endTime,
        }
    } else {
        return None;
    };

    Some(ParsedLog { meta, event })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::rpc_log;

    #[test]
    fn decodes_policy_created() {
        let ev = PolicyManager::PolicyCreated {
            policyId: B256::repeat_byte(0x11),
            payer: Address::repeat_byte(0xaa),
            merchant: Address::repeat_byte(0xbb),
            chargeAmount: U256::from(10u64),
            spendingCap: U256::from(100u64),
            interval: 86_400,
            metadataUrl: "https://merchant.example/plan".to_string(),
        };
        let log = rpc_log(100, 0, B256::repeat_byte(0x01), ev.encode_log_data());

        let parsed = parse_log(&log).unwrap();
        assert_eq!(parsed.meta.block_number, 100);
        match parsed.event {
            PolicyEvent::PolicyCreated {
                policy_id,
                interval,
                ref metadata_url,
                ..
            } => {
                assert_eq!(policy_id, B256::repeat_byte(0x11));
                assert_eq!(interval, 86_400);
                assert_eq!(metadata_url, "https://merchant.example/plan");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_charge_failed_reason() {
        let ev = PolicyManager::ChargeFailed {
            policyId: B256::repeat_byte(0x22),
            reason: "insufficient balance".to_string(),
        };
        let log = rpc_log(101, 3, B256::repeat_byte(0x02), ev.encode_log_data());

        let parsed = parse_log(&log).unwrap();
        assert_eq!(
            parsed.event,
            PolicyEvent::ChargeFailed {
                policy_id: B256::repeat_byte(0x22),
                reason: "insufficient balance".to_string(),
            }
        );
    }

    #[test]
    fn foreign_log_is_skipped() {
        // An ERC-20 Transfer-shaped log: unknown topic0.
        let data = alloy::primitives::LogData::new_unchecked(
            vec![B256::repeat_byte(0xff), B256::ZERO, B256::ZERO],
            Default::default(),
        );
        let log = rpc_log(102, 0, B256::repeat_byte(0x03), data);
        assert!(parse_log(&log).is_none());
    }

    #[test]
    fn pending_log_without_block_is_skipped() {
        let ev = PolicyManager::PolicyRevoked {
            policyId: B256::repeat_byte(0x33),
            payer: Address::ZERO,
            merchant: Address::ZERO,
            endTime: 1_700_000_000,
        };
        let mut log = rpc_log(103, 0, B256::repeat_byte(0x04), ev.encode_log_data());
        log.block_number = None;
        assert!(parse_log(&log).is_none());
    }
}
