//! Database entities for the relayer's durable state.
//!
//! These are sqlx-mapped rows; wire DTOs live in `autopay-sdk`. On-chain
//! values cross into this layer through the helpers below: 32-byte ids and
//! addresses become lowercase `0x`-hex strings, token amounts become
//! [`Decimal`]s stored as `NUMERIC`.

pub mod charge;
pub mod merchant;
pub mod policy;
pub mod webhook_outbox;

use alloy::primitives::{Address, B256, U256};
use rust_decimal::Decimal;

pub use charge::{Charge, ChargeStatus, NewCharge};
pub use merchant::Merchant;
pub use policy::{ChainStatus, NewPolicy, Policy};
pub use webhook_outbox::{NewWebhookEvent, WebhookCounts, WebhookOutboxEvent, WebhookStatus};

/// Per-chain record of the last block fully indexed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChainCursor {
    pub chain_id: i64,
    pub last_block: i64,
    pub updated_at: time::OffsetDateTime,
}

/// Render a 32-byte id as lowercase `0x`-prefixed hex, the canonical form
/// used for database keys and webhook payloads.
pub fn encode_b256(value: B256) -> String {
    format!("{value:#x}")
}

/// Render an address as lowercase `0x`-prefixed hex (not EIP-55 checksummed,
/// so string equality works as a key).
pub fn encode_address(value: Address) -> String {
    format!("{value:#x}")
}

/// Convert an on-chain token amount to a [`Decimal`].
///
/// Returns `None` if the value exceeds `Decimal`'s 96-bit mantissa, which no
/// realistic token amount does.
pub fn u256_to_decimal(value: U256) -> Option<Decimal> {
    Decimal::from_str_exact(&value.to_string()).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hex_encodings_are_lowercase_and_prefixed() {
        let id = B256::repeat_byte(0xAB);
        assert_eq!(encode_b256(id), format!("0x{}", "ab".repeat(32)));

        let addr: Address = "0xCa974B1EeC022B6E27bfA24D021F518C4d5b3734"
            .parse()
            .unwrap();
        assert_eq!(
            encode_address(addr),
            "0xca974b1eec022b6e27bfa24d021f518c4d5b3734"
        );
    }

    #[test]
    fn u256_conversion() {
        assert_eq!(
            u256_to_decimal(U256::from(10_000_000u64)),
            Some(Decimal::from(10_000_000u64))
        );
        assert_eq!(u256_to_decimal(U256::MAX), None);
    }
}
