//! Merchant-facing SDK for the AutoPay relayer.
//!
//! Contains the webhook wire types delivered to merchant endpoints and the
//! HMAC-SHA256 signature scheme used to authenticate them. Merchant backends
//! depend on this crate alone; it carries no database or chain code.

pub mod events;
pub mod signature;
