#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod entities;
pub mod executor;
pub mod indexer;
pub mod store;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;
