//! Application state shared across all request handlers.

use std::sync::Arc;

use autopay_core::store::Store;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Chain ids from the config file, in declaration order.
    pub chain_ids: Vec<i64>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, chain_ids: Vec<i64>) -> Self {
        Self { store, chain_ids }
    }
}
