//! TOML file configuration structures.
//!
//! These structs directly map to the `relayer-config.toml` file format.

use alloy::primitives::Address;
use serde::Deserialize;
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// One `[[chains]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: i64,
    pub name: String,
    pub rpc_url: Url,
    /// PolicyManager contract address.
    pub policy_manager: Address,
    /// First block the contract existed at.
    pub start_block: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_batch_size() -> u64 {
    9_000
}

fn default_confirmations() -> u64 {
    2
}

fn default_enabled() -> bool {
    true
}

/// The `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub run_interval_ms: u64,
    pub batch_size: i64,
    pub retry_preset: RetryPresetName,
    /// Only read when `retry_preset = "custom"`.
    pub retry_max_attempts: u32,
    pub retry_delays_ms: Vec<u64>,
    /// Consecutive soft failures before the policy is cancelled on chain.
    pub failure_threshold: i32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            run_interval_ms: 60_000,
            batch_size: 10,
            retry_preset: RetryPresetName::Standard,
            retry_max_attempts: 3,
            retry_delays_ms: Vec::new(),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPresetName {
    Aggressive,
    Standard,
    Conservative,
    Custom,
}

/// The `[webhooks]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub batch_size: i64,
    pub max_attempts: u32,
    pub delays_ms: Vec<u64>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            timeout_ms: 10_000,
            batch_size: 20,
            max_attempts: 3,
            delays_ms: vec![10_000, 60_000, 600_000],
        }
    }
}

/// The `[api]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}
