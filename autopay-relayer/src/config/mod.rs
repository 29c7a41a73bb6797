//! Configuration for the relayer binary.
//!
//! Static settings come from a TOML file; secrets (database URL, signing
//! key) come only from the environment and are validated at boot so a
//! misconfigured deployment fails before any loop starts.

pub mod file;

use std::path::Path;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use thiserror::Error;

use autopay_core::chain::ChainSettings;
use autopay_core::executor::{BackoffPreset, ExecutorSettings};
use autopay_core::webhook::WebhookSettings;

pub use file::{ChainConfig, ExecutorConfig, FileConfig, RetryPresetName, WebhookConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,

    #[error("RELAYER_PRIVATE_KEY environment variable not set")]
    MissingPrivateKey,

    #[error("RELAYER_PRIVATE_KEY must be a 0x-prefixed 32-byte hex key")]
    InvalidPrivateKey,
}

/// Read and validate the TOML config file.
pub fn load(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    for chain in &config.chains {
        if chain.batch_size == 0 {
            return Err(ConfigError::Validation(format!(
                "chain {} has batch_size 0",
                chain.name
            )));
        }
    }
    if config.executor.retry_preset == RetryPresetName::Custom
        && config.executor.retry_delays_ms.is_empty()
    {
        return Err(ConfigError::Validation(
            "custom retry preset needs a non-empty retry_delays_ms".to_string(),
        ));
    }
    Ok(())
}

pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

/// Read and parse the relayer's signing key from the environment.
pub fn get_signer() -> Result<PrivateKeySigner, ConfigError> {
    let raw = std::env::var("RELAYER_PRIVATE_KEY").map_err(|_| ConfigError::MissingPrivateKey)?;
    if !raw.starts_with("0x") {
        return Err(ConfigError::InvalidPrivateKey);
    }
    raw.parse().map_err(|_| ConfigError::InvalidPrivateKey)
}

impl ChainConfig {
    pub fn to_settings(&self) -> ChainSettings {
        ChainSettings {
            chain_id: self.chain_id,
            name: self.name.clone(),
            start_block: self.start_block,
            batch_size: self.batch_size,
            confirmations: self.confirmations,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl ExecutorConfig {
    pub fn to_settings(&self) -> ExecutorSettings {
        let backoff = match self.retry_preset {
            RetryPresetName::Aggressive => BackoffPreset::Aggressive,
            RetryPresetName::Standard => BackoffPreset::Standard,
            RetryPresetName::Conservative => BackoffPreset::Conservative,
            RetryPresetName::Custom => BackoffPreset::Custom {
                max_attempts: self.retry_max_attempts,
                delays: self
                    .retry_delays_ms
                    .iter()
                    .map(|ms| Duration::from_millis(*ms))
                    .collect(),
            },
        };
        ExecutorSettings {
            run_interval: Duration::from_millis(self.run_interval_ms),
            batch_size: self.batch_size,
            backoff,
            failure_threshold: self.failure_threshold,
        }
    }
}

impl WebhookConfig {
    pub fn to_settings(&self) -> WebhookSettings {
        WebhookSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            backoff: BackoffPreset::Custom {
                max_attempts: self.max_attempts,
                delays: self
                    .delays_ms
                    .iter()
                    .map(|ms| Duration::from_millis(*ms))
                    .collect(),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
