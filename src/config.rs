//! Configuration management for OntiBlock

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Environment variable holding the analytics bearer token.
pub const ANALYTICS_KEY_ENV: &str = "ONTIBLOCK_ANALYTICS_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_network_id")]
    pub network_id: String,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            token: TokenConfig::default(),
            mining: MiningConfig::default(),
            fees: FeeConfig::default(),
            staking: StakingConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_name")]
    pub name: String,
    #[serde(default = "default_token_symbol")]
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default = "default_total_supply")]
    pub total_supply: u64,
    #[serde(default = "default_presale_allocation")]
    pub presale_allocation: u64,
    #[serde(default = "default_liquidity_allocation")]
    pub liquidity_allocation: u64,
    #[serde(default = "default_mining_reserve")]
    pub mining_reserve: u64,
    #[serde(default = "default_staking_reserve")]
    pub staking_reserve: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: default_token_name(),
            symbol: default_token_symbol(),
            decimals: default_decimals(),
            total_supply: default_total_supply(),
            presale_allocation: default_presale_allocation(),
            liquidity_allocation: default_liquidity_allocation(),
            mining_reserve: default_mining_reserve(),
            staking_reserve: default_staking_reserve(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Blocks between difficulty adjustments; 0 keeps difficulty fixed.
    #[serde(default)]
    pub retarget_interval: u64,
    #[serde(default = "default_target_block_time")]
    pub target_block_time_secs: u64,
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: u32,
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: u32,
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
    #[serde(default = "default_initial_block_reward")]
    pub initial_block_reward: u64,
    #[serde(default = "default_halving_interval")]
    pub halving_interval: u64,
    /// Node binary only: address credited for mined blocks.
    #[serde(default)]
    pub validator_address: Option<String>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            threads: default_threads(),
            retarget_interval: 0,
            target_block_time_secs: default_target_block_time(),
            min_difficulty: default_min_difficulty(),
            max_difficulty: default_max_difficulty(),
            block_capacity: default_block_capacity(),
            initial_block_reward: default_initial_block_reward(),
            halving_interval: default_halving_interval(),
            validator_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_base_fee")]
    pub base_fee: f64,
    #[serde(default = "default_priority_fee_rate")]
    pub priority_fee_rate: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee: default_base_fee(),
            priority_fee_rate: default_priority_fee_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakingConfig {
    #[serde(default = "default_minimum_stake")]
    pub minimum_stake: u64,
    /// Node binary only: stake registered for the mining validator at startup.
    #[serde(default = "default_minimum_stake")]
    pub initial_stake: u64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            minimum_stake: default_minimum_stake(),
            initial_stake: default_minimum_stake(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            queue_size: default_queue_size(),
        }
    }
}

/// Loads the config at `path`, falling back to defaults when the file is absent.
/// A file that exists but cannot be read is an error.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let config_str = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            String::new()
        }
        Err(e) => {
            return Err(ChainError::ConfigError(format!(
                "Cannot read config {}: {}",
                path.display(),
                e
            )))
        }
    };
    let config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate critical values
    pub fn validate(&self) -> Result<(), ChainError> {
        let token = &self.token;
        let allocated = token
            .presale_allocation
            .checked_add(token.liquidity_allocation)
            .and_then(|v| v.checked_add(token.mining_reserve))
            .and_then(|v| v.checked_add(token.staking_reserve))
            .ok_or_else(|| ChainError::ConfigError("token allocations overflow".to_string()))?;
        if allocated > token.total_supply {
            return Err(ChainError::ConfigError(format!(
                "token allocations ({}) exceed token.total_supply ({})",
                allocated, token.total_supply
            )));
        }
        // I32F32 holds integers up to 2^31 - 1.
        if token.total_supply > i32::MAX as u64 {
            return Err(ChainError::ConfigError(format!(
                "token.total_supply must not exceed {}",
                i32::MAX
            )));
        }
        if self.mining.min_difficulty > self.mining.max_difficulty {
            return Err(ChainError::ConfigError(
                "mining.min_difficulty must not exceed mining.max_difficulty".to_string(),
            ));
        }
        if self.mining.max_difficulty > 64 {
            return Err(ChainError::ConfigError(
                "mining.max_difficulty cannot exceed 64 hex digits".to_string(),
            ));
        }
        if self.mining.difficulty > self.mining.max_difficulty {
            return Err(ChainError::ConfigError(
                "mining.difficulty must not exceed mining.max_difficulty".to_string(),
            ));
        }
        if self.mining.threads == 0 {
            return Err(ChainError::ConfigError("mining.threads must be at least 1".to_string()));
        }
        if self.mining.block_capacity == 0 {
            return Err(ChainError::ConfigError(
                "mining.block_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.fees.base_fee.is_finite() && self.fees.base_fee >= 0.0)
            || !(self.fees.priority_fee_rate.is_finite() && self.fees.priority_fee_rate >= 0.0)
        {
            return Err(ChainError::ConfigError(
                "fees.base_fee and fees.priority_fee_rate must be non-negative".to_string(),
            ));
        }
        if self.analytics.enabled && self.analytics.endpoint.is_empty() {
            return Err(ChainError::ConfigError(
                "analytics.endpoint must be set when analytics is enabled".to_string(),
            ));
        }
        if self.analytics.queue_size == 0 {
            return Err(ChainError::ConfigError(
                "analytics.queue_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_network_id() -> String {
    "devnet".to_string()
}

fn default_token_name() -> String {
    "OntiBlock".to_string()
}

fn default_token_symbol() -> String {
    "ONTI".to_string()
}

fn default_decimals() -> u8 {
    18
}

fn default_total_supply() -> u64 {
    1_000_000_000
}

fn default_presale_allocation() -> u64 {
    300_000_000
}

fn default_liquidity_allocation() -> u64 {
    200_000_000
}

fn default_mining_reserve() -> u64 {
    100_000_000
}

fn default_staking_reserve() -> u64 {
    100_000_000
}

fn default_difficulty() -> u32 {
    2
}

fn default_threads() -> usize {
    1
}

fn default_target_block_time() -> u64 {
    30
}

fn default_min_difficulty() -> u32 {
    1
}

fn default_max_difficulty() -> u32 {
    8
}

fn default_block_capacity() -> usize {
    500
}

fn default_initial_block_reward() -> u64 {
    50
}

fn default_halving_interval() -> u64 {
    210_000
}

fn default_base_fee() -> f64 {
    0.001
}

fn default_priority_fee_rate() -> f64 {
    0.0001
}

fn default_minimum_stake() -> u64 {
    10_000
}

fn default_endpoint() -> String {
    "https://api.ontiblock.ai/llm".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_size() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network_id, "devnet");
        assert_eq!(config.token.symbol, "ONTI");
        assert_eq!(config.mining.difficulty, 2);
        assert_eq!(config.staking.minimum_stake, 10_000);
        assert!(!config.analytics.enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network_id = \"testnet\"\n[mining]\ndifficulty = 3\nthreads = 4").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.network_id, "testnet");
        assert_eq!(config.mining.difficulty, 3);
        assert_eq!(config.mining.threads, 4);
        assert_eq!(config.mining.block_capacity, 500);
        assert_eq!(config.fees.base_fee, 0.001);
    }

    #[test]
    fn test_over_allocated_token_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[token]\ntotal_supply = 100\npresale_allocation = 200").unwrap();
        let result = load_config(file.path());
        assert!(matches!(result, Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mining\ndifficulty = ").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_unreadable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path());
        assert!(matches!(
            result,
            Err(ChainError::ConfigError(msg)) if msg.contains("Cannot read config")
        ));
    }
}
