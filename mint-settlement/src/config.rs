//! Configuration for execution settlement
//!
//! Loaded from TOML (`Config::from_file`) or `MINT_*` environment variables
//! (`Config::from_env`). Both validate before returning.

use crate::crypto::parse_pubkey;
use crate::earnings::MAX_TOKEN_DECIMALS;
use crate::transaction::{MintProgram, MINT_PROGRAM_ID, MINT_STATE_ACCOUNT};
use crate::types::{Complexity, MAX_COMPLEXITY_MILLIS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default RPC endpoint
pub const DEFAULT_RPC_ENDPOINT: &str = "https://api.mainnet-beta.solana.com";

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the JSON keypair file (`~` expanded)
    pub keypair_path: PathBuf,

    /// Treasury receiving settlements (base58 address)
    pub treasury_address: String,

    /// RPC endpoint
    pub rpc_endpoint: String,

    /// MINT program accounts
    pub program: ProgramConfig,

    /// Earnings configuration
    pub earnings: EarningsConfig,

    /// Submission retry configuration
    pub retry: RetryConfig,

    /// Confirmation configuration
    pub confirmation: ConfirmationConfig,

    /// Ledger configuration
    pub ledger: mint_ledger::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keypair_path: PathBuf::from("~/.config/solana/id.json"),
            treasury_address: String::new(),
            rpc_endpoint: DEFAULT_RPC_ENDPOINT.to_string(),
            program: ProgramConfig::default(),
            earnings: EarningsConfig::default(),
            retry: RetryConfig::default(),
            confirmation: ConfirmationConfig::default(),
            ledger: mint_ledger::Config::default(),
        }
    }
}

/// MINT program accounts (base58). Defaults are the mainnet deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Program ID
    pub program_id: String,

    /// Global state account
    pub state_account: String,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            program_id: MINT_PROGRAM_ID.to_string(),
            state_account: MINT_STATE_ACCOUNT.to_string(),
        }
    }
}

/// Earnings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarningsConfig {
    /// Tokens per metered second
    pub base_rate_per_second: Decimal,

    /// Complexity in thousandths when an execution declares none (1000 = ×1.0)
    pub default_complexity: u32,

    /// Token precision
    pub token_decimals: u32,

    /// Executions shorter than this are not settled
    pub min_duration_secs: u64,
}

impl Default for EarningsConfig {
    fn default() -> Self {
        Self {
            base_rate_per_second: Decimal::new(5, 3),
            default_complexity: 1000,
            token_decimals: 9,
            min_duration_secs: 1,
        }
    }
}

/// Submission retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first try included
    pub max_attempts: u32,

    /// Delay before the first retry (ms)
    pub initial_delay_ms: u64,

    /// Delay cap (ms)
    pub max_delay_ms: u64,

    /// Growth factor per retry
    pub backoff_multiplier: f64,

    /// Fraction of the delay randomized in both directions
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Confirmation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// How long to wait for confirmation
    pub timeout_secs: u64,

    /// Status polling interval (ms)
    pub poll_interval_ms: u64,

    /// Per-request RPC timeout
    pub request_timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poll_interval_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl ConfirmationConfig {
    /// Confirmation timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// RPC request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            crate::Error::Configuration(format!("Failed to parse config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables. Ledger settings come from
    /// [`mint_ledger::Config::from_env`].
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            ledger: mint_ledger::Config::from_env()
                .map_err(|e| crate::Error::Configuration(e.to_string()))?,
            ..Config::default()
        };

        if let Ok(path) = std::env::var("MINT_KEYPAIR_PATH") {
            config.keypair_path = PathBuf::from(path);
        }

        if let Ok(address) = std::env::var("MINT_TREASURY_ADDRESS") {
            config.treasury_address = address;
        }

        if let Ok(endpoint) = std::env::var("MINT_RPC_ENDPOINT") {
            config.rpc_endpoint = endpoint;
        }

        if let Ok(program_id) = std::env::var("MINT_PROGRAM_ID") {
            config.program.program_id = program_id;
        }

        if let Ok(state_account) = std::env::var("MINT_STATE_ACCOUNT") {
            config.program.state_account = state_account;
        }

        if let Ok(rate) = std::env::var("MINT_BASE_RATE") {
            config.earnings.base_rate_per_second = Decimal::from_str(&rate).map_err(|e| {
                crate::Error::Configuration(format!("Invalid MINT_BASE_RATE {:?}: {}", rate, e))
            })?;
        }

        if let Ok(complexity) = std::env::var("MINT_COMPLEXITY") {
            config.earnings.default_complexity = complexity.parse().map_err(|e| {
                crate::Error::Configuration(format!(
                    "Invalid MINT_COMPLEXITY {:?}: {}",
                    complexity, e
                ))
            })?;
        }

        if let Ok(min) = std::env::var("MINT_MIN_DURATION_SECS") {
            config.earnings.min_duration_secs = min.parse().map_err(|e| {
                crate::Error::Configuration(format!(
                    "Invalid MINT_MIN_DURATION_SECS {:?}: {}",
                    min, e
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values settlement cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(crate::Error::Configuration(msg));

        if self.earnings.base_rate_per_second <= Decimal::ZERO {
            return invalid(format!(
                "base_rate_per_second must be positive, got {}",
                self.earnings.base_rate_per_second
            ));
        }
        if self.earnings.default_complexity == 0
            || self.earnings.default_complexity > MAX_COMPLEXITY_MILLIS
        {
            return invalid(format!(
                "default_complexity must be in 1..={} thousandths, got {}",
                MAX_COMPLEXITY_MILLIS, self.earnings.default_complexity
            ));
        }
        if self.earnings.token_decimals > MAX_TOKEN_DECIMALS {
            return invalid(format!(
                "token_decimals must be at most {}, got {}",
                MAX_TOKEN_DECIMALS, self.earnings.token_decimals
            ));
        }

        self.treasury()?;
        self.mint_program()?;

        if let Err(e) = reqwest::Url::parse(&self.rpc_endpoint) {
            return invalid(format!("Invalid rpc_endpoint {:?}: {}", self.rpc_endpoint, e));
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return invalid("retry.jitter_factor must be within 0.0..=1.0".to_string());
        }

        if self.confirmation.timeout_secs == 0
            || self.confirmation.poll_interval_ms == 0
            || self.confirmation.request_timeout_secs == 0
        {
            return invalid("confirmation timeouts must be non-zero".to_string());
        }

        self.ledger
            .validate()
            .map_err(|e| crate::Error::Configuration(e.to_string()))
    }

    /// Parsed treasury address
    pub fn treasury(&self) -> crate::Result<Pubkey> {
        if self.treasury_address.is_empty() {
            return Err(crate::Error::Configuration(
                "treasury_address is required".to_string(),
            ));
        }
        parse_pubkey(&self.treasury_address)
    }

    /// Parsed MINT program accounts
    pub fn mint_program(&self) -> crate::Result<MintProgram> {
        Ok(MintProgram {
            program_id: parse_pubkey(&self.program.program_id)?,
            state_account: parse_pubkey(&self.program.state_account)?,
        })
    }

    /// Default complexity as a typed value
    pub fn default_complexity(&self) -> crate::Result<Complexity> {
        Complexity::from_millis(self.earnings.default_complexity)
            .map_err(|e| crate::Error::Configuration(e.to_string()))
    }

    /// Keypair path with a leading `~` expanded to the home directory
    pub fn expanded_keypair_path(&self) -> PathBuf {
        match self.keypair_path.strip_prefix("~") {
            Ok(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => self.keypair_path.clone(),
            },
            Err(_) => self.keypair_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn valid_config() -> Config {
        Config {
            treasury_address: Keypair::from_seed(&[2u8; 32]).public_key().to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.earnings.base_rate_per_second, Decimal::new(5, 3));
        assert_eq!(config.earnings.default_complexity, 1000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rpc_endpoint, DEFAULT_RPC_ENDPOINT);
    }

    #[test]
    fn test_valid_config_passes() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_complexity().unwrap(), Complexity::ONE);
    }

    #[test]
    fn test_from_toml() {
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();
        let toml = format!(
            r#"
            keypair_path = "/etc/mint/id.json"
            treasury_address = "{treasury}"

            [earnings]
            base_rate_per_second = "0.01"
            default_complexity = 1500

            [retry]
            max_attempts = 5

            [ledger]
            data_dir = "/var/lib/mint"
            "#
        );

        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.earnings.base_rate_per_second, Decimal::new(1, 2));
        assert_eq!(config.default_complexity().unwrap().millis(), 1500);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.ledger.data_dir, PathBuf::from("/var/lib/mint"));
        assert_eq!(config.treasury().unwrap(), treasury);
        assert_eq!(config.mint_program().unwrap(), MintProgram::default());
    }

    #[test]
    fn test_from_env_uses_ledger_variables() {
        let treasury = Keypair::from_seed(&[2u8; 32]).public_key();
        std::env::set_var("MINT_TREASURY_ADDRESS", treasury.to_string());
        std::env::set_var(mint_ledger::config::DATA_DIR_ENV, "/srv/mint-ledger");
        std::env::set_var("MINT_COMPLEXITY", "1500");

        let config = Config::from_env();

        std::env::remove_var("MINT_TREASURY_ADDRESS");
        std::env::remove_var(mint_ledger::config::DATA_DIR_ENV);
        std::env::remove_var("MINT_COMPLEXITY");

        let config = config.unwrap();
        assert_eq!(config.ledger.data_dir, PathBuf::from("/srv/mint-ledger"));
        assert_eq!(config.treasury().unwrap(), treasury);
        assert_eq!(config.earnings.default_complexity, 1500);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = valid_config();
        config.earnings.base_rate_per_second = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.earnings.default_complexity = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.earnings.default_complexity = MAX_COMPLEXITY_MILLIS + 1;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.earnings.token_decimals = 13;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.treasury_address = "not-base58!".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.program.program_id = "0xdeadbeef".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.rpc_endpoint = "::nope".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.confirmation.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_treasury_rejected() {
        let result = Config::from_toml_str("rpc_endpoint = \"http://localhost:8899\"");
        assert!(matches!(result, Err(crate::Error::Configuration(_))));
    }

    #[test]
    fn test_keypair_path_expansion() {
        let mut config = valid_config();
        config.keypair_path = PathBuf::from("/abs/id.json");
        assert_eq!(config.expanded_keypair_path(), PathBuf::from("/abs/id.json"));

        config.keypair_path = PathBuf::from("~/.config/solana/id.json");
        let expanded = config.expanded_keypair_path();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".config/solana/id.json"));
        }
    }
}
