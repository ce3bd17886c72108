//! Configuration loading, validation, and environment variable
//! interpolation for the vault engine.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vault_engine::config::{EngineConfig, load_config};
//!
//! // Load from default path (vault.yaml)
//! let config = load_config(None)?;
//!
//! // Access configuration values
//! println!("cooldown: {}s", config.rebalance.cooldown_secs);
//! ```

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::amount::BPS_DENOMINATOR;
use crate::domain::asset::AssetId;
use crate::fees::FeeConfig;
use crate::rebalance::RebalanceRules;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Vault identity and share bootstrap parameters.
    pub vault: VaultConfig,
    /// Fee rates.
    #[serde(default)]
    pub fees: FeeConfig,
    /// Rebalance guard rails.
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Rebalance rules derived from this configuration.
    #[must_use]
    pub fn rebalance_rules(&self) -> RebalanceRules {
        RebalanceRules {
            cooldown_secs: self.rebalance.cooldown_secs,
            max_deviation_bps: self.rebalance.max_deviation_bps,
            allow_list: self.vault.asset_allow_list.iter().cloned().collect(),
            dust_grace_secs: self.rebalance.dust_grace_secs,
        }
    }

    /// Allow-list as an ordered set.
    #[must_use]
    pub fn allow_list(&self) -> BTreeSet<AssetId> {
        self.vault.asset_allow_list.iter().cloned().collect()
    }
}

/// Vault identity and share bootstrap parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Human-readable vault name.
    pub name: String,
    /// Shares minted by the bootstrap deposit, independent of its value.
    #[serde(default = "default_initial_share_supply")]
    pub initial_share_supply: Decimal,
    /// Assets the manager may bring into the vault.
    pub asset_allow_list: Vec<AssetId>,
}

fn default_initial_share_supply() -> Decimal {
    dec!(100)
}

/// Rebalance guard rails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Minimum spacing between rebalances, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Maximum NAV deviation attributable to one rebalance, in basis points.
    #[serde(default = "default_max_deviation_bps")]
    pub max_deviation_bps: u32,
    /// Grace window before zero-balance entries are removed, in seconds.
    #[serde(default = "default_dust_grace_secs")]
    pub dust_grace_secs: u64,
}

const fn default_cooldown_secs() -> u64 {
    70
}

const fn default_max_deviation_bps() -> u32 {
    100
}

const fn default_dust_grace_secs() -> u64 {
    3_600
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            max_deviation_bps: default_max_deviation_bps(),
            dust_grace_secs: default_dust_grace_secs(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable
/// interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "vault.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    let path = path.unwrap_or("vault.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: EngineConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    // Match ${VAR} or ${VAR:-default} patterns
    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.vault.name.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "vault.name must not be empty".to_string(),
        ));
    }

    if config.vault.initial_share_supply <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "vault.initial_share_supply must be positive".to_string(),
        ));
    }

    if config.vault.asset_allow_list.is_empty() {
        return Err(ConfigError::ValidationError(
            "vault.asset_allow_list must not be empty".to_string(),
        ));
    }

    config
        .fees
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    if config.rebalance.max_deviation_bps > BPS_DENOMINATOR {
        return Err(ConfigError::ValidationError(
            "rebalance.max_deviation_bps must not exceed 10000".to_string(),
        ));
    }

    let valid_formats = ["pretty", "json"];
    if !valid_formats.contains(&config.observability.logging.format.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "observability.logging.format must be one of: {valid_formats:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_minimal_config_fills_defaults() {
        let yaml = r"
vault:
  name: growth-fund
  asset_allow_list: [WBNB, ETH]
";
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load minimal config: {e}"),
        };
        assert_eq!(config.vault.name, "growth-fund");
        assert_eq!(config.vault.initial_share_supply, dec!(100));
        assert_eq!(config.rebalance.cooldown_secs, 70);
        assert_eq!(config.rebalance.max_deviation_bps, 100);
        assert!(config.fees.management_fee_annual_bps.is_zero());
        assert_eq!(config.observability.logging.level, "info");
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
vault:
  name: growth-fund
  initial_share_supply: "250"
  asset_allow_list: [WBNB, ETH, USDT]

fees:
  management_fee_annual_bps: 200
  performance_fee_bps: 2500
  entry_fee_bps: 20
  exit_fee_bps: 20

rebalance:
  cooldown_secs: 70
  max_deviation_bps: 50
  dust_grace_secs: 7200

observability:
  logging:
    level: "debug"
    format: "json"
"#;
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };
        assert_eq!(config.vault.initial_share_supply, dec!(250));
        assert_eq!(config.fees.management_fee_annual_bps.bps(), 200);
        assert_eq!(config.fees.performance_fee_bps.bps(), 2500);
        assert_eq!(config.rebalance.max_deviation_bps, 50);
        assert_eq!(config.observability.logging.format, "json");

        let rules = config.rebalance_rules();
        assert_eq!(rules.cooldown_secs, 70);
        assert!(rules.allow_list.contains(&AssetId::new("USDT")));
    }

    #[test]
    fn partial_fee_section_defaults_remaining_rates() {
        let yaml = r"
vault:
  name: growth-fund
  asset_allow_list: [WBNB]
fees:
  management_fee_annual_bps: 200
";
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load partial fee section: {e}"),
        };
        assert_eq!(config.fees.management_fee_annual_bps.bps(), 200);
        assert!(config.fees.performance_fee_bps.is_zero());
        assert!(config.fees.entry_fee_bps.is_zero());
        assert!(config.fees.exit_fee_bps.is_zero());
    }

    #[test]
    fn fee_bounds_enforced_at_load() {
        let yaml = r"
vault:
  name: growth-fund
  asset_allow_list: [WBNB]
fees:
  management_fee_annual_bps: 1001
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for out-of-bounds management fee");
        };
        assert!(err.to_string().contains("management_fee_annual_bps"));
    }

    #[test]
    fn empty_allow_list_rejected() {
        let yaml = r"
vault:
  name: growth-fund
  asset_allow_list: []
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for empty allow list");
        };
        assert!(err.to_string().contains("asset_allow_list"));
    }

    #[test]
    fn zero_initial_supply_rejected() {
        let yaml = r#"
vault:
  name: growth-fund
  initial_share_supply: "0"
  asset_allow_list: [WBNB]
"#;
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero initial supply");
        };
        assert!(err.to_string().contains("initial_share_supply"));
    }

    #[test]
    fn invalid_log_format_rejected() {
        let yaml = r#"
vault:
  name: growth-fund
  asset_allow_list: [WBNB]
observability:
  logging:
    format: "xml"
"#;
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for invalid log format");
        };
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn env_var_with_default_when_missing() {
        let input = "name: ${VAULT_CONFIG_TEST_NONEXISTENT_VAR:-growth-fund}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "name: growth-fund");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn env_var_with_default_uses_existing() {
        // PATH should always exist
        let input = "path: ${PATH:-default}";
        let result = interpolate_env_vars(input);
        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn env_var_without_default_becomes_empty() {
        let input = "name: ${VAULT_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "name: ");
    }
}
