//! Configuration loader for YAML files
//!
//! This module handles loading and validating configuration from YAML files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::AppError;

use super::types::AppConfig;

/// Load configuration from a YAML file
///
/// This function:
/// 1. Checks if the file exists
/// 2. Parses the YAML content
/// 3. Validates the configuration rules
///
/// # Example
/// ```ignore
/// use std::path::Path;
/// use market_aggregator::config::load_config;
///
/// let config = load_config(Path::new("config.yaml"))?;
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let config: AppConfig = serde_yaml::from_reader(reader).map_err(|e| {
        AppError::Config(format!("YAML parse error in '{}': {}", path.display(), e))
    })?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml_content)
        .map_err(|e| AppError::Config(format!("YAML parse error: {}", e)))?;

    config.validate()?;

    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG_YAML: &str = r#"
aggregation:
  update_interval_ms: 500
  arbitrage_threshold: 0.2
  enable_streaming: true
  symbols: [BTCUSDT, ETHUSDT]
validation:
  max_age_ms: 60000
exchanges:
  - kind: binance
  - kind: binance
    name: binance-testnet
    rest_url: https://testnet.binance.vision
    ws_url: wss://testnet.binance.vision/ws
  - kind: coinbase
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(VALID_CONFIG_YAML).unwrap();
        assert_eq!(config.aggregation.update_interval_ms, 500);
        assert_eq!(config.aggregation.arbitrage_threshold, 0.2);
        assert!(config.aggregation.enable_streaming);
        assert_eq!(config.aggregation.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.validation.max_age_ms, 60000);
        assert_eq!(config.exchanges.len(), 3);
        assert_eq!(config.exchanges[0].kind, ExchangeKind::Binance);
        assert_eq!(config.exchanges[1].display_name(), "binance-testnet");
        assert_eq!(config.exchanges[2].kind, ExchangeKind::Coinbase);
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
aggregation:
  symbols: [BTCUSDT]
exchanges:
  - kind: binance
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.aggregation.update_interval_ms, 1000);
        assert_eq!(config.aggregation.fee_rate, 0.001);
        assert!(config.aggregation.enable_arbitrage);
        assert!(config.aggregation.enable_validation);
        assert!(!config.aggregation.enable_streaming);
        assert_eq!(config.validation.min_price, 1e-6);
    }

    #[test]
    fn test_load_config_from_str_invalid_yaml() {
        let result = load_config_from_str("invalid: yaml: content: [");
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_missing_symbols_is_parse_error() {
        let yaml = r#"
aggregation:
  update_interval_ms: 500
exchanges:
  - kind: binance
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("symbols"), "got: {}", err);
    }

    #[test]
    fn test_unknown_exchange_kind_rejected() {
        let yaml = r#"
aggregation:
  symbols: [BTCUSDT]
exchanges:
  - kind: mtgox
"#;
        assert!(load_config_from_str(yaml).is_err());
    }

    #[test]
    fn test_load_config_from_str_validation_failure() {
        let yaml = r#"
aggregation:
  symbols: [BTCUSDT]
  data_quality_threshold: 2.0
exchanges:
  - kind: binance
"#;
        let err = load_config_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("data_quality_threshold"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Configuration file not found"));
    }

    #[test]
    fn test_load_config_from_file_valid() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(VALID_CONFIG_YAML.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.exchanges.len(), 3);
    }

    #[test]
    fn test_load_config_from_file_invalid_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"invalid: [yaml: content").unwrap();
        temp_file.flush().unwrap();

        let err = load_config(temp_file.path()).unwrap_err().to_string();
        assert!(err.contains("YAML parse error"));
        assert!(err.contains(&temp_file.path().display().to_string()));
    }
}
