//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{BotError, Result};

/// Load configuration from file and environment variables
///
/// The file format (TOML, YAML or JSON) follows the file extension.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_, `__` between nested keys)
/// 2. Configuration file
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(BotError::Configuration(format!(
                "configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::with_name(path));
    }

    // Add environment variables with APP_ prefix
    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize().map_err(BotError::from)
}

/// Parse configuration from an in-memory TOML document
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, config::FileFormat::Toml))
        .build()?;
    config.try_deserialize().map_err(BotError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StrategyConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_twap_from_toml() {
        let config = load_from_str(
            r#"
            [strategy]
            kind = "twap"
            symbol = "BTC/USDT"
            target = "100"
            interval_secs = 60
            duration_secs = 600

            [settings]
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.settings.log_level, "debug");
        assert_eq!(config.settings.interval_secs, 60);
        let StrategyConfig::Twap(twap) = config.strategy else {
            panic!("expected twap config");
        };
        assert_eq!(twap.target, dec!(100));
        assert_eq!(twap.duration_secs, 600);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = load_config(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }

    #[test]
    fn test_missing_strategy_is_configuration_error() {
        let err = load_from_str("[settings]\nlog_level = \"info\"\n").unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }
}
