//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_invalid_semantics() {
        let raw = r#"
            [retries]
            max_attempts = 0
        "#;
        match parse_config(raw) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(
                    errors,
                    vec![ValidationError::MustBePositive { field: "retries.max_attempts" }]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_zero_route_period() {
        let raw = r#"
            [[routes]]
            id = "facturas"
            path_prefix = "/api/v1/facturas"
            uri = "http://localhost:8082"

            [routes.metadata]
            rate_limit = 1
            refresh_period_secs = 0
        "#;
        match parse_config(raw) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::ZeroRoutePeriod { route: "facturas".into() }]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_reports_syntax_errors() {
        assert!(matches!(parse_config("routes = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_sample_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("gateway.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.routes[1].metadata.rate_limit, Some(50));
        assert_eq!(config.retries.retryable_statuses, vec![503]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("does-not-exist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
