//! # Engine Configuration
//!
//! Per-document tuning loaded from TOML.
//!
//! ```toml
//! max_update_rounds = 10
//! rounding_precision = 2
//! ```
//!
//! Missing keys take the compiled-in defaults from `primitives`.

use crate::primitives::{
    MAX_ROUNDING_PRECISION, MAX_UPDATE_ROUNDS_CRITERIA_VALUES, ROUNDING_DECIMAL_PRECISION,
};
use crate::types::PathwayError;
use serde::Deserialize;
use std::path::Path;

/// Upper limit accepted for `max_update_rounds`.
const MAX_ROUNDS_LIMIT: usize = 1000;

/// Engine settings for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Round budget of one propagated edit.
    pub max_update_rounds: usize,
    /// Decimal places kept by rounded display values.
    pub rounding_precision: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_update_rounds: MAX_UPDATE_ROUNDS_CRITERIA_VALUES,
            rounding_precision: ROUNDING_DECIMAL_PRECISION,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// `Config` when the document does not parse or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self, PathwayError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| PathwayError::Config(format!("Failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, otherwise as `from_toml_str`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PathwayError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| PathwayError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Check the value ranges.
    ///
    /// # Errors
    ///
    /// `Config` naming the first offending key.
    pub fn validate(&self) -> Result<(), PathwayError> {
        if self.max_update_rounds == 0 {
            return Err(PathwayError::Config(
                "max_update_rounds must be greater than 0".to_string(),
            ));
        }
        if self.max_update_rounds > MAX_ROUNDS_LIMIT {
            return Err(PathwayError::Config(format!(
                "max_update_rounds cannot exceed {MAX_ROUNDS_LIMIT}"
            )));
        }
        if self.rounding_precision > MAX_ROUNDING_PRECISION {
            return Err(PathwayError::Config(format!(
                "rounding_precision cannot exceed {MAX_ROUNDING_PRECISION}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_update_rounds, 10);
        assert_eq!(config.rounding_precision, 2);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = EngineConfig::from_toml_str("rounding_precision = 4").expect("valid config");
        assert_eq!(config.max_update_rounds, MAX_UPDATE_ROUNDS_CRITERIA_VALUES);
        assert_eq!(config.rounding_precision, 4);
        assert_eq!(EngineConfig::from_toml_str("").expect("valid config"), EngineConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_update_rounds = 0"),
            Err(PathwayError::Config(_))
        ));
        assert!(EngineConfig::from_toml_str("max_update_rounds = 1001").is_err());
        assert!(EngineConfig::from_toml_str("rounding_precision = 16").is_err());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(EngineConfig::from_toml_str("max_update_rounds = \"ten\"").is_err());
        assert!(EngineConfig::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "max_update_rounds = 25").expect("write config");
        let config = EngineConfig::from_file(file.path()).expect("valid config");
        assert_eq!(config.max_update_rounds, 25);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = EngineConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(PathwayError::Io(_))));
    }
}
