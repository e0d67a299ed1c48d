use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tunable limits
// ---------------------------------------------------------------------------

/// Physical bounds and tolerances used by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Upper bound for `current`, in amps.
    pub current_max: f64,
    /// Upper bound for `voltage`, in volts.
    pub voltage_max: f64,
    /// Allowed relative deviation of `power` from `current × voltage`.
    pub power_tolerance: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            current_max: 1000.0,
            voltage_max: 10000.0,
            power_tolerance: 0.05,
        }
    }
}

/// Outlier thresholds for anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    /// Fence distance in IQRs beyond Q1 / Q3.
    pub iqr_multiplier: f64,
    /// Absolute z-score above which a value is flagged.
    pub zscore_limit: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            iqr_multiplier: 1.5,
            zscore_limit: 3.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// Everything the CLI lets a user override, read from a TOML file:
///
/// ```toml
/// [limits]
/// current_max = 50.0
/// power_tolerance = 0.02
///
/// [anomaly]
/// zscore_limit = 2.5
/// ```
///
/// Missing keys fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub limits: ValidationLimits,
    pub anomaly: AnomalyThresholds,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing analysis config")
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded analysis config from {}: {config:?}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = AnalysisConfig::from_toml_str(
            "[limits]\ncurrent_max = 50.0\n\n[anomaly]\nzscore_limit = 2.5\n",
        )
        .unwrap();
        assert_eq!(cfg.limits.current_max, 50.0);
        assert_eq!(cfg.limits.voltage_max, 10000.0);
        assert_eq!(cfg.limits.power_tolerance, 0.05);
        assert_eq!(cfg.anomaly.zscore_limit, 2.5);
        assert_eq!(cfg.anomaly.iqr_multiplier, 1.5);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(AnalysisConfig::from_toml_str("").unwrap(), AnalysisConfig::default());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(AnalysisConfig::from_toml_str("[limits]\ncurrent_max = \"high\"\n").is_err());
    }
}
