use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
///
/// Every section falls back to its defaults when omitted from the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub outliers: OutlierConfig,
    pub regression: RegressionConfig,
    pub balance: BalanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Alpha used to flag significant tests and coefficients
    pub significance_level: f64,
    /// Confidence level of the proportion-test interval
    pub confidence_level: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            confidence_level: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub sigma_threshold: f64,
    pub min_impressions: u32,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            sigma_threshold: 3.0,
            min_impressions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Designed treatment share; enables the sample ratio check when set
    pub expected_treatment_share: Option<f64>,
    /// Run the covariate fits on scoped worker threads
    pub parallel: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            expected_treatment_share: None,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub output: String,
    /// Empty for stdout
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "pretty".to_string(),
            file_path: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variable or default path
    pub fn load() -> Result<Self> {
        let path = std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "config/analysis.toml".to_string());
        Self::from_file(path)
    }

    /// Reject values no analysis could run with
    pub fn validate(&self) -> Result<()> {
        let alpha = self.analysis.significance_level;
        if !(alpha > 0.0 && alpha < 1.0) {
            bail!("analysis.significance_level must be in (0, 1), got {}", alpha);
        }
        let confidence = self.analysis.confidence_level;
        if !(confidence > 0.0 && confidence < 1.0) {
            bail!("analysis.confidence_level must be in (0, 1), got {}", confidence);
        }
        if !(self.outliers.sigma_threshold > 0.0) {
            bail!("outliers.sigma_threshold must be positive, got {}", self.outliers.sigma_threshold);
        }
        if self.regression.max_iterations == 0 {
            bail!("regression.max_iterations must be at least 1");
        }
        if !(self.regression.tolerance > 0.0) {
            bail!("regression.tolerance must be positive, got {}", self.regression.tolerance);
        }
        if let Some(share) = self.balance.expected_treatment_share {
            if !(share > 0.0 && share < 1.0) {
                bail!("balance.expected_treatment_share must be in (0, 1), got {}", share);
            }
        }
        if !matches!(self.logging.output.as_str(), "pretty" | "json") {
            bail!("logging.output must be \"pretty\" or \"json\", got {:?}", self.logging.output);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_sample_config() {
        let config = Config::from_file("config/analysis.toml").unwrap();
        assert_eq!(config.analysis.significance_level, 0.05);
        assert_eq!(config.outliers.sigma_threshold, 3.0);
        assert_eq!(config.regression.max_iterations, 25);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("[outliers]\nsigma_threshold = 2.5\n").unwrap();
        assert_eq!(config.outliers.sigma_threshold, 2.5);
        assert_eq!(config.outliers.min_impressions, 1);
        assert_eq!(config.regression, RegressionConfig::default());
        assert!(config.balance.parallel);
        assert_eq!(config.balance.expected_treatment_share, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.analysis.significance_level = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.balance.expected_treatment_share = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.output = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.regression.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::from_file("config/does-not-exist.toml").unwrap_err();
        assert!(err.to_string().contains("does-not-exist.toml"));
    }
}
