//! Execution timeout estimation.
//!
//! Estimates how long a notebook is allowed to run before the executor
//! gives up on it. Rules are matched in table order (first match wins);
//! artifacts matching no rule fall back to the base duration. The table is
//! calibration data and ships in the configuration, not in code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TimeoutConfig;

/// A single timeout calibration rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutRule {
    /// Case-insensitive substring matched against the artifact name and its
    /// source content.
    pub pattern: String,
    /// Timeout granted when the pattern matches (seconds).
    pub timeout_secs: u64,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Estimator for per-artifact execution timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutEstimator {
    base: Duration,
    rules: Vec<TimeoutRule>,
}

impl Default for TimeoutEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutEstimator {
    /// Create an estimator with the built-in calibration table.
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(DEFAULT_BASE_TIMEOUT_SECS),
            rules: default_rules(),
        }
    }

    /// Create an estimator from a timeout configuration section.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_secs),
            rules: config.rules.clone(),
        }
    }

    /// Estimate the execution timeout for an artifact.
    ///
    /// `name` is the artifact identifier (usually the file name), `content`
    /// its source text. Callers that cannot read the artifact pass an empty
    /// `content`; name matching still applies. This function never fails.
    pub fn estimate(&self, name: &str, content: &str) -> Duration {
        let name = name.to_lowercase();
        let content = content.to_lowercase();
        for rule in &self.rules {
            if rule.pattern.is_empty() {
                continue;
            }
            let pattern = rule.pattern.to_lowercase();
            if name.contains(&pattern) || content.contains(&pattern) {
                return Duration::from_secs(rule.timeout_secs);
            }
        }
        self.base
    }

    /// Fallback duration used when no rule matches.
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Get all rules.
    pub fn rules(&self) -> &[TimeoutRule] {
        &self.rules
    }
}

/// Default base timeout when no rule matches (seconds).
pub const DEFAULT_BASE_TIMEOUT_SECS: u64 = 300;

/// Built-in calibration rules.
///
/// Starting points only; deployments tune these through the `timeouts`
/// config section.
pub fn default_rules() -> Vec<TimeoutRule> {
    vec![
        TimeoutRule {
            pattern: "pip install".to_string(),
            timeout_secs: 1500,
            description: Some("Dependency installs wait on the network".to_string()),
        },
        TimeoutRule {
            pattern: "conda install".to_string(),
            timeout_secs: 1500,
            description: Some("Dependency installs wait on the network".to_string()),
        },
        TimeoutRule {
            pattern: ".fit(".to_string(),
            timeout_secs: 3600,
            description: Some("Model training dominates runtime".to_string()),
        },
        TimeoutRule {
            pattern: "epochs".to_string(),
            timeout_secs: 3600,
            description: Some("Training loops dominate runtime".to_string()),
        },
    ]
}
