use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;

fn default_workers() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

/// Recognized topology options, loaded from a JSON config file.
///
/// Every option must be a positive integer; violations are configuration
/// errors at startup, never at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Task instances per stage; stages not listed run one instance
    #[serde(default)]
    pub parallelism: BTreeMap<String, usize>,

    /// Worker count for a pooled submission
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-tuple processing deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            parallelism: BTreeMap::new(),
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TopologyConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject non-positive option values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositive {
                option: "workers".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::NotPositive {
                option: "timeout_secs".to_string(),
            });
        }
        for (stage, &parallelism) in &self.parallelism {
            if parallelism == 0 {
                return Err(ConfigError::NotPositive {
                    option: format!("parallelism.{stage}"),
                });
            }
        }
        Ok(())
    }

    /// Configured parallelism for a stage, defaulting to one instance
    pub fn parallelism_for(&self, stage: &str) -> usize {
        self.parallelism.get(stage).copied().unwrap_or(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
