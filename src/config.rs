//! Configuration types for streamshot.

use serde::Deserialize;

use crate::framework::{Framework, HardwareHint};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Invoke configuration.
    #[serde(default)]
    pub invoke: InvokeConfig,
}

/// Model configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ModelConfig {
    /// Path to the model artifact.
    #[serde(default)]
    pub path: Option<String>,

    /// Explicit framework; inferred from the file extension when absent.
    #[serde(default)]
    pub framework: Option<Framework>,

    /// Hardware affinity.
    #[serde(default)]
    pub hardware: HardwareHint,
}

/// Invoke configuration.
#[derive(Debug, Deserialize)]
pub struct InvokeConfig {
    /// Maximum time to wait for an output frame, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> crate::error::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}
