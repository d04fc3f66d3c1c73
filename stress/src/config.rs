//! Stress test configuration file
//! 
//! The bearer configuration can be given as YAML or TOML; the format is
//! picked from the file extension.
//! 
//! ```yaml
//! rlc:
//!   mode: AM
//!   max_retx_thresh: 8
//!   t_poll_retx: 10
//! ```

use anyhow::{anyhow, Context};
use layers::rlc::RlcConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StressConfig {
    /// Bearer configuration used on both RLC instances
    pub rlc: RlcConfig,
}

impl StressConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: StressConfig = serde_yaml::from_str(contents)?;
        config.rlc.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: StressConfig = toml::from_str(contents)?;
        config.rlc.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            Some("toml") => Self::from_toml_str(&contents),
            _ => Err(anyhow!("Unsupported configuration format: {}", path.display())),
        }
    }
}
