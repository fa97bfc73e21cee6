use std::path::Path;

use crate::error::{DeployError, Result};
use crate::models::RolloutConfig;

pub const CONFIG_FILENAME: &str = ".rollout.yaml";

pub fn load(dir: &Path) -> Result<RolloutConfig> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Err(DeployError::ConfigNotFound(config_path));
    }
    let contents = std::fs::read_to_string(&config_path)?;
    let config: RolloutConfig =
        serde_yaml::from_str(&contents).map_err(|e| DeployError::InvalidConfig(e.to_string()))?;
    if config.endpoint_url.trim().is_empty() {
        return Err(DeployError::InvalidConfig(
            "endpoint_url must not be empty".into(),
        ));
    }
    if config.failure_markers.iter().any(|m| m.is_empty()) {
        return Err(DeployError::InvalidConfig(
            "failure_markers must not contain empty strings".into(),
        ));
    }
    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(dir: &Path) -> Result<RolloutConfig> {
    match load(dir) {
        Err(DeployError::ConfigNotFound(path)) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(RolloutConfig::default())
        }
        other => other,
    }
}
