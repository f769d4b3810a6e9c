//! Config file load and save.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::types::ControllerConfig;

fn default_config_path() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join("config.json"))
}

pub async fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;
        let config: ControllerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", config_path))?;

        if config.servers.iter().all(|s| !s.enabled) {
            warn!("No enabled servers in {:?}. Nothing will be polled.", config_path);
        }

        info!("Loaded configuration from: {:?}", config_path);
        Ok(config)
    } else {
        warn!(
            "Config file not found at {:?}. Starting with defaults (no servers).",
            config_path
        );
        Ok(ControllerConfig::default())
    }
}

pub async fn save_config(config: &ControllerConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write config file {:?}", path))?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "idrac-controller-config-test-{}.json",
            std::process::id()
        ));

        let mut config = ControllerConfig::default();
        config.global.check_interval_seconds = 30;
        save_config(&config, &path).await.unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.global.check_interval_seconds, 30);
        assert!(loaded.servers.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("idrac-controller-no-such-config.json");
        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config.global.check_interval_seconds, 60);
    }
}
