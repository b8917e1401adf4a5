//! CLI configuration file handling.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for log files and failure screenshots.
    pub log_dir: PathBuf,
    /// Directory for persisted cookie jars.
    pub cookie_dir: PathBuf,
    /// Explicit Chrome/Chromium path; auto-detected when unset.
    pub chrome_path: Option<PathBuf>,
    /// Attach to a running browser instead of launching one.
    pub websocket_url: Option<String>,
    pub headless: bool,
    /// Apply a randomized mobile fingerprint on startup.
    pub mobile_emulation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            cookie_dir: PathBuf::from(crate::cookies::DEFAULT_COOKIE_DIR),
            chrome_path: None,
            websocket_url: None,
            headless: true,
            mobile_emulation: false,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("wispbrowser");
    path.push("config.yaml");
    Some(path)
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(Config::default()),
        },
    };

    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("headless: false\n").unwrap();
        assert!(!config.headless);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert!(config.chrome_path.is_none());
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = PathBuf::from("/nonexistent/wispbrowser-config.yaml");
        let config = load_config(Some(&path)).await.unwrap();
        assert!(config.headless);
    }
}
