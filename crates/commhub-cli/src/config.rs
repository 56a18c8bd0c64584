//! Configuration loading from `~/.commhub/config.toml` with defaults.

use commhub_types::config::HubConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load hub configuration from a TOML file, with defaults.
///
/// A missing, unreadable or unparsable file never stops the hub; it falls
/// back to [`HubConfig::default`] and says so in the log.
pub fn load_config(path: Option<&Path>) -> HubConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<HubConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    HubConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    commhub_home().join("config.toml")
}

/// Get the default CommHub home directory.
pub fn commhub_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".commhub")
}
