use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::HttpChatBackend;

/// Client configuration, loaded from the user's config directory with
/// environment overrides for the endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat backend.
    pub backend_url: String,
    /// WebSocket URL of the telemetry feed.
    pub telemetry_url: String,
    /// Preferred model; the first listed model is used when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Fixed delay before a telemetry reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend_url: HttpChatBackend::default_base_url(),
            telemetry_url: "ws://localhost:3000/ws/telemetry".to_string(),
            model: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Config {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Get the path to the configuration file
pub fn get_config_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    let config_dir = home.join(".config").join("spare-cycles");
    std::fs::create_dir_all(&config_dir)?; // Ensure directory exists
    Ok(config_dir.join("config.json"))
}

/// Load the configuration, falling back to defaults when the file is missing.
/// `SPARE_CYCLES_BACKEND_URL` and `SPARE_CYCLES_TELEMETRY_URL` override the
/// file.
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(config_path)?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };

    if let Ok(url) = std::env::var("SPARE_CYCLES_BACKEND_URL") {
        config.backend_url = url;
    }
    if let Ok(url) = std::env::var("SPARE_CYCLES_TELEMETRY_URL") {
        config.telemetry_url = url;
    }

    Ok(config)
}
