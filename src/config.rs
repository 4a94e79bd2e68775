use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::SyncSettings;
use crate::network::SocketOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";

pub const ENV_SERVER_URL: &str = "CHAT_SERVER_URL";
pub const ENV_USER_ID: &str = "CHAT_USER_ID";
pub const ENV_USER_NAME: &str = "CHAT_USER_NAME";
pub const ENV_TOKEN: &str = "CHAT_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    pub user_id: String,
    pub user_name: String,
    pub token: String,
    pub typing_timeout_ms: u64,
    pub peer_typing_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            user_id: String::new(),
            user_name: String::new(),
            token: String::new(),
            typing_timeout_ms: 1000,
            peer_typing_timeout_ms: 3000,
            handshake_timeout_ms: 10_000,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl AppConfig {
    /// Apply `CHAT_*` variables from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overwrite identity and endpoint fields with whatever `lookup` yields.
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (ENV_SERVER_URL, &mut self.server_url),
            (ENV_USER_ID, &mut self.user_id),
            (ENV_USER_NAME, &mut self.user_name),
            (ENV_TOKEN, &mut self.token),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
                *field = value;
            }
        }
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            server_url: self.server_url.clone(),
            user_id: self.user_id.clone(),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            typing_timeout: Duration::from_millis(self.typing_timeout_ms),
            peer_typing_timeout: Duration::from_millis(self.peer_typing_timeout_ms),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
