//! Configuration storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:4000/api";
const DEFAULT_SOCKET_URL: &str = "http://localhost:4000";
const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_ACK_TIMEOUT_SECS: u64 = 10;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API base URL (the `/chat/...` routes hang off it)
    pub api_url: String,
    /// Socket.IO server base URL
    pub socket_url: String,
    /// Id of the signed-in user; scopes the realtime connection
    pub user_id: Option<String>,
    /// Bearer token forwarded to the REST API, if the deployment needs one
    pub access_token: Option<String>,
    /// Page size for message history
    pub history_limit: usize,
    /// How long a send waits for its acknowledgement
    pub ack_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            user_id: None,
            access_token: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            ack_timeout_secs: DEFAULT_ACK_TIMEOUT_SECS,
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "sellpoint", "sellpoint-chat")
            .context("Could not determine config directory")
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory for the TUI log file.
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Restrictive permissions: the file may hold an access token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(path)
    }

    /// The configured user, or an error telling how to set one.
    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .context("No user configured. Run 'sellpoint-chat configure --user-id <ID>' or pass --user.")
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.ack_timeout(), Duration::from_secs(10));
        assert!(config.require_user().is_err());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            user_id = "u1"
            socket_url = "https://rt.sellpoint.example"
            ack_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.require_user().unwrap(), "u1");
        assert_eq!(config.socket_url, "https://rt.sellpoint.example");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        // A zero timeout would fail every send; clamp to one second.
        assert_eq!(config.ack_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config {
            user_id: Some("u9".to_string()),
            access_token: Some("secret".to_string()),
            history_limit: 20,
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(Config::parse("history_limit = \"many\"").is_err());
    }
}
