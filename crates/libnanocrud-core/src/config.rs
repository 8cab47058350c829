use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NanocrudError;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 9080;
/// Default quiet period before a detected change is staged
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;
/// Default interval for the polling watcher fallback
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default snapshot commit message
pub const DEFAULT_SNAPSHOT_MESSAGE: &str = "nanocrud snapshot";

/// Server configuration, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Data directory; also the root of the version-control repository
    pub data: PathBuf,
    /// Accepted bearer tokens; no auth when absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    /// CORS origin, `*` for any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Identity recorded on snapshot commits
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Commit author identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "nanocrud".to_string(),
            email: "nanocrud@localhost".to_string(),
        }
    }
}

/// Snapshot trigger policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Also snapshot on a fixed interval (signal-only when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default = "default_message")]
    pub message: String,
    /// Take a final snapshot during graceful shutdown
    #[serde(default = "default_true")]
    pub on_shutdown: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            message: default_message(),
            on_shutdown: true,
        }
    }
}

impl SnapshotConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Change watcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_message() -> String {
    DEFAULT_SNAPSHOT_MESSAGE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl ServerConfig {
    /// Minimal config for a data directory, everything else defaulted
    pub fn new(data: impl Into<PathBuf>) -> Self {
        Self {
            data: data.into(),
            keys: None,
            origin: None,
            log_level: None,
            port: None,
            author: Author::default(),
            snapshot: SnapshotConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn origin(&self) -> &str {
        self.origin.as_deref().unwrap_or("*")
    }

    /// Configured bearer tokens, empty when auth is off
    pub fn keys(&self) -> &[String] {
        self.keys.as_deref().unwrap_or_default()
    }
}

/// Load config from a `.toml` file, or JSON for any other extension
pub fn load_config(path: &Path) -> Result<ServerConfig, NanocrudError> {
    let content = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config: ServerConfig = if is_toml {
        toml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    if config.data.as_os_str().is_empty() {
        return Err(NanocrudError::invalid("config 'data' must not be empty"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"data": "./db", "keys": ["secret"], "logLevel": "debug", "port": 8000,
                "author": {"name": "Ops", "email": "ops@example.com"}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.data, PathBuf::from("./db"));
        assert_eq!(config.keys(), ["secret".to_string()]);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.port(), 8000);
        assert_eq!(config.origin(), "*");
        assert_eq!(config.author.name, "Ops");
        assert!(config.snapshot.on_shutdown);
        assert_eq!(config.watch.debounce_ms, DEFAULT_DEBOUNCE_MS);
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nanocrud.toml");
        std::fs::write(
            &path,
            r#"
data = "/srv/db"
origin = "https://app.example.com"

[snapshot]
intervalSecs = 60
onShutdown = false

[watch]
debounceMs = 50
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.origin(), "https://app.example.com");
        assert_eq!(config.snapshot.interval(), Some(Duration::from_secs(60)));
        assert!(!config.snapshot.on_shutdown);
        assert_eq!(config.snapshot.message, DEFAULT_SNAPSHOT_MESSAGE);
        assert_eq!(config.watch.debounce(), Duration::from_millis(50));
        assert_eq!(config.author, Author::default());
        assert_eq!(config.port(), DEFAULT_PORT);
        assert!(config.keys().is_empty());
    }

    #[test]
    fn test_missing_data_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 1}"#).unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, r#"{"data": ""}"#).unwrap();
        assert!(load_config(&path).is_err());
    }
}
