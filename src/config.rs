//! Configuration file support for leafspy-relay
//!
//! Reads `leafspy.toml` (path overridable on the command line), then lets
//! environment variables (including a `.env` file) override single values.

use crate::relay::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "leafspy.toml";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// leaf-status.com relay
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Worker threads pulling requests off the listener
    pub workers: usize,
    /// Directory served under /static/
    pub static_dir: PathBuf,
    /// Certificate and key, only honoured when built with the `tls` feature
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
            static_dir: PathBuf::from("static"),
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("leafspy.db"),
            pool_size: 5,
        }
    }
}

/// Relay credentials; leaving either unset disables the relay
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub base_url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user: None,
            pass: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub gmaps_api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Also write logs to this file
    pub file: Option<PathBuf>,
    /// Used when RUST_LOG is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Config {
    /// Load config from `path` and apply environment overrides.
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "relay.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        if let Some(path) = get("LEAFSPY_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = get("LEAFSPY_HTTP_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                var: "LEAFSPY_HTTP_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(file) = get("LEAFSPY_LOG_FILE") {
            self.log.file = Some(PathBuf::from(file));
        }
        if let Some(user) = get("LEAFSTATUS_USER") {
            self.relay.user = Some(user);
        }
        if let Some(pass) = get("LEAFSTATUS_PASS") {
            self.relay.pass = Some(pass);
        }
        if let Some(key) = get("GMAPS_APIKEY") {
            self.display.gmaps_api_key = Some(key);
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, PathBuf::from("leafspy.db"));
        assert_eq!(config.relay.timeout_secs, 10);
        assert_eq!(config.relay.base_url, DEFAULT_BASE_URL);
        assert!(config.relay.user.is_none());
        assert_eq!(config.server_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9443
workers = 2

[server.tls]
cert = "certs/server.crt"
key = "certs/server.key"

[relay]
user = "me@example.com"
pass = "secret"

[display]
gmaps_api_key = "abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(
            config.server.tls.as_ref().map(|t| t.cert.clone()),
            Some(PathBuf::from("certs/server.crt"))
        );
        assert_eq!(config.relay.user.as_deref(), Some("me@example.com"));
        assert_eq!(config.relay.timeout_secs, 10);
        assert_eq!(config.display.gmaps_api_key.as_deref(), Some("abc"));
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::from_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("leafspy.toml");
        std::fs::write(&path, "[server]\nport = \"high\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LEAFSPY_DB_PATH", "/var/lib/leafspy/data.db"),
            ("LEAFSPY_HTTP_PORT", "8181"),
            ("LEAFSTATUS_USER", "driver"),
            ("LEAFSTATUS_PASS", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/var/lib/leafspy/data.db"));
        assert_eq!(config.server.port, 8181);
        assert_eq!(config.relay.user.as_deref(), Some("driver"));
        // empty values are ignored
        assert!(config.relay.pass.is_none());
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|var| (var == "LEAFSPY_HTTP_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LEAFSPY_HTTP_PORT"));
    }

    #[test]
    fn test_zero_relay_timeout_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("leafspy.toml");
        std::fs::write(&path, "[relay]\ntimeout_secs = 0\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "relay.timeout_secs", .. }));
        assert!(Config::default().validate().is_ok());
    }
}
