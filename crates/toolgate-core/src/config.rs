//! Tool-server registry configuration.
//!
//! The registry maps server names to launch instructions and is fixed for
//! the lifetime of a bridge. It can be built in code or loaded from a JSON
//! file (`~/.config/toolgate/servers.json` by default).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// How to launch one named tool-server subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to spawn.
    pub command: PathBuf,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable overrides, merged over the parent environment
    /// at spawn time.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    /// Config for a bare command with no arguments or env overrides.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Set the argument list.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Complete bridge configuration: the server registry plus timing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Named tool servers the bridge may spawn.
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Seconds to wait for graceful subprocess shutdown before SIGKILL.
    #[serde(default = "default_terminate_timeout_secs")]
    pub terminate_timeout_secs: u64,
}

const fn default_call_timeout_secs() -> u64 {
    30
}

const fn default_terminate_timeout_secs() -> u64 {
    5
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            call_timeout_secs: default_call_timeout_secs(),
            terminate_timeout_secs: default_terminate_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// Register a server, replacing any previous entry under the same name.
    #[must_use]
    pub fn with_server(mut self, name: impl Into<String>, config: ServerConfig) -> Self {
        self.servers.insert(name.into(), config);
        self
    }

    /// Per-request timeout as a `Duration`.
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Graceful-termination timeout as a `Duration`.
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// Load a registry file.
pub fn load_registry(path: &Path) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read registry {}: {e}", path.display()))
    })?;
    let config: BridgeConfig = serde_json::from_str(&contents)?;
    tracing::debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "Loaded server registry"
    );
    Ok(config)
}

/// Default registry path: `<config dir>/toolgate/servers.json`.
pub fn default_registry_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolgate").join("servers.json"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = BridgeConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.terminate_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parse_registry_json() {
        let json = r#"{
            "servers": {
                "db": {
                    "command": "db-server",
                    "args": ["--stdio"],
                    "env": {"CONN_STR": "postgres://localhost/dev"}
                },
                "errors": {"command": "error-tracker"}
            },
            "call_timeout_secs": 10
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.call_timeout_secs, 10);
        assert_eq!(config.terminate_timeout_secs, 5);

        let db = config.server("db").unwrap();
        assert_eq!(db.command, PathBuf::from("db-server"));
        assert_eq!(db.args, vec!["--stdio".to_string()]);
        assert_eq!(db.env.get("CONN_STR").unwrap(), "postgres://localhost/dev");

        let errors = config.server("errors").unwrap();
        assert!(errors.args.is_empty());
        assert!(errors.env.is_empty());
    }

    #[test]
    fn builder_registers_servers() {
        let config = BridgeConfig::default().with_server(
            "img",
            ServerConfig::new("img-server")
                .with_args(["--stdio"])
                .with_env("API_HOST", "api.example.com"),
        );
        let img = config.server("img").unwrap();
        assert_eq!(img.env.get("API_HOST").unwrap(), "api.example.com");
        assert!(config.server("missing").is_none());
    }

    #[test]
    fn load_registry_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers":{{"db":{{"command":"/usr/bin/db-server"}}}}}}"#
        )
        .unwrap();
        let config = load_registry(file.path()).unwrap();
        assert!(config.server("db").is_some());
    }

    #[test]
    fn load_registry_missing_file_is_config_error() {
        let err = load_registry(Path::new("/nonexistent/servers.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_registry_bad_json_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_registry(file.path()).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
