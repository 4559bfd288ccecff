pub mod api;
pub mod auth;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod server;
pub mod webhook;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::HookError;
use crate::interpreter::InterpreterPool;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3080";
pub const DEFAULT_SCRIPT_ROOT: &str = "scripts";
pub const DEFAULT_HOSTING: &str = "gitlab";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct HookConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// May be left out of the file when `HOOK_SECRET` supplies it.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_script_root")]
    pub script_root: PathBuf,
    #[serde(default = "default_hosting")]
    pub default_hosting: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    pub tls: Option<TlsConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub directory: PathBuf,
    #[serde(default)]
    pub rotation: logging::LogRotation,
    pub max_files: Option<usize>,
}

fn default_addr() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_script_root() -> PathBuf {
    PathBuf::from(DEFAULT_SCRIPT_ROOT)
}

fn default_hosting() -> String {
    DEFAULT_HOSTING.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl HookConfig {
    /// Minimal config for a secret and script root, everything else defaulted.
    pub fn new(secret: impl Into<String>, script_root: impl Into<PathBuf>) -> Self {
        Self {
            addr: default_addr(),
            secret: secret.into(),
            script_root: script_root.into(),
            default_hosting: default_hosting(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            tls: None,
            log: None,
        }
    }

    /// Applies `BIND_ADDRESS` and `HOOK_SECRET` from the environment, when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.addr = addr;
        }
        if let Some(secret) = lookup("HOOK_SECRET") {
            self.secret = secret;
        }
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<HookConfig, HookError> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        HookError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    parse_config(&config_str).map_err(|e| {
        HookError::ConfigError(format!("Failed to parse config file '{}': {}", path.display(), e))
    })
}

pub fn parse_config(config_str: &str) -> Result<HookConfig, HookError> {
    Ok(toml::from_str(config_str)?)
}

pub struct AppState {
    pub config: HookConfig,
    pub pool: Arc<InterpreterPool>,
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(r#"secret = "s1""#).unwrap();
        assert_eq!(config.addr, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.secret, "s1");
        assert_eq!(config.script_root, PathBuf::from("scripts"));
        assert_eq!(config.default_hosting, "gitlab");
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.tls.is_none());
        assert!(config.log.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
            addr = "0.0.0.0:8443"
            secret = "s1"
            script_root = "/srv/hooks"
            default_hosting = "github"
            max_body_bytes = 1024

            [tls]
            cert = "cert.pem"
            key = "key.pem"

            [log]
            directory = "logs"
            rotation = "hourly"
            max_files = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:8443");
        assert_eq!(config.default_hosting, "github");
        assert_eq!(config.max_body_bytes, 1024);
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert, PathBuf::from("cert.pem"));
        let log = config.log.unwrap();
        assert_eq!(log.rotation, logging::LogRotation::Hourly);
        assert_eq!(log.max_files, Some(3));
    }

    #[test]
    fn secret_can_come_from_the_environment_alone() {
        let mut config = parse_config(r#"addr = "127.0.0.1:1""#).unwrap();
        assert_eq!(config.secret, "");

        config.apply_overrides(|name| (name == "HOOK_SECRET").then(|| "from-env".to_string()));
        assert_eq!(config.secret, "from-env");
        assert_eq!(config.addr, "127.0.0.1:1");
    }

    #[test]
    fn bind_address_override_wins_over_file() {
        let mut config = parse_config(r#"secret = "s1""#).unwrap();
        config.apply_overrides(|name| (name == "BIND_ADDRESS").then(|| "0.0.0.0:9000".to_string()));
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.secret, "s1");
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = parse_config("secret = ").unwrap_err();
        assert!(matches!(err, HookError::TomlParseError(_)));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, HookError::ConfigError(_)));
    }
}
