// common/src/config.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use config::{Config as ConfigFile, File, Environment};

use crate::errors::ShellError;

/// The only hostname the loopback channel is ever bound to and pinned for
pub const LOOPBACK_HOSTNAME: &str = "localhost";
/// Presence of this file in the working directory switches on development mode
pub const DEV_MARKER_FILE: &str = "local_dev_marker";

const MIN_KEY_BITS: u32 = 2048;
const MIN_TOKEN_BYTES: usize = 32;

/// Central configuration for the shell and its loopback server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub window: WindowConfig,
    /// Local development tooling only. Allows the shared secret to be logged.
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub hostname: String,
    pub bind_addr: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    pub workers: usize,
    /// Seconds given to in-flight requests on shutdown
    pub shutdown_timeout: u64,
}

/// Which request channels carry the shared secret
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Custom header on every request, 403 on failure
    Header,
    /// Query parameter on first navigation, then cookie; 401 on failure
    QueryCookie,
    /// Any of the above with identical validation
    Combined,
}

impl AuthMode {
    pub fn accepts_header(&self) -> bool {
        matches!(self, AuthMode::Header | AuthMode::Combined)
    }

    pub fn accepts_query_and_cookie(&self) -> bool {
        matches!(self, AuthMode::QueryCookie | AuthMode::Combined)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Header => write!(f, "header"),
            AuthMode::QueryCookie => write!(f, "query_cookie"),
            AuthMode::Combined => write!(f, "combined"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub header_name: String,
    pub query_param: String,
    pub cookie_name: String,
    pub cookie_max_age: i64,
    pub token_bytes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub key_bits: u32,
    pub validity_days: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                hostname: LOOPBACK_HOSTNAME.to_string(),
                bind_addr: "127.0.0.1".to_string(),
                port: 0,
                workers: 2,
                shutdown_timeout: 5,
            },
            auth: AuthConfig {
                mode: AuthMode::Header,
                header_name: "X-App-Csrf-Token".to_string(),
                query_param: "authKey".to_string(),
                cookie_name: "Auth".to_string(),
                cookie_max_age: 86400,
                token_bytes: MIN_TOKEN_BYTES,
            },
            identity: IdentityConfig {
                key_bits: MIN_KEY_BITS,
                validity_days: 365,
            },
            window: WindowConfig {
                title: "Loopback Shell".to_string(),
                width: 800,
                height: 600,
            },
            dev_mode: false,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "production"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "production".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let defaults = ConfigFile::try_from(&Config::default())?;

        let mut config: Config = ConfigFile::builder()
            // Start with compiled-in defaults so partial files are enough
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add environment specific config
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            // Add a local config file for local overrides
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment variables with prefix "APP"
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        if Path::new(DEV_MARKER_FILE).exists() {
            config.dev_mode = true;
        }

        Ok(config)
    }

    /// Load from files, falling back to a few plain environment variables
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            },
            Err(e) => {
                tracing::warn!("Failed to load configuration from files: {}", e);
                tracing::info!("Falling back to environment variables only");

                let mut config = Self::default();

                if let Some(port) = env::var("SERVER_PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
                    config.server.port = port;
                }

                config.auth.mode = match env::var("AUTH_MODE").map(|v| v.to_lowercase()).as_deref() {
                    Ok("query_cookie") => AuthMode::QueryCookie,
                    Ok("combined") => AuthMode::Combined,
                    _ => AuthMode::Header,
                };

                config.dev_mode = env::var("DEV_MODE")
                    .map(|v| v.to_lowercase() == "true")
                    .unwrap_or(false)
                    || Path::new(DEV_MARKER_FILE).exists();

                config
            }
        }
    }

    /// Reject settings that would weaken the loopback channel
    pub fn validate(&self) -> Result<(), ShellError> {
        if self.server.hostname != LOOPBACK_HOSTNAME {
            return Err(ShellError::Config(format!(
                "hostname must be {}, got {}",
                LOOPBACK_HOSTNAME, self.server.hostname
            )));
        }
        let loopback = self
            .server
            .bind_addr
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false);
        if !loopback {
            return Err(ShellError::Config(format!(
                "bind address must be a loopback IP, got {}",
                self.server.bind_addr
            )));
        }
        if self.identity.key_bits < MIN_KEY_BITS {
            return Err(ShellError::Config(format!(
                "RSA keys must be at least {} bits, got {}",
                MIN_KEY_BITS, self.identity.key_bits
            )));
        }
        if self.auth.token_bytes < MIN_TOKEN_BYTES {
            return Err(ShellError::Config(format!(
                "tokens need at least {} bytes of entropy, got {}",
                MIN_TOKEN_BYTES, self.auth.token_bytes
            )));
        }
        if self.auth.cookie_max_age <= 0 {
            return Err(ShellError::Config("cookie max-age must be positive".to_string()));
        }
        if self.identity.validity_days == 0 {
            return Err(ShellError::Config("certificate validity must be at least one day".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.mode, AuthMode::Header);
        assert_eq!(config.server.hostname, "localhost");
    }

    #[test]
    fn test_rejects_weak_settings() {
        let mut config = Config::default();
        config.identity.key_bits = 1024;
        assert!(matches!(config.validate(), Err(ShellError::Config(_))));

        let mut config = Config::default();
        config.auth.token_bytes = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.hostname = "example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind_addr = "0.0.0.0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_mode_channels() {
        assert!(AuthMode::Header.accepts_header());
        assert!(!AuthMode::Header.accepts_query_and_cookie());
        assert!(!AuthMode::QueryCookie.accepts_header());
        assert!(AuthMode::Combined.accepts_header());
        assert!(AuthMode::Combined.accepts_query_and_cookie());
    }

    #[test]
    fn test_auth_mode_deserializes_snake_case() {
        let mode: AuthMode = serde_json::from_str("\"query_cookie\"").unwrap();
        assert_eq!(mode, AuthMode::QueryCookie);
    }
}
