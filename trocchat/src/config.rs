//! Client-side configuration.
//!
//! Loaded from a TOML file (`~/.config/trocchat/config.toml`) with
//! compiled defaults for anything the file omits. The embedding app
//! (mobile shell, web view, CLI) supplies the bearer token at connect
//! time; it never lives in the config file.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// TOML file structure (all fields optional for partial overrides).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientConfigFile {
    server_url: Option<String>,
    send_timeout_secs: Option<u64>,
    typing_expiry_secs: Option<u64>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway WebSocket URL (e.g. `ws://localhost:9100/ws`).
    pub server_url: String,
    /// How long a send waits for its ack before being reported as timed
    /// out.
    pub send_timeout: Duration,
    /// How long a typing indicator stays visible without a refresh.
    ///
    /// The gateway never synthesizes a stop event, so stale indicators
    /// are expired client-side with this timeout.
    pub typing_expiry: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:9100/ws".to_string(),
            send_timeout: Duration::from_secs(10),
            typing_expiry: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the given file, or from the default
    /// location when `path` is `None`. A missing default file yields the
    /// compiled defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicitly given file cannot be
    /// read, or if any file fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    fn resolve(file: &ClientConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            server_url: file
                .server_url
                .clone()
                .unwrap_or(defaults.server_url),
            send_timeout: file
                .send_timeout_secs
                .map_or(defaults.send_timeout, Duration::from_secs),
            typing_expiry: file
                .typing_expiry_secs
                .map_or(defaults.typing_expiry, Duration::from_secs),
        }
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ClientConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ClientConfigFile::default());
        };
        config_dir.join("trocchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
