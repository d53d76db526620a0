//! Configuration system for the `OpsDesk` presence client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/opsdesk/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::client::{DEFAULT_CHANNEL_CAPACITY, PresenceConfig};
use crate::connection::machine::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::connection::{ReconnectPolicy, RegistrationInfo};
use crate::focus::DEFAULT_SCROLL_THRESHOLD_PX;
use crate::transport::websocket::DEFAULT_CONNECT_TIMEOUT;

/// Relay used when nothing else is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9000/ws";

/// Role announced when none is configured.
pub const DEFAULT_USER_TYPE: &str = "agent";

/// Errors that can occur when loading configuration.
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

    /// The relay URL is not a `ws://` or `wss://` URL.
    #[error("invalid relay url {url:?}: {reason}")]
    InvalidRelayUrl {
        /// The configured value.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No username was configured.
    #[error("no username configured (use --username, OPSDESK_USERNAME or [identity] username)")]
    MissingIdentity,
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    identity: IdentityFileConfig,
    chat: ChatFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    relay_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    username: Option<String>,
    user_type: Option<String>,
    log_id: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    echo_own_broadcasts: Option<bool>,
    scroll_threshold_px: Option<f64>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Relay server WebSocket URL.
    pub relay_url: String,
    /// Timeout for one dial of the relay.
    pub connect_timeout: Duration,
    /// Reconnection attempts after a loss.
    pub max_retries: u32,
    /// Delay before each reconnection attempt.
    pub retry_delay: Duration,
    /// Capacity of the inbound envelope channel.
    pub channel_capacity: usize,

    // -- Identity --
    /// Local username.
    pub username: Option<String>,
    /// Local user role.
    pub user_type: String,
    /// Login session identifier; generated when absent.
    pub log_id: Option<String>,

    // -- Chat --
    /// Log our own relayed broadcasts under `"all"`.
    pub echo_own_broadcasts: bool,
    /// Auto-scroll threshold in pixels.
    pub scroll_threshold_px: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            username: None,
            user_type: DEFAULT_USER_TYPE.to_string(),
            log_id: None,
            echo_own_broadcasts: false,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// any config file cannot be parsed, or the resolved relay URL is not a
    /// WebSocket URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        validate_relay_url(&config.relay_url)?;
        Ok(config)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.network.relay_url.clone())
                .unwrap_or(defaults.relay_url),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            max_retries: cli
                .max_retries
                .or(file.network.max_retries)
                .unwrap_or(defaults.max_retries),
            retry_delay: file
                .network
                .retry_delay_ms
                .map_or(defaults.retry_delay, Duration::from_millis),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            username: cli
                .username
                .clone()
                .or_else(|| file.identity.username.clone())
                .filter(|name| !name.trim().is_empty()),
            user_type: cli
                .user_type
                .clone()
                .or_else(|| file.identity.user_type.clone())
                .unwrap_or(defaults.user_type),
            log_id: cli
                .log_id
                .clone()
                .or_else(|| file.identity.log_id.clone()),
            echo_own_broadcasts: file
                .chat
                .echo_own_broadcasts
                .unwrap_or(defaults.echo_own_broadcasts),
            scroll_threshold_px: file
                .chat
                .scroll_threshold_px
                .unwrap_or(defaults.scroll_threshold_px),
        }
    }

    /// Build the [`PresenceConfig`] for a login.
    ///
    /// A missing `log_id` is replaced by a fresh UUID v7.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingIdentity`] if no username is set.
    pub fn to_presence_config(&self) -> Result<PresenceConfig, ConfigError> {
        let username = self.username.clone().ok_or(ConfigError::MissingIdentity)?;
        let log_id = self
            .log_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        Ok(PresenceConfig {
            registration: RegistrationInfo {
                username,
                user_type: self.user_type.clone(),
                log_id,
            },
            reconnect: ReconnectPolicy {
                max_retries: self.max_retries,
                delay: self.retry_delay,
            },
            echo_own_broadcasts: self.echo_own_broadcasts,
            scroll_threshold_px: self.scroll_threshold_px,
            channel_capacity: self.channel_capacity,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "OpsDesk presence and messaging console")]
pub struct CliArgs {
    /// WebSocket URL of the relay server.
    #[arg(long, env = "OPSDESK_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Username to register with.
    #[arg(long, env = "OPSDESK_USERNAME")]
    pub username: Option<String>,

    /// Role announced to the relay (agent, teamleader, ...).
    #[arg(long, env = "OPSDESK_USER_TYPE")]
    pub user_type: Option<String>,

    /// Login session identifier (default: a fresh UUID).
    #[arg(long, env = "OPSDESK_LOG_ID")]
    pub log_id: Option<String>,

    /// Reconnection attempts after a lost connection.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Path to config file (default: `~/.config/opsdesk/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "OPSDESK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/opsdesk.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Check that `raw` is an absolute `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidRelayUrl`] otherwise.
pub fn validate_relay_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRelayUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("opsdesk").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
