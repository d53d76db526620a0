//! Relay settings.
//!
//! A `[server]` table read from `~/.config/opsdesk-relay/config.toml` (or
//! `--config`), then overlaid by command-line flags. The bind address is
//! parsed up front so a typo fails before anything starts listening.

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::relay::DEFAULT_MAX_FRAME_SIZE;

/// Listen address when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid relay config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid bind address {addr:?}: {source}")]
    BindAddr {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("max_frame_size must be at least one byte")]
    ZeroFrameSize,
}

/// The `[server]` table, with defaults for anything left out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerTable {
    pub bind_addr: String,
    pub max_frame_size: usize,
}

impl Default for ServerTable {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    server: ServerTable,
}

impl SettingsFile {
    fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// An explicit path must exist; the default one may be absent.
    fn read(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if !required && e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Command line of `opsdesk-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "OpsDesk presence relay")]
pub struct RelayArgs {
    /// Listen address, e.g. `127.0.0.1:9000`.
    #[arg(short, long, env = "OPSDESK_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Settings file (default: `~/.config/opsdesk-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted text frame in bytes; bigger frames are dropped.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "OPSDESK_RELAY_LOG")]
    pub log_level: String,
}

/// What the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub bind_addr: SocketAddr,
    pub max_frame_size: usize,
    pub log_level: String,
}

impl RelayArgs {
    /// Read the settings file and apply the flags on top.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]: an unreadable or malformed file, a bad bind
    /// address, or a zero frame limit.
    pub fn settings(&self) -> Result<RelaySettings, ConfigError> {
        let file = match (&self.config, default_settings_path()) {
            (Some(path), _) => SettingsFile::read(path, true)?,
            (None, Some(path)) => SettingsFile::read(&path, false)?,
            (None, None) => SettingsFile::default(),
        };
        self.overlay(file.server)
    }

    fn overlay(&self, mut server: ServerTable) -> Result<RelaySettings, ConfigError> {
        if let Some(bind) = &self.bind {
            server.bind_addr.clone_from(bind);
        }
        if let Some(limit) = self.max_frame_size {
            server.max_frame_size = limit;
        }
        if server.max_frame_size == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }
        let bind_addr = server
            .bind_addr
            .parse()
            .map_err(|source| ConfigError::BindAddr {
                addr: server.bind_addr.clone(),
                source,
            })?;
        Ok(RelaySettings {
            bind_addr,
            max_frame_size: server.max_frame_size,
            log_level: self.log_level.clone(),
        })
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("opsdesk-relay").join("config.toml"))
}
