//! Relay core configuration
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHRELAY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshrelay/config.toml
//!   3. ~/.config/meshrelay/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub dispatch: DispatchConfig,
    pub chunking: ChunkingConfig,
    pub offline: OfflineConfig,
    pub directory: DirectoryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of relay workers
    pub workers: usize,
    /// Capacity of the intake queue shared by all workers
    pub intake_capacity: usize,
    /// How long a chunk may wait for its delivery confirmation
    pub ack_timeout_secs: u64,
    /// Granularity of the ack deadline ticker
    pub ack_tick_ms: u64,
    /// Upper bound on a single radio transmit call
    pub transmit_timeout_ms: u64,
    /// Minimum spacing between chunk transmissions. 0 = unpaced.
    pub chunk_interval_ms: u64,
    /// Wrap payloads with a "Relay from" header and reply hint
    pub frame_payload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum payload bytes per radio packet
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Queued relays kept per recipient before the oldest is evicted
    pub per_recipient_capacity: usize,
    /// Re-delivery attempts granted to a queued relay
    pub max_attempts: u32,
    /// How long a queued relay is kept
    pub hold_time_secs: u64,
    /// How often expired entries are purged
    pub expiry_sweep_secs: u64,
    /// Tell the original sender when a queued relay is finally dropped
    pub notify_on_drop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// How often the shortname directory is rebuilt from the node table
    pub refresh_secs: u64,
    /// A node heard within this window counts as active
    pub active_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite URL, e.g. `sqlite://meshrelay.db` or `sqlite::memory:`
    pub database_url: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            intake_capacity: 100,
            ack_timeout_secs: 20,
            ack_tick_ms: 250,
            transmit_timeout_ms: 2_000,
            chunk_interval_ms: 500,
            frame_payload: true,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 200,
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            per_recipient_capacity: 10,
            max_attempts: 3,
            hold_time_secs: 24 * 60 * 60,
            expiry_sweep_secs: 60,
            notify_on_drop: false,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 30,
            active_window_secs: 30 * 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite://{}", data_dir().join("meshrelay.db").display()),
        }
    }
}

// ── Duration accessors ────────────────────────────────────────────────────────

impl DispatchConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn ack_tick(&self) -> Duration {
        Duration::from_millis(self.ack_tick_ms.max(1))
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_millis(self.transmit_timeout_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

impl OfflineConfig {
    pub fn hold_time(&self) -> Duration {
        Duration::from_secs(self.hold_time_secs)
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_secs.max(1))
    }
}

impl DirectoryConfig {
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RelayConfig {
    /// Load config with env overrides.
    pub fn load() -> ConfigResult<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("MESHRELAY_DB") {
            config.storage.database_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid("dispatch.workers must be > 0".into()));
        }
        if self.dispatch.intake_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.intake_capacity must be > 0".into(),
            ));
        }
        if self.chunking.max_chunk_bytes < 16 {
            return Err(ConfigError::Invalid(format!(
                "chunking.max_chunk_bytes must be at least 16, got {}",
                self.chunking.max_chunk_bytes
            )));
        }
        if self.offline.per_recipient_capacity == 0 {
            return Err(ConfigError::Invalid(
                "offline.per_recipient_capacity must be > 0".into(),
            ));
        }
        if self.offline.max_attempts == 0 {
            return Err(ConfigError::Invalid("offline.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

/// Config file path, respecting $MESHRELAY_CONFIG and XDG.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("MESHRELAY_CONFIG") {
        return PathBuf::from(p);
    }
    config_dir().join("config.toml")
}

pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("meshrelay");
    }
    home_dir().join(".config").join("meshrelay")
}

pub fn data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("meshrelay");
    }
    home_dir().join(".local").join("share").join("meshrelay")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
