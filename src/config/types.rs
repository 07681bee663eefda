//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Temporary voice room settings.
    pub voice: VoiceConfig,
    /// Support ticket settings.
    pub tickets: TicketsConfig,
    #[serde(default)]
    pub sticky: StickyConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Join-to-create voice rooms.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Lobby that spawns first-kind rooms (placed right below it).
    pub first_lobby: String,
    /// Lobby that spawns second-kind rooms.
    pub second_lobby: String,
    /// Channel or category whose overwrites seed first-kind rooms.
    #[serde(default)]
    pub first_permission_source: Option<String>,
    /// Channel or category whose overwrites seed second-kind rooms.
    #[serde(default)]
    pub second_permission_source: Option<String>,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// How long the owner must be gone before someone may take over.
    #[serde(default = "default_owner_grace_secs")]
    pub owner_grace_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Sticky notice kept at the bottom of first-kind rooms.
    #[serde(default = "default_companion_notice")]
    pub companion_notice: String,
    /// Role of the media bot toggled by the companion notice buttons.
    #[serde(default)]
    pub media_bot_role: Option<String>,
    /// Optional role held by whoever currently owns a room.
    #[serde(default)]
    pub owner_role: Option<String>,
}

impl VoiceConfig {
    pub fn owner_grace(&self) -> Duration {
        Duration::from_secs(self.owner_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Support tickets.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketsConfig {
    /// Category new ticket channels are created under.
    pub category: String,
    /// Channel receiving transcripts and archive summaries.
    pub archive_channel: String,
    pub admin_role: String,
    #[serde(default = "default_delete_delay_secs")]
    pub delete_delay_secs: u64,
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: String,
    #[serde(default = "default_transcript_retention_days")]
    pub transcript_retention_days: u64,
    /// Maximum length of the plaintext transcript preview, ellipsis included.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

impl TicketsConfig {
    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_secs)
    }

    pub fn transcript_retention(&self) -> Duration {
        Duration::from_secs(self.transcript_retention_days * 24 * 60 * 60)
    }
}

/// Sticky notice engine.
#[derive(Debug, Clone, Deserialize)]
pub struct StickyConfig {
    /// Channel quiet time before the notice is reposted.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

impl StickyConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Prometheus HTTP port. 0 disables the endpoint.
    #[serde(default)]
    pub metrics_port: u16,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl ServerConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: 0,
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Which platform backend drives the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Only `memory` ships in-tree.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Guild the memory backend seeds with the configured channels.
    #[serde(default)]
    pub guild_id: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            guild_id: String::new(),
        }
    }
}
