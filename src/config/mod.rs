//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: config struct definitions (Config and its sections)
//! - [`defaults`]: serde default functions
//! - [`validation`]: startup validation

mod defaults;
mod types;
mod validation;

pub use types::{
    Config, ConfigError, DatabaseConfig, PlatformConfig, ServerConfig, StickyConfig,
    TicketsConfig, VoiceConfig,
};
pub use validation::{ValidationError, validate};
