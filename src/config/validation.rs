//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingId(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("tickets.preview_limit must be at least 4, got {0}")]
    PreviewLimitTooSmall(usize),
    #[error("voice.first_lobby and voice.second_lobby must differ")]
    SameLobby,
    #[error("unknown platform backend '{0}'")]
    UnknownBackend(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let ids = [
        ("voice.first_lobby", &config.voice.first_lobby),
        ("voice.second_lobby", &config.voice.second_lobby),
        ("tickets.category", &config.tickets.category),
        ("tickets.archive_channel", &config.tickets.archive_channel),
        ("tickets.admin_role", &config.tickets.admin_role),
    ];
    for (name, value) in ids {
        if value.trim().is_empty() {
            errors.push(ValidationError::MissingId(name));
        }
    }
    if !config.voice.first_lobby.is_empty() && config.voice.first_lobby == config.voice.second_lobby {
        errors.push(ValidationError::SameLobby);
    }

    let durations = [
        ("voice.owner_grace_secs", config.voice.owner_grace_secs),
        ("voice.sweep_interval_secs", config.voice.sweep_interval_secs),
        ("sticky.debounce_secs", config.sticky.debounce_secs),
        ("server.reconcile_interval_secs", config.server.reconcile_interval_secs),
        ("tickets.transcript_retention_days", config.tickets.transcript_retention_days),
    ];
    for (name, value) in durations {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration(name));
        }
    }

    // Room for at least one character plus the ellipsis.
    if config.tickets.preview_limit < 4 {
        errors.push(ValidationError::PreviewLimitTooSmall(config.tickets.preview_limit));
    }

    if config.platform.backend != "memory" {
        errors.push(ValidationError::UnknownBackend(config.platform.backend.clone()));
    }

    let db_path = Path::new(&config.database.path);
    if config.database.path != ":memory:"
        && let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(config.database.path.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> String {
        r#"
[voice]
first_lobby = "100"
second_lobby = "101"

[tickets]
category = "200"
archive_channel = "201"
admin_role = "300"
"#
        .to_string()
    }

    #[test]
    fn test_valid_config_passes() {
        let config: Config = toml::from_str(&minimal_valid_config()).unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.voice.owner_grace_secs, 900);
        assert_eq!(config.voice.bitrate, 384_000);
        assert_eq!(config.sticky.debounce_secs, 7);
        assert_eq!(config.tickets.delete_delay_secs, 5);
        assert_eq!(config.database.path, "ephemerd.db");
        assert_eq!(config.platform.backend, "memory");
    }

    #[test]
    fn test_empty_ids_and_zero_durations_are_all_reported() {
        let toml = r#"
[voice]
first_lobby = ""
second_lobby = "101"
owner_grace_secs = 0

[tickets]
category = "200"
archive_channel = ""
admin_role = "300"
preview_limit = 2

[sticky]
debounce_secs = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingId("voice.first_lobby"))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingId("tickets.archive_channel"))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroDuration("voice.owner_grace_secs"))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroDuration("sticky.debounce_secs"))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::PreviewLimitTooSmall(2))));
    }

    #[test]
    fn test_unknown_backend_fails() {
        let toml = format!("{}\n[platform]\nbackend = \"gateway\"\n", minimal_valid_config());
        let config: Config = toml::from_str(&toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownBackend(_))));
    }
}
