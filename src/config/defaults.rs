//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Database Defaults
// =============================================================================

pub fn default_database_path() -> String {
    "ephemerd.db".to_string()
}

// =============================================================================
// Voice Defaults
// =============================================================================

pub fn default_bitrate() -> u32 {
    384_000
}

/// 15 minutes.
pub fn default_owner_grace_secs() -> u64 {
    900
}

pub fn default_sweep_interval_secs() -> u64 {
    120
}

pub fn default_companion_notice() -> String {
    "Want some music in here? Press **Add music bot** to let the media bot join this room."
        .to_string()
}

// =============================================================================
// Ticket Defaults
// =============================================================================

pub fn default_delete_delay_secs() -> u64 {
    5
}

pub fn default_transcript_dir() -> String {
    "transcripts".to_string()
}

/// Roughly six months.
pub fn default_transcript_retention_days() -> u64 {
    182
}

pub fn default_preview_limit() -> usize {
    1000
}

// =============================================================================
// Sticky / Server / Platform Defaults
// =============================================================================

pub fn default_debounce_secs() -> u64 {
    7
}

pub fn default_reconcile_interval_secs() -> u64 {
    3600
}

pub fn default_backend() -> String {
    "memory".to_string()
}
