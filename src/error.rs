//! Unified error handling for ephemerd.
//!
//! Store and platform failures are converted into [`LifecycleError`] at the
//! boundary of each lifecycle machine. The dispatcher turns those into
//! metric labels and the reply shown to the actor who triggered the event.

use crate::db::DbError;
use crate::platform::PlatformError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Lifecycle Errors (machine boundary)
// ============================================================================

/// Errors surfaced by the voice, ticket and sticky machines.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The external resource vanished. The local record has been cleaned up.
    #[error("{0} no longer exists")]
    NotFound(String),

    /// Uniqueness violation that survived the bounded retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("platform call failed: {0}")]
    Transient(PlatformError),

    /// A precondition of the requested transition does not hold.
    #[error("rejected: {0}")]
    Rejected(Rejection),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PermissionDenied => "permission_denied",
            Self::Transient(_) => "transient",
            Self::Rejected(r) => r.code(),
            Self::Internal(_) => "internal_error",
        }
    }

    /// Text shown to the actor.
    ///
    /// Internal and transient failures collapse into a generic notice; the
    /// details only go to the log.
    pub fn user_reply(&self) -> String {
        match self {
            Self::Rejected(r) => r.to_string(),
            Self::PermissionDenied => "You don't have permission to do that.".to_string(),
            Self::NotFound(what) => format!("That {what} no longer exists."),
            Self::Conflict(_) => "Could not finish that right now, please try again.".to_string(),
            Self::Transient(_) | Self::Internal(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

impl From<PlatformError> for LifecycleError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound(what) => Self::NotFound(what),
            other => Self::Transient(other),
        }
    }
}

impl From<DbError> for LifecycleError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(what) => Self::Conflict(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<Rejection> for LifecycleError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

/// Result type for lifecycle handlers.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

// ============================================================================
// Rejections (user-visible, no state change unless noted)
// ============================================================================

/// Reasons a requested transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("This is not a temporary voice room.")]
    NotTempVoice,

    #[error("You already own this room.")]
    AlreadyOwner,

    #[error("Nobody is in this room, there is nothing to take over.")]
    ChannelEmpty,

    #[error("The owner is still in the room.")]
    OwnerStillPresent,

    /// The absence clock was started by this very request.
    #[error(
        "The owner's absence was only noticed just now. You can take over in {remaining}."
    )]
    AbsenceClockStarted { remaining: Remaining },

    #[error("The owner left too recently. You can take over in {remaining}.")]
    OwnerLeftTooRecent { remaining: Remaining },

    #[error("Only the room owner can do that while they are here.")]
    NotOwner,

    #[error("The music bot is not configured.")]
    MediaBotNotConfigured,

    #[error("You already have an open ticket: <#{channel_id}>")]
    AlreadyHasTicket { channel_id: String },

    #[error("This is not a ticket channel.")]
    NotTicket,

    #[error("This ticket is already closed.")]
    TicketAlreadyClosed,

    #[error("This ticket is not closed.")]
    TicketNotClosed,

    #[error("This ticket is already archived.")]
    TicketArchived,
}

impl Rejection {
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotTempVoice => "not_temp_voice",
            Self::AlreadyOwner => "already_owner",
            Self::ChannelEmpty => "channel_empty",
            Self::OwnerStillPresent => "owner_still_present",
            Self::AbsenceClockStarted { .. } => "absence_clock_started",
            Self::OwnerLeftTooRecent { .. } => "owner_left_too_recent",
            Self::NotOwner => "not_owner",
            Self::MediaBotNotConfigured => "media_bot_not_configured",
            Self::AlreadyHasTicket { .. } => "already_has_ticket",
            Self::NotTicket => "not_ticket",
            Self::TicketAlreadyClosed => "ticket_already_closed",
            Self::TicketNotClosed => "ticket_not_closed",
            Self::TicketArchived => "ticket_archived",
        }
    }
}

/// Time left before a takeover is allowed, rendered as minutes and seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining(pub Duration);

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn unit(n: u64, name: &str) -> String {
            if n == 1 {
                format!("1 {name}")
            } else {
                format!("{n} {name}s")
            }
        }

        let total = self.0.as_secs();
        let (minutes, seconds) = (total / 60, total % 60);
        if minutes > 0 {
            write!(f, "{} {}", unit(minutes, "minute"), unit(seconds, "second"))
        } else {
            f.write_str(&unit(seconds, "second"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_formats_minutes_and_seconds() {
        assert_eq!(Remaining(Duration::from_secs(900)).to_string(), "15 minutes 0 seconds");
        assert_eq!(Remaining(Duration::from_secs(61)).to_string(), "1 minute 1 second");
        assert_eq!(Remaining(Duration::from_secs(120)).to_string(), "2 minutes 0 seconds");
        assert_eq!(Remaining(Duration::from_secs(42)).to_string(), "42 seconds");
        assert_eq!(Remaining(Duration::from_secs(1)).to_string(), "1 second");
    }

    #[test]
    fn platform_not_found_maps_to_not_found() {
        let err: LifecycleError = PlatformError::NotFound("channel".into()).into();
        assert_eq!(err.error_code(), "not_found");
        let err: LifecycleError = PlatformError::Transient("rate limited".into()).into();
        assert_eq!(err.error_code(), "transient");
    }

    #[test]
    fn internal_errors_get_generic_reply() {
        let err = LifecycleError::Internal("pool timed out".into());
        assert!(!err.user_reply().contains("pool"));

        let err: LifecycleError = Rejection::OwnerLeftTooRecent {
            remaining: Remaining(Duration::from_secs(125)),
        }
        .into();
        assert_eq!(err.error_code(), "owner_left_too_recent");
        assert!(err.user_reply().contains("2 minutes 5 seconds"));
    }

    #[test]
    fn db_conflict_maps_to_conflict() {
        let err: LifecycleError = DbError::Conflict("ticket 8".into()).into();
        assert!(matches!(err, LifecycleError::Conflict(_)));
    }
}
