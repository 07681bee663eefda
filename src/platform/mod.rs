//! External platform abstraction.
//!
//! The real-time platform owns the true state of every channel, member and
//! message. The lifecycle machines only observe it and request mutations
//! through the [`Platform`] trait; the gateway transport that implements it
//! in production lives outside this crate.
//!
//! Backends:
//! - [`memory::MemoryPlatform`]: in-process world, used for offline runs and tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod permissions;
mod types;

pub use permissions::Permissions;
pub use types::*;

/// Errors returned by platform calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The addressed resource no longer exists (channel, message, member).
    #[error("unknown {0}")]
    NotFound(String),
    /// The bot lacks the permission to perform the call, or the platform
    /// refuses it outright (moving a member into a text channel).
    #[error("missing access: {0}")]
    Forbidden(String),
    /// Rate limit, timeout or gateway hiccup. Worth retrying later.
    #[error("transient platform failure: {0}")]
    Transient(String),
}

impl PlatformError {
    /// True if the resource is gone.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Observation and mutation surface of the external platform.
///
/// Every call is an I/O boundary: handlers must assume the world may have
/// changed across any `.await` on this trait.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Look up a channel. `Ok(None)` means it does not exist.
    async fn channel(&self, channel_id: &str) -> PlatformResult<Option<ChannelInfo>>;

    /// Members currently connected to a voice channel.
    async fn voice_members(&self, channel_id: &str) -> PlatformResult<Vec<UserId>>;

    /// Look up a guild member with their current presence.
    async fn member(&self, guild_id: &str, user_id: &str) -> PlatformResult<Option<Member>>;

    /// Look up a guild role.
    async fn role(&self, guild_id: &str, role_id: &str) -> PlatformResult<Option<Role>>;

    async fn create_channel(&self, guild_id: &str, spec: ChannelSpec) -> PlatformResult<ChannelInfo>;

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()>;

    async fn set_channel_position(&self, channel_id: &str, position: i64) -> PlatformResult<()>;

    /// Merge an allow/deny edit into the subject's overwrite on the channel.
    async fn edit_permission_overwrite(
        &self,
        channel_id: &str,
        edit: Overwrite,
    ) -> PlatformResult<()>;

    /// Drop the subject's overwrite entirely.
    async fn delete_permission_overwrite(&self, channel_id: &str, subject_id: &str)
    -> PlatformResult<()>;

    async fn delete_channel(&self, channel_id: &str) -> PlatformResult<()>;

    async fn send_message(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
    ) -> PlatformResult<SentMessage>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: OutgoingMessage,
    ) -> PlatformResult<()>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()>;

    /// Full message history of a channel, in no particular order.
    async fn fetch_message_history(&self, channel_id: &str) -> PlatformResult<Vec<ChannelMessage>>;

    async fn move_member(&self, guild_id: &str, user_id: &str, channel_id: &str)
    -> PlatformResult<()>;

    async fn grant_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()>;

    async fn revoke_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()>;

    /// Answer a component interaction with a message only the actor sees.
    async fn respond(&self, interaction_id: &str, content: &str) -> PlatformResult<()>;
}
