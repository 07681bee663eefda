//! Typed platform events.
//!
//! Raw gateway payloads are converted into [`PlatformEvent`] before they
//! reach the dispatcher; button custom ids are parsed into
//! [`ComponentAction`]. Nothing past this module looks at untyped data.

use crate::platform::{Activity, ChannelId, GuildId, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// One inbound notification from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// A member connected to (or moved into) a voice channel.
    VoiceJoined {
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    },
    /// A member disconnected from (or moved out of) a voice channel.
    VoiceLeft {
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    },
    /// A member's presence changed. `activities` is the full new list.
    PresenceChanged {
        guild_id: GuildId,
        user_id: UserId,
        #[serde(default)]
        activities: Vec<Activity>,
    },
    MessagePosted {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        #[serde(default)]
        author_bot: bool,
        #[serde(default)]
        content: String,
    },
    /// A button press.
    ComponentInteraction {
        interaction_id: String,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        custom_id: String,
        /// Message carrying the button.
        #[serde(default)]
        message_id: Option<MessageId>,
    },
}

impl PlatformEvent {
    /// Short label used for metrics and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VoiceJoined { .. } => "voice_joined",
            Self::VoiceLeft { .. } => "voice_left",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::MessagePosted { .. } => "message_posted",
            Self::ComponentInteraction { .. } => "component_interaction",
        }
    }

    /// Channel the event concerns, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::VoiceJoined { channel_id, .. }
            | Self::VoiceLeft { channel_id, .. }
            | Self::MessagePosted { channel_id, .. }
            | Self::ComponentInteraction { channel_id, .. } => Some(channel_id),
            Self::PresenceChanged { .. } => None,
        }
    }
}

/// Button actions this daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAction {
    CreateTicket,
    CloseTicket,
    ReopenTicket,
    /// First step of archiving: asks for confirmation.
    DeleteTicket,
    ConfirmDelete,
    CancelDelete,
    TakeOverVoice,
    AddMusicBot,
    RemoveMusicBot,
}

impl ComponentAction {
    pub const CREATE_TICKET: &'static str = "create-tickets";
    pub const CLOSE_TICKET: &'static str = "close-ticket";
    pub const REOPEN_TICKET: &'static str = "reopen-ticket";
    pub const DELETE_TICKET: &'static str = "delete-ticket";
    pub const CONFIRM_DELETE: &'static str = "confirm-delete";
    pub const CANCEL_DELETE: &'static str = "cancel-delete";
    pub const TAKE_OVER_VOICE: &'static str = "take_over_voice";
    pub const ADD_MUSIC_BOT: &'static str = "add_music_bot";
    pub const REMOVE_MUSIC_BOT: &'static str = "remove_music_bot";

    /// Parse a custom id. Unknown ids yield `None` and are dropped.
    pub fn parse(custom_id: &str) -> Option<Self> {
        Some(match custom_id {
            Self::CREATE_TICKET => Self::CreateTicket,
            Self::CLOSE_TICKET => Self::CloseTicket,
            Self::REOPEN_TICKET => Self::ReopenTicket,
            Self::DELETE_TICKET => Self::DeleteTicket,
            Self::CONFIRM_DELETE => Self::ConfirmDelete,
            Self::CANCEL_DELETE => Self::CancelDelete,
            Self::TAKE_OVER_VOICE => Self::TakeOverVoice,
            Self::ADD_MUSIC_BOT => Self::AddMusicBot,
            Self::REMOVE_MUSIC_BOT => Self::RemoveMusicBot,
            _ => return None,
        })
    }

    pub fn custom_id(self) -> &'static str {
        match self {
            Self::CreateTicket => Self::CREATE_TICKET,
            Self::CloseTicket => Self::CLOSE_TICKET,
            Self::ReopenTicket => Self::REOPEN_TICKET,
            Self::DeleteTicket => Self::DELETE_TICKET,
            Self::ConfirmDelete => Self::CONFIRM_DELETE,
            Self::CancelDelete => Self::CANCEL_DELETE,
            Self::TakeOverVoice => Self::TAKE_OVER_VOICE,
            Self::AddMusicBot => Self::ADD_MUSIC_BOT,
            Self::RemoveMusicBot => Self::REMOVE_MUSIC_BOT,
        }
    }
}
