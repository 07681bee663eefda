//! Permission bitsets and the overwrite templates applied to managed channels.

use super::Overwrite;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// A set of channel permissions, using the platform's bit layout.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u64);

impl Permissions {
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const ADD_REACTIONS: Self = Self(1 << 6);
    pub const PRIORITY_SPEAKER: Self = Self(1 << 8);
    pub const STREAM: Self = Self(1 << 9);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const MANAGE_MESSAGES: Self = Self(1 << 13);
    pub const EMBED_LINKS: Self = Self(1 << 14);
    pub const ATTACH_FILES: Self = Self(1 << 15);
    pub const READ_MESSAGE_HISTORY: Self = Self(1 << 16);
    pub const USE_EXTERNAL_EMOJIS: Self = Self(1 << 18);
    pub const CONNECT: Self = Self(1 << 20);
    pub const SPEAK: Self = Self(1 << 21);
    pub const MUTE_MEMBERS: Self = Self(1 << 22);
    pub const DEAFEN_MEMBERS: Self = Self(1 << 23);
    pub const MOVE_MEMBERS: Self = Self(1 << 24);
    pub const USE_VAD: Self = Self(1 << 25);
    pub const USE_APPLICATION_COMMANDS: Self = Self(1 << 31);
    pub const USE_EXTERNAL_STICKERS: Self = Self(1 << 37);
    pub const USE_EMBEDDED_ACTIVITIES: Self = Self(1 << 39);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:#x})", self.0)
    }
}

/// Control granted to the owner of a temporary voice room.
pub const VOICE_OWNER_GRANT: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::CONNECT)
    .union(Permissions::SPEAK)
    .union(Permissions::STREAM)
    .union(Permissions::USE_EMBEDDED_ACTIVITIES)
    .union(Permissions::MUTE_MEMBERS)
    .union(Permissions::MOVE_MEMBERS)
    .union(Permissions::DEAFEN_MEMBERS)
    .union(Permissions::PRIORITY_SPEAKER);

/// Elevated control stripped from a previous owner on takeover.
pub const VOICE_OWNER_REVOKE: Permissions = Permissions::MUTE_MEMBERS
    .union(Permissions::MOVE_MEMBERS)
    .union(Permissions::DEAFEN_MEMBERS)
    .union(Permissions::PRIORITY_SPEAKER);

/// Baseline member access used when no template channel is available.
const VOICE_MEMBER_BASE: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::CONNECT)
    .union(Permissions::SPEAK)
    .union(Permissions::STREAM)
    .union(Permissions::USE_EMBEDDED_ACTIVITIES);

/// Access granted to the media bot role while the music bot is enabled.
pub const MEDIA_BOT_GRANT: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::CONNECT)
    .union(Permissions::SPEAK)
    .union(Permissions::STREAM)
    .union(Permissions::USE_VAD)
    .union(Permissions::PRIORITY_SPEAKER);

const TICKET_MEMBER: Permissions = Permissions::VIEW_CHANNEL
    .union(Permissions::READ_MESSAGE_HISTORY)
    .union(Permissions::SEND_MESSAGES)
    .union(Permissions::EMBED_LINKS)
    .union(Permissions::ATTACH_FILES)
    .union(Permissions::ADD_REACTIONS)
    .union(Permissions::USE_EXTERNAL_EMOJIS)
    .union(Permissions::USE_EXTERNAL_STICKERS)
    .union(Permissions::USE_APPLICATION_COMMANDS);

const TICKET_ADMIN: Permissions = TICKET_MEMBER
    .union(Permissions::MANAGE_MESSAGES)
    .union(Permissions::MANAGE_CHANNELS);

/// Overwrites for a voice room when the template channel is missing:
/// hidden from `@everyone`, open to the creator.
///
/// The `@everyone` role shares its id with the guild.
pub fn voice_fallback_template(guild_id: &str, creator_id: &str) -> Vec<Overwrite> {
    vec![
        Overwrite::deny(guild_id, Permissions::VIEW_CHANNEL),
        Overwrite::allow(creator_id, VOICE_MEMBER_BASE),
    ]
}

/// Replace the creator's entry in a copied template with the owner grant.
pub fn with_owner_grant(mut template: Vec<Overwrite>, owner_id: &str) -> Vec<Overwrite> {
    template.retain(|o| o.subject != owner_id);
    template.push(Overwrite::allow(owner_id, VOICE_OWNER_GRANT));
    template
}

/// Overwrites for a new ticket channel.
pub fn ticket_template(guild_id: &str, owner_id: &str, admin_role: &str) -> Vec<Overwrite> {
    vec![
        Overwrite::deny(guild_id, Permissions::VIEW_CHANNEL),
        Overwrite::allow(owner_id, TICKET_MEMBER),
        Overwrite::allow(admin_role, TICKET_ADMIN),
    ]
}
