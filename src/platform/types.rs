use super::Permissions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform snowflake identifiers, kept as their decimal string form.
pub type GuildId = String;
pub type ChannelId = String;
pub type UserId = String;
pub type RoleId = String;
pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

/// A permission overwrite for a user or role on a channel.
///
/// When used as an edit, `allow` bits are granted and `deny` bits are
/// revoked; bits in neither set keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overwrite {
    pub subject: String,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

impl Overwrite {
    pub fn allow(subject: impl Into<String>, allow: Permissions) -> Self {
        Self {
            subject: subject.into(),
            allow,
            deny: Permissions::empty(),
        }
    }

    pub fn deny(subject: impl Into<String>, deny: Permissions) -> Self {
        Self {
            subject: subject.into(),
            allow: Permissions::empty(),
            deny,
        }
    }

    /// Apply `edit` on top of this overwrite.
    pub fn merge(&mut self, edit: &Overwrite) {
        self.allow = self.allow.difference(edit.deny).union(edit.allow);
        self.deny = self.deny.difference(edit.allow).union(edit.deny);
    }
}

/// Options for creating a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
    pub parent: Option<ChannelId>,
    pub overwrites: Vec<Overwrite>,
    pub bitrate: Option<u32>,
}

/// Observed state of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub parent: Option<ChannelId>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub overwrites: Vec<Overwrite>,
}

impl ChannelInfo {
    pub fn overwrite_for(&self, subject: &str) -> Option<&Overwrite> {
        self.overwrites.iter().find(|o| o.subject == subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub name: String,
}

impl Activity {
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// A guild member together with their current presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub guild_id: GuildId,
    pub display_name: String,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub bot: bool,
}

impl Member {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Position in the role hierarchy; higher outranks lower.
    pub position: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// A message button: either a component routed back to us, or a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum Button {
    Component { custom_id: String, label: String },
    Link { url: String, label: String },
}

impl Button {
    pub fn component(custom_id: &str, label: &str) -> Self {
        Self::Component {
            custom_id: custom_id.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Content of a message to send or an edit to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub buttons: Vec<Button>,
    pub files: Vec<FileUpload>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.push(FileUpload {
            name: name.into(),
            bytes,
        });
        self
    }
}

/// Returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
}

/// A message as read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: MessageAuthor,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub buttons: Vec<Button>,
    pub created_at: DateTime<Utc>,
    /// Platform-generated notice (pins, joins) rather than a user message.
    #[serde(default)]
    pub system: bool,
}
