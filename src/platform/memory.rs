//! In-process platform backend.
//!
//! Holds a complete little world (channels, voice occupancy, members,
//! roles, message histories) behind one lock and applies every mutation the
//! daemon requests to it. It backs the `memory` platform backend, where
//! events are fed in as JSON lines, and serves as the external fake in
//! tests, which is why it keeps a call log and can inject failures.

use super::{
    Attachment, ChannelInfo, ChannelKind, ChannelMessage, ChannelSpec, MessageAuthor, Member,
    OutgoingMessage, Overwrite, Platform, PlatformError, PlatformResult, Role, SentMessage,
    UserId,
};
use crate::events::PlatformEvent;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Kinds of platform calls, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    CreateChannel,
    RenameChannel,
    SetChannelPosition,
    EditOverwrite,
    DeleteOverwrite,
    DeleteChannel,
    SendMessage,
    EditMessage,
    DeleteMessage,
    FetchHistory,
    MoveMember,
    GrantRole,
    RevokeRole,
    Respond,
}

/// One recorded mutation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    /// Channel, or member for role calls.
    pub target: String,
    /// Call-specific detail: new name, message id, overwrite subject, ...
    pub detail: String,
}

#[derive(Default)]
struct World {
    next_id: u64,
    channels: HashMap<String, ChannelInfo>,
    /// Voice occupancy in join order.
    voice: HashMap<String, Vec<UserId>>,
    members: HashMap<(String, String), Member>,
    roles: HashMap<(String, String), Role>,
    messages: HashMap<String, Vec<ChannelMessage>>,
    responses: Vec<(String, String)>,
    calls: Vec<Call>,
    failures: Vec<(CallKind, PlatformError)>,
    /// Delay between committing a sent message and returning its id.
    send_latency: Option<Duration>,
}

impl World {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}", 900_000 + self.next_id)
    }

    /// Log the call, then fail it if a failure was queued for its kind.
    fn call(&mut self, kind: CallKind, target: &str, detail: &str) -> PlatformResult<()> {
        self.calls.push(Call {
            kind,
            target: target.to_string(),
            detail: detail.to_string(),
        });
        if let Some(pos) = self.failures.iter().position(|(k, _)| *k == kind) {
            return Err(self.failures.remove(pos).1);
        }
        Ok(())
    }

    fn channel_mut(&mut self, channel_id: &str) -> PlatformResult<&mut ChannelInfo> {
        self.channels
            .get_mut(channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))
    }

    fn disconnect(&mut self, user_id: &str) {
        for occupants in self.voice.values_mut() {
            occupants.retain(|u| u != user_id);
        }
    }

    fn ensure_member(&mut self, guild_id: &str, user_id: &str) {
        self.members
            .entry((guild_id.to_string(), user_id.to_string()))
            .or_insert_with(|| Member {
                id: user_id.to_string(),
                guild_id: guild_id.to_string(),
                display_name: user_id.to_string(),
                activities: Vec::new(),
                roles: Vec::new(),
                bot: false,
            });
    }
}

/// In-memory [`Platform`].
pub struct MemoryPlatform {
    bot: MessageAuthor,
    world: Mutex<World>,
}

impl MemoryPlatform {
    pub fn new(bot_id: &str) -> Self {
        Self {
            bot: MessageAuthor {
                id: bot_id.to_string(),
                name: "ephemerd".to_string(),
                bot: true,
            },
            world: Mutex::new(World::default()),
        }
    }

    /// Id used as author of every message this backend sends.
    pub fn bot_id(&self) -> &str {
        &self.bot.id
    }

    // ---------------------------------------------------------------------
    // World setup
    // ---------------------------------------------------------------------

    pub fn insert_channel(&self, channel: ChannelInfo) {
        let mut world = self.world.lock();
        if channel.kind == ChannelKind::Voice {
            world.voice.entry(channel.id.clone()).or_default();
        }
        world.channels.insert(channel.id.clone(), channel);
    }

    /// Add a channel with no overwrites.
    pub fn add_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
        name: &str,
        kind: ChannelKind,
        parent: Option<&str>,
        position: i64,
    ) {
        self.insert_channel(ChannelInfo {
            id: channel_id.to_string(),
            guild_id: guild_id.to_string(),
            name: name.to_string(),
            kind,
            parent: parent.map(String::from),
            position,
            overwrites: Vec::new(),
        });
    }

    pub fn add_member(&self, member: Member) {
        self.world
            .lock()
            .members
            .insert((member.guild_id.clone(), member.id.clone()), member);
    }

    pub fn add_role(&self, guild_id: &str, role: Role) {
        self.world
            .lock()
            .roles
            .insert((guild_id.to_string(), role.id.clone()), role);
    }

    pub fn set_activities(&self, guild_id: &str, user_id: &str, activities: Vec<super::Activity>) {
        let mut world = self.world.lock();
        world.ensure_member(guild_id, user_id);
        if let Some(m) = world.members.get_mut(&(guild_id.to_string(), user_id.to_string())) {
            m.activities = activities;
        }
    }

    /// Put a member into a voice channel, leaving any other first.
    pub fn connect(&self, guild_id: &str, channel_id: &str, user_id: &str) {
        let mut world = self.world.lock();
        world.ensure_member(guild_id, user_id);
        world.disconnect(user_id);
        world
            .voice
            .entry(channel_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub fn disconnect(&self, user_id: &str) {
        self.world.lock().disconnect(user_id);
    }

    /// Delete a channel behind the daemon's back.
    pub fn remove_channel(&self, channel_id: &str) {
        let mut world = self.world.lock();
        world.channels.remove(channel_id);
        world.voice.remove(channel_id);
        world.messages.remove(channel_id);
    }

    /// Append a message to a channel history as-is.
    pub fn push_message(&self, message: ChannelMessage) {
        self.world
            .lock()
            .messages
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    /// Apply an inbound event to the world so later lookups agree with it.
    pub fn observe(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::VoiceJoined {
                guild_id,
                channel_id,
                user_id,
            } => self.connect(guild_id, channel_id, user_id),
            PlatformEvent::VoiceLeft {
                channel_id, user_id, ..
            } => {
                let mut world = self.world.lock();
                if let Some(occupants) = world.voice.get_mut(channel_id) {
                    occupants.retain(|u| u != user_id);
                }
            }
            PlatformEvent::PresenceChanged {
                guild_id,
                user_id,
                activities,
            } => self.set_activities(guild_id, user_id, activities.clone()),
            PlatformEvent::MessagePosted {
                guild_id,
                channel_id,
                message_id,
                author_id,
                author_bot,
                content,
            } => {
                let mut world = self.world.lock();
                world.ensure_member(guild_id, author_id);
                let name = world
                    .members
                    .get(&(guild_id.clone(), author_id.clone()))
                    .map(|m| m.display_name.clone())
                    .unwrap_or_else(|| author_id.clone());
                let history = world.messages.entry(channel_id.clone()).or_default();
                if history.iter().all(|m| &m.id != message_id) {
                    history.push(ChannelMessage {
                        id: message_id.clone(),
                        channel_id: channel_id.clone(),
                        author: MessageAuthor {
                            id: author_id.clone(),
                            name,
                            bot: *author_bot,
                        },
                        content: content.clone(),
                        attachments: Vec::new(),
                        embeds: Vec::new(),
                        buttons: Vec::new(),
                        created_at: Utc::now(),
                        system: false,
                    });
                }
            }
            PlatformEvent::ComponentInteraction { .. } => {}
        }
    }

    fn store_message(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
    ) -> PlatformResult<(SentMessage, Option<Duration>)> {
        let mut world = self.world.lock();
        world.call(CallKind::SendMessage, channel_id, message.content.as_deref().unwrap_or(""))?;
        world.channel_mut(channel_id)?;
        let id = world.next_id();
        let attachments: Vec<Attachment> = message
            .files
            .iter()
            .map(|f| Attachment {
                name: f.name.clone(),
                url: format!("memory://{channel_id}/{id}/{}", f.name),
                content_type: None,
            })
            .collect();
        let stored = ChannelMessage {
            id: id.clone(),
            channel_id: channel_id.to_string(),
            author: self.bot.clone(),
            content: message.content.unwrap_or_default(),
            attachments: attachments.clone(),
            embeds: message.embeds,
            buttons: message.buttons,
            created_at: Utc::now(),
            system: false,
        };
        world
            .messages
            .entry(channel_id.to_string())
            .or_default()
            .push(stored);
        Ok((SentMessage { id, attachments }, world.send_latency))
    }

    /// Make the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, error: PlatformError) {
        self.world.lock().failures.push((kind, error));
    }

    /// Hold every `send_message` for `latency` after the message is stored,
    /// like a gateway whose response arrives after the message is visible.
    pub fn set_send_latency(&self, latency: Duration) {
        self.world.lock().send_latency = Some(latency);
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn calls(&self) -> Vec<Call> {
        self.world.lock().calls.clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.world.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    pub fn channel_snapshot(&self, channel_id: &str) -> Option<ChannelInfo> {
        self.world.lock().channels.get(channel_id).cloned()
    }

    /// Channels whose name matches exactly.
    pub fn channels_named(&self, name: &str) -> Vec<ChannelInfo> {
        self.world
            .lock()
            .channels
            .values()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    pub fn occupants(&self, channel_id: &str) -> Vec<UserId> {
        self.world.lock().voice.get(channel_id).cloned().unwrap_or_default()
    }

    pub fn messages(&self, channel_id: &str) -> Vec<ChannelMessage> {
        self.world.lock().messages.get(channel_id).cloned().unwrap_or_default()
    }

    pub fn member_snapshot(&self, guild_id: &str, user_id: &str) -> Option<Member> {
        self.world
            .lock()
            .members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
    }

    /// Interaction replies as `(interaction_id, content)`.
    pub fn responses(&self) -> Vec<(String, String)> {
        self.world.lock().responses.clone()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn channel(&self, channel_id: &str) -> PlatformResult<Option<ChannelInfo>> {
        Ok(self.world.lock().channels.get(channel_id).cloned())
    }

    async fn voice_members(&self, channel_id: &str) -> PlatformResult<Vec<UserId>> {
        let world = self.world.lock();
        if !world.channels.contains_key(channel_id) {
            return Err(PlatformError::NotFound(format!("channel {channel_id}")));
        }
        Ok(world.voice.get(channel_id).cloned().unwrap_or_default())
    }

    async fn member(&self, guild_id: &str, user_id: &str) -> PlatformResult<Option<Member>> {
        Ok(self
            .world
            .lock()
            .members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn role(&self, guild_id: &str, role_id: &str) -> PlatformResult<Option<Role>> {
        Ok(self
            .world
            .lock()
            .roles
            .get(&(guild_id.to_string(), role_id.to_string()))
            .cloned())
    }

    async fn create_channel(&self, guild_id: &str, spec: ChannelSpec) -> PlatformResult<ChannelInfo> {
        let mut world = self.world.lock();
        world.call(CallKind::CreateChannel, guild_id, &spec.name)?;
        let id = world.next_id();
        let position = world
            .channels
            .values()
            .filter(|c| c.guild_id == guild_id && c.parent == spec.parent)
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0);
        let info = ChannelInfo {
            id: id.clone(),
            guild_id: guild_id.to_string(),
            name: spec.name,
            kind: spec.kind,
            parent: spec.parent,
            position,
            overwrites: spec.overwrites,
        };
        if info.kind == ChannelKind::Voice {
            world.voice.insert(id.clone(), Vec::new());
        }
        world.channels.insert(id, info.clone());
        Ok(info)
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::RenameChannel, channel_id, name)?;
        world.channel_mut(channel_id)?.name = name.to_string();
        Ok(())
    }

    async fn set_channel_position(&self, channel_id: &str, position: i64) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::SetChannelPosition, channel_id, &position.to_string())?;
        world.channel_mut(channel_id)?.position = position;
        Ok(())
    }

    async fn edit_permission_overwrite(&self, channel_id: &str, edit: Overwrite) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::EditOverwrite, channel_id, &edit.subject)?;
        let channel = world.channel_mut(channel_id)?;
        match channel.overwrites.iter_mut().find(|o| o.subject == edit.subject) {
            Some(existing) => existing.merge(&edit),
            None => channel.overwrites.push(edit),
        }
        Ok(())
    }

    async fn delete_permission_overwrite(&self, channel_id: &str, subject_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::DeleteOverwrite, channel_id, subject_id)?;
        world
            .channel_mut(channel_id)?
            .overwrites
            .retain(|o| o.subject != subject_id);
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::DeleteChannel, channel_id, "")?;
        if world.channels.remove(channel_id).is_none() {
            return Err(PlatformError::NotFound(format!("channel {channel_id}")));
        }
        world.voice.remove(channel_id);
        world.messages.remove(channel_id);
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, message: OutgoingMessage) -> PlatformResult<SentMessage> {
        let (sent, latency) = self.store_message(channel_id, message)?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(sent)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, message: OutgoingMessage) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::EditMessage, channel_id, message_id)?;
        let stored = world
            .messages
            .get_mut(channel_id)
            .and_then(|h| h.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| PlatformError::NotFound(format!("message {message_id}")))?;
        if let Some(content) = message.content {
            stored.content = content;
        }
        stored.embeds = message.embeds;
        stored.buttons = message.buttons;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::DeleteMessage, channel_id, message_id)?;
        let history = world
            .messages
            .get_mut(channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("message {message_id}")))?;
        let before = history.len();
        history.retain(|m| m.id != message_id);
        if history.len() == before {
            return Err(PlatformError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }

    async fn fetch_message_history(&self, channel_id: &str) -> PlatformResult<Vec<ChannelMessage>> {
        let mut world = self.world.lock();
        world.call(CallKind::FetchHistory, channel_id, "")?;
        if !world.channels.contains_key(channel_id) {
            return Err(PlatformError::NotFound(format!("channel {channel_id}")));
        }
        Ok(world.messages.get(channel_id).cloned().unwrap_or_default())
    }

    async fn move_member(&self, guild_id: &str, user_id: &str, channel_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::MoveMember, channel_id, user_id)?;
        if world.channel_mut(channel_id)?.kind != ChannelKind::Voice {
            return Err(PlatformError::Forbidden(format!(
                "channel {channel_id} is not a voice channel"
            )));
        }
        world.ensure_member(guild_id, user_id);
        world.disconnect(user_id);
        world
            .voice
            .entry(channel_id.to_string())
            .or_default()
            .push(user_id.to_string());
        Ok(())
    }

    async fn grant_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::GrantRole, user_id, role_id)?;
        let member = world
            .members
            .get_mut(&(guild_id.to_string(), user_id.to_string()))
            .ok_or_else(|| PlatformError::NotFound(format!("member {user_id}")))?;
        if !member.roles.iter().any(|r| r == role_id) {
            member.roles.push(role_id.to_string());
        }
        Ok(())
    }

    async fn revoke_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::RevokeRole, user_id, role_id)?;
        let member = world
            .members
            .get_mut(&(guild_id.to_string(), user_id.to_string()))
            .ok_or_else(|| PlatformError::NotFound(format!("member {user_id}")))?;
        member.roles.retain(|r| r != role_id);
        Ok(())
    }

    async fn respond(&self, interaction_id: &str, content: &str) -> PlatformResult<()> {
        let mut world = self.world.lock();
        world.call(CallKind::Respond, interaction_id, content)?;
        world
            .responses
            .push((interaction_id.to_string(), content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Permissions;

    #[tokio::test]
    async fn overwrite_edits_merge_per_subject() {
        let p = MemoryPlatform::new("bot");
        p.add_channel("g", "c1", "room", ChannelKind::Voice, None, 0);
        p.edit_permission_overwrite("c1", Overwrite::allow("u1", Permissions::CONNECT | Permissions::SPEAK))
            .await
            .unwrap();
        p.edit_permission_overwrite("c1", Overwrite::deny("u1", Permissions::SPEAK))
            .await
            .unwrap();

        let ch = p.channel_snapshot("c1").unwrap();
        assert_eq!(ch.overwrites.len(), 1);
        let o = ch.overwrite_for("u1").unwrap();
        assert_eq!(o.allow, Permissions::CONNECT);
        assert_eq!(o.deny, Permissions::SPEAK);
    }

    #[tokio::test]
    async fn injected_failure_hits_once() {
        let p = MemoryPlatform::new("bot");
        p.add_channel("g", "c1", "room", ChannelKind::Voice, None, 0);
        p.fail_next(CallKind::RenameChannel, PlatformError::Transient("429".into()));

        assert!(p.rename_channel("c1", "a").await.is_err());
        p.rename_channel("c1", "b").await.unwrap();
        assert_eq!(p.channel_snapshot("c1").unwrap().name, "b");
        assert_eq!(p.count(CallKind::RenameChannel), 2);
    }

    #[tokio::test]
    async fn deleted_channel_reports_not_found() {
        let p = MemoryPlatform::new("bot");
        p.add_channel("g", "c1", "room", ChannelKind::Voice, None, 0);
        p.connect("g", "c1", "u1");
        p.remove_channel("c1");

        assert!(p.channel("c1").await.unwrap().is_none());
        assert!(p.voice_members("c1").await.unwrap_err().is_not_found());
        assert!(p.delete_channel("c1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn observe_tracks_voice_moves() {
        let p = MemoryPlatform::new("bot");
        p.add_channel("g", "a", "a", ChannelKind::Voice, None, 0);
        p.add_channel("g", "b", "b", ChannelKind::Voice, None, 1);
        p.observe(&PlatformEvent::VoiceJoined {
            guild_id: "g".into(),
            channel_id: "a".into(),
            user_id: "u1".into(),
        });
        p.move_member("g", "u1", "b").await.unwrap();

        assert!(p.occupants("a").is_empty());
        assert_eq!(p.occupants("b"), vec!["u1".to_string()]);
        assert_eq!(p.member_snapshot("g", "u1").unwrap().display_name, "u1");
    }

    #[tokio::test]
    async fn members_only_move_into_voice_channels() {
        let p = MemoryPlatform::new("bot");
        p.add_channel("g", "text", "general", ChannelKind::Text, None, 0);

        let err = p.move_member("g", "u1", "text").await.unwrap_err();
        assert!(matches!(err, PlatformError::Forbidden(_)));
        assert!(p.move_member("g", "u1", "gone").await.unwrap_err().is_not_found());
        assert!(p.occupants("text").is_empty());
    }
}
