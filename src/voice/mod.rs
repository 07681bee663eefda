//! Temporary voice rooms.
//!
//! Joining a lobby spawns a room owned by the joining member. The room is
//! named after the owner's current game (or their display name), follows
//! activity changes, can be taken over by someone else once the owner has
//! been gone for the grace period, and disappears when the last occupant
//! leaves.
//!
//! Presence events are the fast path for renames; [`VoiceLifecycle::sweep`]
//! re-derives every room from observed state as the backstop for dropped
//! or stale events.

mod naming;

pub use naming::{activity_label, room_name};

use crate::config::VoiceConfig;
use crate::db::{Database, RoomKind, VoiceRoom};
use crate::error::{LifecycleError, LifecycleResult, Rejection, Remaining};
use crate::events::ComponentAction;
use crate::platform::permissions::{
    MEDIA_BOT_GRANT, VOICE_OWNER_GRANT, VOICE_OWNER_REVOKE, voice_fallback_template,
    with_owner_grant,
};
use crate::platform::{
    Activity, Button, ChannelKind, ChannelSpec, Embed, Member, OutgoingMessage, Overwrite,
    Platform, PlatformError,
};
use crate::sticky::StickyNotices;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Successful takeover requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Takeover {
    /// Ownership moved to the requester.
    HandedOver,
    /// The owner came back; their absence clock was cleared.
    OwnerReturned,
}

impl Takeover {
    pub fn reply(self) -> &'static str {
        match self {
            Self::HandedOver => "You are now the owner of this room.",
            Self::OwnerReturned => "Welcome back, the room is yours again.",
        }
    }
}

/// What a sweep changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub renamed: usize,
    pub removed: usize,
}

/// Drives every temporary voice room.
pub struct VoiceLifecycle {
    platform: Arc<dyn Platform>,
    db: Database,
    sticky: StickyNotices,
    config: VoiceConfig,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl VoiceLifecycle {
    pub fn new(
        platform: Arc<dyn Platform>,
        db: Database,
        sticky: StickyNotices,
        config: VoiceConfig,
    ) -> Self {
        Self {
            platform,
            db,
            sticky,
            config,
        }
    }

    /// Room kind spawned by a lobby, if the channel is one.
    pub fn lobby_kind(&self, channel_id: &str) -> Option<RoomKind> {
        if channel_id == self.config.first_lobby {
            Some(RoomKind::First)
        } else if channel_id == self.config.second_lobby {
            Some(RoomKind::Second)
        } else {
            None
        }
    }

    /// Companion notice with the music-bot button matching its state.
    fn companion_notice(&self, bot_added: bool) -> OutgoingMessage {
        let (description, button) = if bot_added {
            (
                "The music bot can join this room. Press **Remove music bot** to send it away."
                    .to_string(),
                Button::component(ComponentAction::REMOVE_MUSIC_BOT, "Remove music bot"),
            )
        } else {
            (
                self.config.companion_notice.clone(),
                Button::component(ComponentAction::ADD_MUSIC_BOT, "Add music bot"),
            )
        };
        OutgoingMessage::embed(Embed {
            title: Some("Voice room".to_string()),
            description: Some(description),
            fields: Vec::new(),
        })
        .with_button(button)
        .with_button(Button::component(ComponentAction::TAKE_OVER_VOICE, "Take over room"))
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// A member connected to a voice channel.
    pub async fn on_member_joined(&self, guild_id: &str, channel_id: &str, user_id: &str) -> LifecycleResult<()> {
        if let Some(kind) = self.lobby_kind(channel_id) {
            return self.create(guild_id, channel_id, user_id, kind).await;
        }

        let Some(room) = self.db.voice_rooms().find(channel_id).await? else {
            return Ok(());
        };
        if room.owner_id != user_id {
            return Ok(());
        }
        if room.owner_left_at.is_some() {
            self.db.voice_rooms().set_owner_left_at(channel_id, None).await?;
            debug!(channel = %channel_id, owner = %user_id, "Owner rejoined, absence cleared");
        }
        if let Some(member) = self.platform.member(guild_id, user_id).await? {
            self.on_activity_observed(&room, &member).await?;
        }
        Ok(())
    }

    /// A member disconnected from a voice channel.
    pub async fn on_member_left(&self, _guild_id: &str, channel_id: &str, user_id: &str) -> LifecycleResult<()> {
        let Some(room) = self.db.voice_rooms().find(channel_id).await? else {
            return Ok(());
        };

        let members = match self.platform.voice_members(channel_id).await {
            Ok(members) => members,
            Err(PlatformError::NotFound(_)) => {
                self.forget(&room).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if members.is_empty() {
            return self.remove_room(&room).await;
        }

        if room.owner_id == user_id && !members.iter().any(|m| m == user_id) {
            self.db.voice_rooms().set_owner_left_at(channel_id, Some(now())).await?;
            info!(channel = %channel_id, owner = %user_id, "Owner left room, absence clock started");
        }
        Ok(())
    }

    /// Presence update for a member: re-check every room they own.
    pub async fn on_presence_changed(
        &self,
        guild_id: &str,
        user_id: &str,
        activities: &[Activity],
    ) -> LifecycleResult<()> {
        let rooms = self.db.voice_rooms().find_by_owner(guild_id, user_id).await?;
        if rooms.is_empty() {
            return Ok(());
        }
        let Some(mut member) = self.platform.member(guild_id, user_id).await? else {
            return Ok(());
        };
        // The event carries the freshest presence.
        member.activities = activities.to_vec();
        for room in &rooms {
            self.on_activity_observed(room, &member).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Spawn a room for a member who joined a lobby.
    pub async fn create(&self, guild_id: &str, lobby_id: &str, user_id: &str, kind: RoomKind) -> LifecycleResult<()> {
        let member = self
            .platform
            .member(guild_id, user_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("member {user_id}")))?;
        let lobby = self.platform.channel(lobby_id).await?;

        let label = activity_label(&member.activities);
        let name = room_name(kind, label.as_deref(), &member.display_name);

        let source = match kind {
            RoomKind::First => self.config.first_permission_source.as_deref(),
            RoomKind::Second => self.config.second_permission_source.as_deref(),
        };
        let template = match source {
            Some(source) => self.platform.channel(source).await?.map(|c| c.overwrites),
            None => None,
        };
        let template = template.unwrap_or_else(|| {
            debug!(guild = %guild_id, "Permission source missing, using fallback template");
            voice_fallback_template(guild_id, user_id)
        });

        let channel = self
            .platform
            .create_channel(
                guild_id,
                ChannelSpec {
                    name: name.clone(),
                    kind: ChannelKind::Voice,
                    parent: lobby.as_ref().and_then(|l| l.parent.clone()),
                    overwrites: with_owner_grant(template, user_id),
                    bitrate: Some(self.config.bitrate),
                },
            )
            .await?;

        if kind == RoomKind::First
            && let Some(lobby) = &lobby
            && let Err(e) = self.platform.set_channel_position(&channel.id, lobby.position + 1).await
        {
            warn!(channel = %channel.id, error = %e, "Failed to place room below its lobby");
        }

        if let Err(e) = self.platform.move_member(guild_id, user_id, &channel.id).await {
            // Left empty; the sweep removes it.
            warn!(channel = %channel.id, member = %user_id, error = %e, "Failed to move creator into room");
        }

        let room = VoiceRoom {
            channel_id: channel.id.clone(),
            guild_id: guild_id.to_string(),
            owner_id: user_id.to_string(),
            kind,
            created_at: now(),
            owner_left_at: None,
            activity_label: label,
        };
        if let Err(e) = self.db.voice_rooms().insert(&room).await {
            if let Err(de) = self.platform.delete_channel(&channel.id).await {
                warn!(channel = %channel.id, error = %de, "Failed to delete unrecorded room");
            }
            return Err(e.into());
        }

        if let Some(role) = &self.config.owner_role
            && let Err(e) = self.platform.grant_role(guild_id, user_id, role).await
        {
            warn!(member = %user_id, error = %e, "Failed to grant owner role");
        }

        if kind == RoomKind::First {
            self.sticky.setup(&channel.id, self.companion_notice(false));
            self.sticky.post_initial(&channel.id).await;
        }

        crate::metrics::record_voice("created");
        info!(channel = %channel.id, owner = %user_id, name = %name, "Created voice room");
        Ok(())
    }

    /// Rename the room if the owner's activity label changed. Returns true
    /// if a rename happened.
    ///
    /// The label is only persisted once the rename went through, so a failed
    /// rename is retried by the next sweep.
    pub async fn on_activity_observed(&self, room: &VoiceRoom, member: &Member) -> LifecycleResult<bool> {
        if member.id != room.owner_id {
            return Ok(false);
        }
        let label = activity_label(&member.activities);
        if label == room.activity_label {
            return Ok(false);
        }

        let name = room_name(room.kind, label.as_deref(), &member.display_name);
        match self.platform.rename_channel(&room.channel_id, &name).await {
            Ok(()) => {}
            Err(PlatformError::NotFound(_)) => {
                self.forget(room).await?;
                return Ok(false);
            }
            Err(e) => {
                warn!(channel = %room.channel_id, name = %name, error = %e, "Rename failed, sweep will retry");
                return Ok(false);
            }
        }

        if !self
            .db
            .voice_rooms()
            .set_activity_label(&room.channel_id, &member.id, label.as_deref())
            .await?
        {
            // Handed over while renaming: our name may have landed last.
            debug!(channel = %room.channel_id, "Room changed hands during rename");
            self.restore_owner_name(&room.channel_id).await?;
            return Ok(false);
        }
        crate::metrics::record_voice("renamed");
        info!(channel = %room.channel_id, name = %name, "Renamed voice room");
        Ok(true)
    }

    /// A member asks to take a room over.
    pub async fn take_over(&self, guild_id: &str, channel_id: &str, requester_id: &str) -> LifecycleResult<Takeover> {
        let room = self
            .db
            .voice_rooms()
            .find(channel_id)
            .await?
            .ok_or(Rejection::NotTempVoice)?;

        let members = match self.platform.voice_members(channel_id).await {
            Ok(members) => members,
            Err(PlatformError::NotFound(what)) => {
                self.forget(&room).await?;
                return Err(LifecycleError::NotFound(what));
            }
            Err(e) => return Err(e.into()),
        };
        if members.is_empty() {
            return Err(Rejection::ChannelEmpty.into());
        }

        if requester_id == room.owner_id {
            if room.owner_left_at.is_none() {
                return Err(Rejection::AlreadyOwner.into());
            }
            self.db.voice_rooms().set_owner_left_at(channel_id, None).await?;
            if let Some(member) = self.platform.member(guild_id, requester_id).await? {
                self.on_activity_observed(&room, &member).await?;
            }
            info!(channel = %channel_id, owner = %requester_id, "Owner reclaimed room");
            return Ok(Takeover::OwnerReturned);
        }

        if members.iter().any(|m| *m == room.owner_id) {
            return Err(Rejection::OwnerStillPresent.into());
        }

        let grace = self.config.owner_grace();
        let now = now();
        let Some(left_at) = room.owner_left_at else {
            // The absence was never observed; the clock starts now.
            self.db.voice_rooms().set_owner_left_at(channel_id, Some(now)).await?;
            return Err(Rejection::AbsenceClockStarted {
                remaining: Remaining(grace),
            }
            .into());
        };
        let elapsed = Duration::from_secs(now.saturating_sub(left_at).max(0) as u64);
        if elapsed < grace {
            return Err(Rejection::OwnerLeftTooRecent {
                remaining: Remaining(grace - elapsed),
            }
            .into());
        }

        let member = self
            .platform
            .member(guild_id, requester_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("member {requester_id}")))?;

        // Claim first so a concurrent request cannot also win.
        let claimed = self
            .db
            .voice_rooms()
            .transfer_owner(channel_id, &room.owner_id, requester_id, room.activity_label.as_deref())
            .await?;
        if !claimed {
            return Err(Rejection::OwnerStillPresent.into());
        }

        if let Err(e) = self
            .platform
            .edit_permission_overwrite(channel_id, Overwrite::deny(room.owner_id.as_str(), VOICE_OWNER_REVOKE))
            .await
        {
            warn!(channel = %channel_id, member = %room.owner_id, error = %e, "Failed to revoke previous owner");
        }
        if let Err(e) = self
            .platform
            .edit_permission_overwrite(channel_id, Overwrite::allow(requester_id, VOICE_OWNER_GRANT))
            .await
        {
            warn!(channel = %channel_id, member = %requester_id, error = %e, "Failed to grant new owner");
        }
        if let Some(role) = &self.config.owner_role {
            if let Err(e) = self.platform.revoke_role(guild_id, &room.owner_id, role).await {
                warn!(member = %room.owner_id, error = %e, "Failed to revoke owner role");
            }
            if let Err(e) = self.platform.grant_role(guild_id, requester_id, role).await {
                warn!(member = %requester_id, error = %e, "Failed to grant owner role");
            }
        }

        let label = activity_label(&member.activities);
        let name = room_name(room.kind, label.as_deref(), &member.display_name);
        match self.platform.rename_channel(channel_id, &name).await {
            Ok(()) => {
                self.db
                    .voice_rooms()
                    .set_activity_label(channel_id, requester_id, label.as_deref())
                    .await?;
            }
            // The old label stays, so the sweep notices the difference.
            Err(e) => warn!(channel = %channel_id, error = %e, "Rename after takeover failed"),
        }

        crate::metrics::record_voice("handed_over");
        info!(channel = %channel_id, from = %room.owner_id, to = %requester_id, "Voice room handed over");
        Ok(Takeover::HandedOver)
    }

    /// Grant (`enable`) or remove the media bot's access to a room.
    pub async fn toggle_music_bot(
        &self,
        channel_id: &str,
        actor_id: &str,
        enable: bool,
        button_message: Option<&str>,
    ) -> LifecycleResult<()> {
        let role = self
            .config
            .media_bot_role
            .as_deref()
            .ok_or(Rejection::MediaBotNotConfigured)?;
        let room = self
            .db
            .voice_rooms()
            .find(channel_id)
            .await?
            .ok_or(Rejection::NotTempVoice)?;

        let members = match self.platform.voice_members(channel_id).await {
            Ok(members) => members,
            Err(PlatformError::NotFound(what)) => {
                self.forget(&room).await?;
                return Err(LifecycleError::NotFound(what));
            }
            Err(e) => return Err(e.into()),
        };
        if actor_id != room.owner_id && members.iter().any(|m| *m == room.owner_id) {
            return Err(Rejection::NotOwner.into());
        }

        if enable {
            self.platform
                .edit_permission_overwrite(channel_id, Overwrite::allow(role, MEDIA_BOT_GRANT))
                .await?;
        } else if let Err(e) = self.platform.delete_permission_overwrite(channel_id, role).await {
            warn!(channel = %channel_id, error = %e, "Failed to remove media bot access");
        }

        let notice = self.companion_notice(enable);
        self.sticky.replace_template(channel_id, notice.clone()).await;
        if let Some(message_id) = button_message
            && self.sticky.current_message(channel_id).as_deref() != Some(message_id)
            && let Err(e) = self.platform.edit_message(channel_id, message_id, notice).await
        {
            debug!(channel = %channel_id, error = %e, "Failed to update music bot notice");
        }

        info!(channel = %channel_id, actor = %actor_id, enabled = enable, "Music bot access changed");
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Re-derive every room from observed state.
    ///
    /// Drops records of rooms that vanished, deletes rooms left empty, and
    /// renames rooms whose owner's activity changed unnoticed. One failing
    /// room does not stop the sweep.
    pub async fn sweep(&self) -> LifecycleResult<SweepReport> {
        let rooms = self.db.voice_rooms().find_all().await?;
        let mut report = SweepReport::default();
        for room in &rooms {
            if let Err(e) = self.sweep_room(room, &mut report).await {
                warn!(channel = %room.channel_id, error = %e, "Sweep failed for room");
            }
        }
        if report.renamed > 0 || report.removed > 0 {
            info!(rooms = rooms.len(), renamed = report.renamed, removed = report.removed, "Voice sweep complete");
        }
        Ok(report)
    }

    async fn sweep_room(&self, room: &VoiceRoom, report: &mut SweepReport) -> LifecycleResult<()> {
        if self.platform.channel(&room.channel_id).await?.is_none() {
            self.forget(room).await?;
            report.removed += 1;
            return Ok(());
        }

        let members = self.platform.voice_members(&room.channel_id).await?;
        if members.is_empty() {
            self.remove_room(room).await?;
            crate::metrics::record_reconcile_removal("voice_channel");
            report.removed += 1;
            return Ok(());
        }

        if room.owner_left_at.is_some() && members.iter().any(|m| *m == room.owner_id) {
            self.db.voice_rooms().set_owner_left_at(&room.channel_id, None).await?;
        }

        let Some(owner) = self.platform.member(&room.guild_id, &room.owner_id).await? else {
            debug!(channel = %room.channel_id, owner = %room.owner_id, "Owner not found, skipping rename check");
            return Ok(());
        };
        // The listing is stale by now; rename from the current record.
        let Some(room) = self.db.voice_rooms().find(&room.channel_id).await? else {
            return Ok(());
        };
        if self.on_activity_observed(&room, &owner).await? {
            report.renamed += 1;
        }
        Ok(())
    }

    /// Rename a room after its current owner, whatever the stored label says.
    async fn restore_owner_name(&self, channel_id: &str) -> LifecycleResult<()> {
        let Some(room) = self.db.voice_rooms().find(channel_id).await? else {
            return Ok(());
        };
        let Some(owner) = self.platform.member(&room.guild_id, &room.owner_id).await? else {
            return Ok(());
        };
        let label = activity_label(&owner.activities);
        let name = room_name(room.kind, label.as_deref(), &owner.display_name);
        if let Err(e) = self.platform.rename_channel(channel_id, &name).await {
            warn!(channel = %channel_id, name = %name, error = %e, "Failed to restore room name");
            return Ok(());
        }
        self.db
            .voice_rooms()
            .set_activity_label(channel_id, &room.owner_id, label.as_deref())
            .await?;
        Ok(())
    }

    /// Delete an empty room and its record.
    async fn remove_room(&self, room: &VoiceRoom) -> LifecycleResult<()> {
        self.sticky.teardown(&room.channel_id);
        match self.platform.delete_channel(&room.channel_id).await {
            Ok(()) => {}
            Err(PlatformError::NotFound(_)) => {}
            // Keep the record so the sweep retries.
            Err(e) => return Err(e.into()),
        }
        self.db.voice_rooms().delete(&room.channel_id).await?;
        self.release_owner_role(room).await;
        crate::metrics::record_voice("deleted");
        info!(channel = %room.channel_id, "Deleted empty voice room");
        Ok(())
    }

    /// Drop the record of a room that no longer exists.
    async fn forget(&self, room: &VoiceRoom) -> LifecycleResult<()> {
        self.sticky.teardown(&room.channel_id);
        if self.db.voice_rooms().delete(&room.channel_id).await? {
            self.release_owner_role(room).await;
            crate::metrics::record_reconcile_removal("voice_record");
            info!(channel = %room.channel_id, "Removed record of vanished voice room");
        }
        Ok(())
    }

    async fn release_owner_role(&self, room: &VoiceRoom) {
        let Some(role) = &self.config.owner_role else {
            return;
        };
        // Still owns another room: keep it.
        match self.db.voice_rooms().find_by_owner(&room.guild_id, &room.owner_id).await {
            Ok(rooms) if !rooms.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                warn!(owner = %room.owner_id, error = %e, "Failed to look up owned rooms");
                return;
            }
        }
        if let Err(e) = self.platform.revoke_role(&room.guild_id, &room.owner_id, role).await {
            debug!(owner = %room.owner_id, error = %e, "Failed to revoke owner role");
        }
    }
}
