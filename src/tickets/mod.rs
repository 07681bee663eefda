//! Support tickets.
//!
//! A ticket is a private text channel between one member and the staff.
//! It moves `open -> closed -> archived`; archiving captures a transcript,
//! posts it to the archive channel and deletes the ticket channel shortly
//! after. Ticket numbers come from a per-guild counter and are unique per
//! guild even when several members open tickets at the same moment.

pub mod transcript;

use crate::config::TicketsConfig;
use crate::db::{Database, DbError, NewTicket, Ticket, TicketStatus};
use crate::error::{LifecycleError, LifecycleResult, Rejection};
use crate::events::ComponentAction;
use crate::platform::permissions::ticket_template;
use crate::platform::{
    Button, ChannelKind, ChannelSpec, Embed, EmbedField, OutgoingMessage, Overwrite, Permissions,
    Platform,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transcript::TranscriptMeta;

/// What an archive run produced.
#[derive(Debug)]
pub struct Archived {
    pub ticket_number: i64,
    /// Local copy of the transcript, if it could be written.
    pub transcript_path: Option<PathBuf>,
    pub transcript_url: Option<String>,
    pub preview: String,
    /// Pending deletion of the ticket channel.
    pub deletion: JoinHandle<()>,
}

/// Result of [`TicketLifecycle::reconcile_orphans`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrphanReport {
    /// Live tickets whose channel had vanished, now archived.
    pub archived: usize,
    /// Archived records whose channel is gone, now deleted.
    pub purged: usize,
}

/// Drives every support ticket.
pub struct TicketLifecycle {
    platform: Arc<dyn Platform>,
    db: Database,
    config: TicketsConfig,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `<display name>-<NNN>`
pub fn channel_name(display_name: &str, number: i64) -> String {
    format!("{display_name}-{number:03}")
}

fn welcome_panel(owner_mention: &str) -> OutgoingMessage {
    OutgoingMessage::embed(Embed {
        title: Some("Support ticket".to_string()),
        description: Some(format!(
            "Hi {owner_mention}, tell us what you need and the staff will answer here. \
             Press **Close ticket** once you are done."
        )),
        fields: Vec::new(),
    })
    .with_content(owner_mention)
    .with_button(Button::component(ComponentAction::CLOSE_TICKET, "Close ticket"))
}

fn closed_panel(actor_mention: &str) -> OutgoingMessage {
    OutgoingMessage::embed(Embed {
        title: Some("Ticket closed".to_string()),
        description: Some(format!("This ticket was closed by {actor_mention}.")),
        fields: Vec::new(),
    })
    .with_button(Button::component(ComponentAction::REOPEN_TICKET, "Reopen"))
    .with_button(Button::component(ComponentAction::DELETE_TICKET, "Archive and delete"))
}

fn delete_prompt() -> OutgoingMessage {
    OutgoingMessage::embed(Embed {
        title: Some("Archive this ticket?".to_string()),
        description: Some(
            "A transcript will be saved to the archive and this channel will be deleted."
                .to_string(),
        ),
        fields: Vec::new(),
    })
    .with_button(Button::component(ComponentAction::CONFIRM_DELETE, "Archive"))
    .with_button(Button::component(ComponentAction::CANCEL_DELETE, "Cancel"))
}

fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

impl TicketLifecycle {
    pub fn new(platform: Arc<dyn Platform>, db: Database, config: TicketsConfig) -> Self {
        Self {
            platform,
            db,
            config,
        }
    }

    async fn ticket(&self, channel_id: &str) -> LifecycleResult<Ticket> {
        self.db
            .tickets()
            .find(channel_id)
            .await?
            .ok_or(LifecycleError::Rejected(Rejection::NotTicket))
    }

    /// Holds the admin role, or any role ranked above it.
    pub async fn is_privileged(&self, guild_id: &str, user_id: &str) -> LifecycleResult<bool> {
        let Some(member) = self.platform.member(guild_id, user_id).await? else {
            return Ok(false);
        };
        if member.roles.iter().any(|r| *r == self.config.admin_role) {
            return Ok(true);
        }
        let Some(admin) = self.platform.role(guild_id, &self.config.admin_role).await? else {
            return Ok(false);
        };
        for role_id in &member.roles {
            if let Some(role) = self.platform.role(guild_id, role_id).await?
                && role.position > admin.position
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn require_privileged(&self, guild_id: &str, user_id: &str) -> LifecycleResult<()> {
        if self.is_privileged(guild_id, user_id).await? {
            Ok(())
        } else {
            Err(LifecycleError::PermissionDenied)
        }
    }

    async fn require_owner_or_privileged(&self, ticket: &Ticket, user_id: &str) -> LifecycleResult<()> {
        if ticket.owner_id == user_id {
            return Ok(());
        }
        self.require_privileged(&ticket.guild_id, user_id).await
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Open a ticket for `requester_id`.
    pub async fn open(&self, guild_id: &str, requester_id: &str) -> LifecycleResult<Ticket> {
        if let Some(existing) = self.db.tickets().find_open_for_owner(guild_id, requester_id).await? {
            if self.platform.channel(&existing.channel_id).await?.is_some() {
                return Err(Rejection::AlreadyHasTicket {
                    channel_id: existing.channel_id,
                }
                .into());
            }
            self.archive_orphan(&existing).await?;
        }

        let member = self
            .platform
            .member(guild_id, requester_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("member {requester_id}")))?;

        let number = self.db.guilds().next_ticket_number(guild_id).await?;
        let channel = self
            .platform
            .create_channel(
                guild_id,
                ChannelSpec {
                    name: channel_name(&member.display_name, number),
                    kind: ChannelKind::Text,
                    parent: Some(self.config.category.clone()),
                    overwrites: ticket_template(guild_id, requester_id, &self.config.admin_role),
                    bitrate: None,
                },
            )
            .await?;

        let welcome = match self
            .platform
            .send_message(&channel.id, welcome_panel(&member.mention()))
            .await
        {
            Ok(sent) => Some(sent.id),
            Err(e) => {
                warn!(channel = %channel.id, error = %e, "Failed to post ticket welcome message");
                None
            }
        };

        let new = NewTicket {
            channel_id: &channel.id,
            guild_id,
            owner_id: requester_id,
            ticket_number: number,
            welcome_message_id: welcome.as_deref(),
            created_at: now(),
        };
        let ticket = match self.store(&new, &member.display_name).await {
            Ok(ticket) => ticket,
            Err(e) => {
                if let Err(de) = self.platform.delete_channel(&channel.id).await {
                    warn!(channel = %channel.id, error = %de, "Failed to delete unrecorded ticket channel");
                }
                if matches!(e, LifecycleError::Conflict(_)) {
                    crate::metrics::record_ticket_conflict("failed");
                }
                return Err(e);
            }
        };

        self.db.guilds().add_active_ticket(guild_id, &ticket.channel_id).await?;
        crate::metrics::record_ticket("opened");
        info!(
            channel = %ticket.channel_id,
            owner = %requester_id,
            number = ticket.ticket_number,
            "Opened ticket"
        );
        Ok(ticket)
    }

    /// Persist a new ticket. A lost numbering race is retried once with the
    /// number after the current maximum. A concurrent open by the same member
    /// that got stored first turns into `AlreadyHasTicket`.
    async fn store(&self, new: &NewTicket<'_>, display_name: &str) -> LifecycleResult<Ticket> {
        match self.db.tickets().insert(new).await {
            Ok(ticket) => return Ok(ticket),
            Err(DbError::Conflict(detail)) => {
                self.reject_if_owner_busy(new).await?;
                warn!(guild = %new.guild_id, number = new.ticket_number, detail = %detail, "Ticket number taken, retrying");
            }
            Err(e) => return Err(e.into()),
        }

        let number = self.db.tickets().max_number(new.guild_id).await? + 1;
        let retry = NewTicket {
            ticket_number: number,
            ..new.clone()
        };
        let ticket = match self.db.tickets().insert(&retry).await {
            Ok(ticket) => ticket,
            Err(DbError::Conflict(detail)) => {
                self.reject_if_owner_busy(new).await?;
                return Err(LifecycleError::Conflict(detail));
            }
            Err(e) => return Err(e.into()),
        };

        self.db.guilds().raise_counter(new.guild_id, number).await?;
        if let Err(e) = self
            .platform
            .rename_channel(new.channel_id, &channel_name(display_name, number))
            .await
        {
            warn!(channel = %new.channel_id, error = %e, "Failed to rename ticket after renumbering");
        }
        crate::metrics::record_ticket_conflict("recovered");
        info!(guild = %new.guild_id, number, "Recovered ticket number conflict");
        Ok(ticket)
    }

    async fn reject_if_owner_busy(&self, new: &NewTicket<'_>) -> LifecycleResult<()> {
        match self.db.tickets().find_open_for_owner(new.guild_id, new.owner_id).await? {
            Some(existing) if existing.channel_id != new.channel_id => Err(Rejection::AlreadyHasTicket {
                channel_id: existing.channel_id,
            }
            .into()),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Close / reopen
    // ========================================================================

    /// Close an open ticket and mute its owner.
    ///
    /// The owner may close their own ticket; anyone else needs the admin
    /// role or one ranked above it. Archiving stays staff-only.
    pub async fn close(&self, channel_id: &str, actor_id: &str) -> LifecycleResult<()> {
        let ticket = self.ticket(channel_id).await?;
        match ticket.status {
            TicketStatus::Open => {}
            TicketStatus::Closed => return Err(Rejection::TicketAlreadyClosed.into()),
            TicketStatus::Archived => return Err(Rejection::TicketArchived.into()),
        }
        self.require_owner_or_privileged(&ticket, actor_id).await?;

        if !self.db.tickets().mark_closed(channel_id, actor_id, now()).await? {
            return Err(Rejection::TicketAlreadyClosed.into());
        }

        if let Err(e) = self
            .platform
            .edit_permission_overwrite(channel_id, Overwrite::deny(&ticket.owner_id, Permissions::SEND_MESSAGES))
            .await
        {
            warn!(channel = %channel_id, owner = %ticket.owner_id, error = %e, "Failed to mute ticket owner");
        }
        self.update_panel(&ticket, closed_panel(&mention(actor_id))).await;
        self.post_status(&ticket, format!("Ticket closed by {}.", mention(actor_id)))
            .await?;

        crate::metrics::record_ticket("closed");
        info!(channel = %channel_id, actor = %actor_id, number = ticket.ticket_number, "Closed ticket");
        Ok(())
    }

    /// Reopen a closed ticket. Same actors as [`Self::close`].
    pub async fn reopen(&self, channel_id: &str, actor_id: &str) -> LifecycleResult<()> {
        let ticket = self.ticket(channel_id).await?;
        match ticket.status {
            TicketStatus::Closed => {}
            TicketStatus::Open => return Err(Rejection::TicketNotClosed.into()),
            TicketStatus::Archived => return Err(Rejection::TicketArchived.into()),
        }
        self.require_owner_or_privileged(&ticket, actor_id).await?;

        if !self.db.tickets().mark_reopened(channel_id).await? {
            return Err(Rejection::TicketNotClosed.into());
        }

        if let Err(e) = self
            .platform
            .edit_permission_overwrite(channel_id, Overwrite::allow(&ticket.owner_id, Permissions::SEND_MESSAGES))
            .await
        {
            warn!(channel = %channel_id, owner = %ticket.owner_id, error = %e, "Failed to unmute ticket owner");
        }
        self.update_panel(&ticket, welcome_panel(&mention(&ticket.owner_id))).await;
        self.post_status(&ticket, format!("Ticket reopened by {}.", mention(actor_id)))
            .await?;

        crate::metrics::record_ticket("reopened");
        info!(channel = %channel_id, actor = %actor_id, number = ticket.ticket_number, "Reopened ticket");
        Ok(())
    }

    async fn update_panel(&self, ticket: &Ticket, panel: OutgoingMessage) {
        let Some(message_id) = &ticket.welcome_message_id else {
            return;
        };
        if let Err(e) = self.platform.edit_message(&ticket.channel_id, message_id, panel).await {
            debug!(channel = %ticket.channel_id, error = %e, "Ticket welcome message not editable");
        }
    }

    /// Edit the status message, or post a new one if there is none left.
    async fn post_status(&self, ticket: &Ticket, content: String) -> LifecycleResult<()> {
        if let Some(message_id) = &ticket.status_message_id {
            match self
                .platform
                .edit_message(&ticket.channel_id, message_id, OutgoingMessage::text(content.clone()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(channel = %ticket.channel_id, error = %e, "Failed to edit ticket status");
                    return Ok(());
                }
            }
        }

        match self
            .platform
            .send_message(&ticket.channel_id, OutgoingMessage::text(content))
            .await
        {
            Ok(sent) => {
                self.db
                    .tickets()
                    .set_status_message(&ticket.channel_id, Some(&sent.id))
                    .await?;
            }
            Err(e) => warn!(channel = %ticket.channel_id, error = %e, "Failed to post ticket status"),
        }
        Ok(())
    }

    // ========================================================================
    // Archive
    // ========================================================================

    /// First step of archiving: post a confirmation prompt in the ticket.
    pub async fn request_archive(&self, guild_id: &str, channel_id: &str, actor_id: &str) -> LifecycleResult<()> {
        let ticket = self.ticket(channel_id).await?;
        self.require_privileged(guild_id, actor_id).await?;
        match ticket.status {
            TicketStatus::Closed => {}
            TicketStatus::Open => return Err(Rejection::TicketNotClosed.into()),
            TicketStatus::Archived => return Err(Rejection::TicketArchived.into()),
        }
        self.platform.send_message(channel_id, delete_prompt()).await?;
        debug!(channel = %channel_id, actor = %actor_id, "Archive confirmation requested");
        Ok(())
    }

    /// Drop the confirmation prompt.
    pub async fn cancel_archive(&self, channel_id: &str, prompt_id: Option<&str>) -> LifecycleResult<()> {
        let Some(prompt_id) = prompt_id else {
            return Ok(());
        };
        match self.platform.delete_message(channel_id, prompt_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Capture the transcript, archive the ticket and schedule deletion of
    /// its channel.
    pub async fn archive(&self, guild_id: &str, channel_id: &str, actor_id: &str) -> LifecycleResult<Archived> {
        let ticket = self.ticket(channel_id).await?;
        self.require_privileged(guild_id, actor_id).await?;
        match ticket.status {
            TicketStatus::Closed => {}
            TicketStatus::Open => return Err(Rejection::TicketNotClosed.into()),
            TicketStatus::Archived => return Err(Rejection::TicketArchived.into()),
        }

        let Some(channel) = self.platform.channel(channel_id).await? else {
            self.archive_orphan(&ticket).await?;
            return Err(LifecycleError::NotFound(format!("channel {channel_id}")));
        };
        let history = match self.platform.fetch_message_history(channel_id).await {
            Ok(history) => history,
            Err(e) if e.is_not_found() => {
                self.archive_orphan(&ticket).await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let owner_name = self
            .platform
            .member(&ticket.guild_id, &ticket.owner_id)
            .await?
            .map(|m| m.display_name)
            .unwrap_or_else(|| "Unknown user".to_string());
        let rendered = transcript::render(
            &TranscriptMeta::new(&ticket, owner_name.clone()),
            history,
            chrono::Utc::now(),
            self.config.preview_limit,
        );

        let transcript_path = match transcript::save(Path::new(&self.config.transcript_dir), &rendered).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(dir = %self.config.transcript_dir, error = %e, "Failed to write transcript");
                None
            }
        };

        let transcript_url = self.publish(&ticket, &channel.name, &owner_name, &rendered).await?;

        if !self.db.tickets().mark_archived(channel_id).await? {
            return Err(Rejection::TicketArchived.into());
        }
        self.db.guilds().remove_active_ticket(&ticket.guild_id, channel_id).await?;

        let deletion = self.schedule_deletion(channel_id.to_string());
        crate::metrics::record_ticket("archived");
        info!(
            channel = %channel_id,
            actor = %actor_id,
            number = ticket.ticket_number,
            delay_secs = self.config.delete_delay_secs,
            "Archived ticket"
        );

        Ok(Archived {
            ticket_number: ticket.ticket_number,
            transcript_path,
            transcript_url,
            preview: rendered.preview,
            deletion,
        })
    }

    /// Upload the transcript and its summary to the archive channel.
    /// Returns the attachment URL.
    async fn publish(
        &self,
        ticket: &Ticket,
        channel_name: &str,
        owner_name: &str,
        rendered: &transcript::Transcript,
    ) -> LifecycleResult<Option<String>> {
        let archive = &self.config.archive_channel;
        let upload = OutgoingMessage::default()
            .with_file(rendered.file_name.clone(), rendered.html.clone().into_bytes());
        let sent = match self.platform.send_message(archive, upload).await {
            Ok(sent) => sent,
            Err(e) if e.is_not_found() => {
                warn!(channel = %archive, "Archive channel missing, transcript kept locally only");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let url = sent.attachments.first().map(|a| a.url.clone());
        if url.is_none() {
            warn!(channel = %archive, "Transcript upload returned no attachment");
        }

        let participants = self.db.tickets().participants(&ticket.channel_id).await?;
        let listed = participants.iter().map(|p| mention(p)).collect::<Vec<_>>().join(" ");
        let mut summary = OutgoingMessage::embed(Embed {
            title: Some(format!("Ticket #{:03} archived", ticket.ticket_number)),
            description: None,
            fields: vec![
                EmbedField {
                    name: "Owner".to_string(),
                    value: owner_name.to_string(),
                },
                EmbedField {
                    name: "Channel".to_string(),
                    value: channel_name.to_string(),
                },
                EmbedField {
                    name: format!("Participants ({})", participants.len()),
                    value: listed,
                },
                EmbedField {
                    name: "Transcript".to_string(),
                    value: rendered.preview.clone(),
                },
            ],
        });
        if let Some(url) = &url {
            summary = summary.with_button(Button::Link {
                url: url.clone(),
                label: "View transcript".to_string(),
            });
        }
        if let Err(e) = self.platform.send_message(archive, summary).await {
            warn!(channel = %archive, error = %e, "Failed to post archive summary");
        }
        Ok(url)
    }

    /// Delete the ticket channel after the settle delay, then its record.
    fn schedule_deletion(&self, channel_id: String) -> JoinHandle<()> {
        let platform = Arc::clone(&self.platform);
        let db = self.db.clone();
        let delay = self.config.delete_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match platform.delete_channel(&channel_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    // Record stays archived; the orphan pass retries.
                    warn!(channel = %channel_id, error = %e, "Failed to delete archived ticket channel");
                    return;
                }
            }
            match db.tickets().delete(&channel_id).await {
                Ok(_) => debug!(channel = %channel_id, "Archived ticket removed"),
                Err(e) => warn!(channel = %channel_id, error = %e, "Failed to purge archived ticket"),
            }
        })
    }

    /// Archive a ticket whose channel is gone, without a transcript.
    async fn archive_orphan(&self, ticket: &Ticket) -> LifecycleResult<bool> {
        let archived = self.db.tickets().mark_archived(&ticket.channel_id).await?;
        self.db
            .guilds()
            .remove_active_ticket(&ticket.guild_id, &ticket.channel_id)
            .await?;
        if archived {
            crate::metrics::record_reconcile_removal("ticket");
            info!(channel = %ticket.channel_id, number = ticket.ticket_number, "Archived ticket with vanished channel");
        }
        Ok(archived)
    }

    // ========================================================================
    // Messages and reconciliation
    // ========================================================================

    /// Someone wrote in a channel. Human authors in a live ticket become
    /// participants.
    pub async fn on_message(&self, channel_id: &str, author_id: &str, author_bot: bool) -> LifecycleResult<()> {
        if author_bot {
            return Ok(());
        }
        let Some(ticket) = self.db.tickets().find(channel_id).await? else {
            return Ok(());
        };
        if ticket.status != TicketStatus::Archived {
            self.db.tickets().add_participant(channel_id, author_id).await?;
        }
        Ok(())
    }

    /// Archive live tickets whose channel vanished and purge archived
    /// records whose channel is gone. Per-ticket failures are logged and
    /// skipped.
    pub async fn reconcile_orphans(&self) -> LifecycleResult<OrphanReport> {
        let mut report = OrphanReport::default();

        for ticket in self.db.tickets().find_non_archived().await? {
            match self.platform.channel(&ticket.channel_id).await {
                Ok(Some(_)) => {}
                Ok(None) => match self.archive_orphan(&ticket).await {
                    Ok(true) => report.archived += 1,
                    Ok(false) => {}
                    Err(e) => warn!(channel = %ticket.channel_id, error = %e, "Failed to archive orphaned ticket"),
                },
                Err(e) => warn!(channel = %ticket.channel_id, error = %e, "Ticket channel lookup failed"),
            }
        }

        for ticket in self.db.tickets().find_archived().await? {
            if let Err(e) = self.purge_archived(&ticket, &mut report).await {
                warn!(channel = %ticket.channel_id, error = %e, "Failed to purge archived ticket");
            }
        }

        if report != OrphanReport::default() {
            info!(archived = report.archived, purged = report.purged, "Ticket reconciliation complete");
        }
        Ok(report)
    }

    async fn purge_archived(&self, ticket: &Ticket, report: &mut OrphanReport) -> LifecycleResult<()> {
        if self.platform.channel(&ticket.channel_id).await?.is_some() {
            // A deletion that never happened.
            match self.platform.delete_channel(&ticket.channel_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        if self.db.tickets().delete(&ticket.channel_id).await? {
            report.purged += 1;
        }
        Ok(())
    }

    /// Remove transcripts past the retention period.
    pub async fn cleanup_transcripts(&self) -> LifecycleResult<usize> {
        transcript::cleanup(Path::new(&self.config.transcript_dir), self.config.transcript_retention())
            .await
            .map_err(|e| LifecycleError::Internal(format!("transcript cleanup: {e}")))
    }

    /// How long an archived ticket's channel lingers.
    pub fn delete_delay(&self) -> Duration {
        self.config.delete_delay()
    }
}

#[cfg(test)]
mod tests;
