//! Event dispatcher.
//!
//! Consumes the typed event stream and routes every event to the machine
//! owning its resource. Each event runs in its own task on the
//! current-thread runtime, so handlers interleave only where they await.
//! A failing handler is logged, counted and answered; it never stops the
//! loop.

use crate::error::{LifecycleError, LifecycleResult};
use crate::events::{ComponentAction, PlatformEvent};
use crate::platform::Platform;
use crate::sticky::StickyNotices;
use crate::telemetry::{HandlerTimer, spans};
use crate::tickets::TicketLifecycle;
use crate::voice::VoiceLifecycle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

/// Routes platform events to the lifecycle machines.
pub struct Dispatcher {
    platform: Arc<dyn Platform>,
    voice: Arc<VoiceLifecycle>,
    tickets: Arc<TicketLifecycle>,
    sticky: StickyNotices,
}

/// A button press, unpacked.
struct Interaction<'a> {
    id: &'a str,
    guild_id: &'a str,
    channel_id: &'a str,
    user_id: &'a str,
    message_id: Option<&'a str>,
}

impl Dispatcher {
    pub fn new(
        platform: Arc<dyn Platform>,
        voice: Arc<VoiceLifecycle>,
        tickets: Arc<TicketLifecycle>,
        sticky: StickyNotices,
    ) -> Self {
        Self {
            platform,
            voice,
            tickets,
            sticky,
        }
    }

    /// Dispatch until the sender side closes, then wait for in-flight
    /// handlers.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PlatformEvent>) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let span = spans::event(event.kind(), event.channel_id());
                    let this = Arc::clone(&self);
                    tasks.spawn(async move { this.handle(event).await }.instrument(span));
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Event handler panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Event handler panicked");
            }
        }
        info!("Event stream closed, dispatcher stopped");
    }

    /// Handle one event to completion.
    pub async fn handle(&self, event: PlatformEvent) {
        let kind = event.kind();
        let _timer = HandlerTimer::new(kind);

        let result = match &event {
            PlatformEvent::VoiceJoined {
                guild_id,
                channel_id,
                user_id,
            } => self.voice.on_member_joined(guild_id, channel_id, user_id).await,
            PlatformEvent::VoiceLeft {
                guild_id,
                channel_id,
                user_id,
            } => self.voice.on_member_left(guild_id, channel_id, user_id).await,
            PlatformEvent::PresenceChanged {
                guild_id,
                user_id,
                activities,
            } => self.voice.on_presence_changed(guild_id, user_id, activities).await,
            PlatformEvent::MessagePosted {
                channel_id,
                message_id,
                author_id,
                author_bot,
                ..
            } => {
                self.sticky.on_channel_message(channel_id, message_id).await;
                self.tickets.on_message(channel_id, author_id, *author_bot).await
            }
            PlatformEvent::ComponentInteraction {
                interaction_id,
                guild_id,
                channel_id,
                user_id,
                custom_id,
                message_id,
            } => {
                let Some(action) = ComponentAction::parse(custom_id) else {
                    debug!(custom_id = %custom_id, "Ignoring unknown component");
                    return;
                };
                let interaction = Interaction {
                    id: interaction_id,
                    guild_id,
                    channel_id,
                    user_id,
                    message_id: message_id.as_deref(),
                };
                let span = spans::interaction(custom_id, user_id);
                self.interact(action, &interaction).instrument(span).await;
                return;
            }
        };

        if let Err(e) = result {
            self.report(kind, &e);
        }
    }

    async fn interact(&self, action: ComponentAction, interaction: &Interaction<'_>) {
        let reply = match self.run_action(action, interaction).await {
            Ok(reply) => reply,
            Err(e) => {
                self.report("component_interaction", &e);
                Some(e.user_reply())
            }
        };
        let Some(reply) = reply else {
            return;
        };
        if let Err(e) = self.platform.respond(interaction.id, &reply).await {
            warn!(interaction = %interaction.id, error = %e, "Failed to answer interaction");
        }
    }

    /// Run a button action. `Ok(None)` means the change is visible in the
    /// channel and needs no private answer.
    async fn run_action(
        &self,
        action: ComponentAction,
        i: &Interaction<'_>,
    ) -> LifecycleResult<Option<String>> {
        match action {
            ComponentAction::CreateTicket => {
                let ticket = self.tickets.open(i.guild_id, i.user_id).await?;
                Ok(Some(format!("Your ticket is ready: <#{}>", ticket.channel_id)))
            }
            ComponentAction::CloseTicket => {
                self.tickets.close(i.channel_id, i.user_id).await?;
                Ok(None)
            }
            ComponentAction::ReopenTicket => {
                self.tickets.reopen(i.channel_id, i.user_id).await?;
                Ok(None)
            }
            ComponentAction::DeleteTicket => {
                self.tickets
                    .request_archive(i.guild_id, i.channel_id, i.user_id)
                    .await?;
                Ok(None)
            }
            ComponentAction::ConfirmDelete => {
                // Deletion runs detached.
                let _ = self.tickets.archive(i.guild_id, i.channel_id, i.user_id).await?;
                Ok(Some(format!(
                    "Ticket archived. This channel will be deleted in {} seconds.",
                    self.tickets.delete_delay().as_secs()
                )))
            }
            ComponentAction::CancelDelete => {
                self.tickets.cancel_archive(i.channel_id, i.message_id).await?;
                Ok(Some("Archiving cancelled.".to_string()))
            }
            ComponentAction::TakeOverVoice => {
                let outcome = self.voice.take_over(i.guild_id, i.channel_id, i.user_id).await?;
                Ok(Some(outcome.reply().to_string()))
            }
            ComponentAction::AddMusicBot => {
                self.voice
                    .toggle_music_bot(i.channel_id, i.user_id, true, i.message_id)
                    .await?;
                Ok(Some("The music bot can join this room now.".to_string()))
            }
            ComponentAction::RemoveMusicBot => {
                self.voice
                    .toggle_music_bot(i.channel_id, i.user_id, false, i.message_id)
                    .await?;
                Ok(Some("The music bot was removed from this room.".to_string()))
            }
        }
    }

    fn report(&self, kind: &str, e: &LifecycleError) {
        crate::metrics::record_handler_error(kind, e.error_code());
        match e {
            LifecycleError::Rejected(_) | LifecycleError::PermissionDenied => {
                debug!(kind = %kind, code = e.error_code(), "Request rejected");
            }
            LifecycleError::NotFound(_) | LifecycleError::Conflict(_) | LifecycleError::Transient(_) => {
                warn!(kind = %kind, code = e.error_code(), error = %e, "Handler failed");
            }
            LifecycleError::Internal(_) => {
                error!(kind = %kind, error = %e, "Handler failed unexpectedly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TicketsConfig, VoiceConfig};
    use crate::db::Database;
    use crate::platform::memory::{CallKind, MemoryPlatform};
    use crate::platform::{ChannelKind, Member, OutgoingMessage};
    use std::time::Duration;

    const GUILD: &str = "g1";

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        dispatcher: Arc<Dispatcher>,
        sticky: StickyNotices,
        db: Database,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let platform = Arc::new(MemoryPlatform::new("bot"));
        platform.add_channel(GUILD, "lounge", "Lounge", ChannelKind::Category, None, 0);
        platform.add_channel(GUILD, "lobby", "+ New room", ChannelKind::Voice, Some("lounge"), 1);
        platform.add_channel(GUILD, "support", "Support", ChannelKind::Category, None, 2);
        platform.add_channel(GUILD, "archive", "archive", ChannelKind::Text, None, 3);
        platform.add_member(Member {
            id: "u1".to_string(),
            guild_id: GUILD.to_string(),
            display_name: "Ana".to_string(),
            activities: Vec::new(),
            roles: Vec::new(),
            bot: false,
        });

        let dir = tempfile::tempdir().unwrap();
        let voice_config = VoiceConfig {
            first_lobby: "unused-lobby".to_string(),
            second_lobby: "lobby".to_string(),
            first_permission_source: None,
            second_permission_source: None,
            bitrate: 64_000,
            owner_grace_secs: 900,
            sweep_interval_secs: 120,
            companion_notice: "Need music?".to_string(),
            media_bot_role: None,
            owner_role: None,
        };
        let tickets_config = TicketsConfig {
            category: "support".to_string(),
            archive_channel: "archive".to_string(),
            admin_role: "admin".to_string(),
            delete_delay_secs: 0,
            transcript_dir: dir.path().to_string_lossy().into_owned(),
            transcript_retention_days: 182,
            preview_limit: 1000,
        };

        let db = Database::new(":memory:").await.unwrap();
        let sticky = StickyNotices::new(platform.clone(), Duration::from_secs(7));
        let voice = Arc::new(VoiceLifecycle::new(
            platform.clone(),
            db.clone(),
            sticky.clone(),
            voice_config,
        ));
        let tickets = Arc::new(TicketLifecycle::new(platform.clone(), db.clone(), tickets_config));
        let dispatcher = Arc::new(Dispatcher::new(platform.clone(), voice, tickets, sticky.clone()));
        Fixture {
            platform,
            dispatcher,
            sticky,
            db,
            _dir: dir,
        }
    }

    fn press(id: &str, channel: &str, custom_id: &str) -> PlatformEvent {
        PlatformEvent::ComponentInteraction {
            interaction_id: id.to_string(),
            guild_id: GUILD.to_string(),
            channel_id: channel.to_string(),
            user_id: "u1".to_string(),
            custom_id: custom_id.to_string(),
            message_id: None,
        }
    }

    #[tokio::test]
    async fn ticket_button_answers_with_channel_or_rejection() {
        let f = fixture().await;

        f.dispatcher.handle(press("i1", "panel", ComponentAction::CREATE_TICKET)).await;
        f.dispatcher.handle(press("i2", "panel", ComponentAction::CREATE_TICKET)).await;

        let responses = f.platform.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], ("i1".to_string(), "Your ticket is ready: <#900001>".to_string()));
        assert_eq!(
            responses[1],
            ("i2".to_string(), "You already have an open ticket: <#900001>".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_buttons_are_dropped_silently() {
        let f = fixture().await;
        f.dispatcher.handle(press("i1", "panel", "btn-verify")).await;
        assert!(f.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn non_ticket_close_gets_rejection_text() {
        let f = fixture().await;
        f.dispatcher.handle(press("i1", "general", ComponentAction::CLOSE_TICKET)).await;
        assert_eq!(
            f.platform.responses(),
            vec![("i1".to_string(), "This is not a ticket channel.".to_string())]
        );
    }

    #[tokio::test]
    async fn run_drains_the_stream_then_stops() {
        let f = fixture().await;
        let (tx, rx) = mpsc::channel(16);
        let runner = tokio::spawn(Arc::clone(&f.dispatcher).run(rx));

        let join = PlatformEvent::VoiceJoined {
            guild_id: GUILD.to_string(),
            channel_id: "lobby".to_string(),
            user_id: "u1".to_string(),
        };
        f.platform.observe(&join);
        tx.send(join).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        let rooms = f.db.voice_rooms().find_all().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].owner_id, "u1");
        assert_eq!(f.platform.channels_named("Ana voice").len(), 1);
        assert_eq!(f.platform.occupants(&rooms[0].channel_id), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn posted_messages_feed_the_sticky_engine() {
        let f = fixture().await;
        f.platform.add_channel(GUILD, "rules", "rules", ChannelKind::Text, None, 9);
        f.sticky.setup("rules", OutgoingMessage::text("Read the rules"));
        f.sticky.post_initial("rules").await.unwrap();

        f.dispatcher
            .handle(PlatformEvent::MessagePosted {
                guild_id: GUILD.to_string(),
                channel_id: "rules".to_string(),
                message_id: "m1".to_string(),
                author_id: "u1".to_string(),
                author_bot: false,
                content: "hi".to_string(),
            })
            .await;

        assert_eq!(f.platform.count(CallKind::DeleteMessage), 1);
        assert_eq!(f.sticky.current_message("rules"), None);
    }
}
