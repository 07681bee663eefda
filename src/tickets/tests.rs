use super::*;
use crate::platform::memory::{CallKind, MemoryPlatform};
use crate::platform::{Member, PlatformError, Role};
use futures_util::future::join_all;

const GUILD: &str = "g1";

struct Fixture {
    platform: Arc<MemoryPlatform>,
    tickets: TicketLifecycle,
    db: Database,
    dir: tempfile::TempDir,
}

fn member(id: &str, name: &str, roles: &[&str]) -> Member {
    Member {
        id: id.to_string(),
        guild_id: GUILD.to_string(),
        display_name: name.to_string(),
        activities: Vec::new(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        bot: false,
    }
}

async fn fixture_with_delay(delete_delay_secs: u64) -> Fixture {
    let platform = Arc::new(MemoryPlatform::new("bot"));
    platform.add_channel(GUILD, "support", "Support", ChannelKind::Category, None, 0);
    platform.add_channel(GUILD, "archive", "ticket-archive", ChannelKind::Text, None, 1);
    for (id, position) in [("admin", 5), ("moderator", 9), ("helper", 2)] {
        platform.add_role(
            GUILD,
            Role {
                id: id.to_string(),
                position,
            },
        );
    }
    platform.add_member(member("u1", "Ana", &[]));
    platform.add_member(member("u2", "Budi", &[]));
    platform.add_member(member("s1", "Sari", &["admin"]));
    platform.add_member(member("s2", "Dewi", &["moderator"]));
    platform.add_member(member("h1", "Hadi", &["helper"]));

    let dir = tempfile::tempdir().unwrap();
    let config = TicketsConfig {
        category: "support".to_string(),
        archive_channel: "archive".to_string(),
        admin_role: "admin".to_string(),
        delete_delay_secs,
        transcript_dir: dir.path().join("transcripts").to_string_lossy().into_owned(),
        transcript_retention_days: 182,
        preview_limit: 1000,
    };
    let db = Database::new(":memory:").await.unwrap();
    let tickets = TicketLifecycle::new(platform.clone(), db.clone(), config);
    Fixture {
        platform,
        tickets,
        db,
        dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with_delay(0).await
}

impl Fixture {
    /// Pretend seven tickets were opened before, the last one still on record.
    async fn seed_history(&self) {
        self.db
            .tickets()
            .insert(&NewTicket {
                channel_id: "old-7",
                guild_id: GUILD,
                owner_id: "u9",
                ticket_number: 7,
                welcome_message_id: None,
                created_at: 0,
            })
            .await
            .unwrap();
        self.db.tickets().mark_archived("old-7").await.unwrap();
        self.db.guilds().raise_counter(GUILD, 7).await.unwrap();
    }

    async fn status(&self, channel: &str) -> TicketStatus {
        self.db.tickets().find(channel).await.unwrap().unwrap().status
    }

    fn rejection(err: LifecycleError) -> Rejection {
        match err {
            LifecycleError::Rejected(r) => r,
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn open_close_archive_scenario() {
    let f = fixture_with_delay(1).await;
    f.seed_history().await;

    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    assert_eq!(ticket.ticket_number, 8);
    assert_eq!(ticket.status, TicketStatus::Open);
    let channel = f.platform.channel_snapshot(&ticket.channel_id).unwrap();
    assert_eq!(channel.name, "Ana-008");
    assert_eq!(channel.parent.as_deref(), Some("support"));
    assert!(channel.overwrite_for(GUILD).unwrap().deny.contains(Permissions::VIEW_CHANNEL));
    assert!(channel.overwrite_for("admin").unwrap().allow.contains(Permissions::MANAGE_MESSAGES));
    let welcome = &f.platform.messages(&ticket.channel_id)[0];
    assert_eq!(Some(&welcome.id), ticket.welcome_message_id.as_ref());
    assert_eq!(welcome.content, "<@u1>");
    assert_eq!(
        f.db.guilds().active_tickets(GUILD).await.unwrap(),
        vec![ticket.channel_id.clone()]
    );

    f.tickets.close(&ticket.channel_id, "u1").await.unwrap();
    assert_eq!(f.status(&ticket.channel_id).await, TicketStatus::Closed);

    let archived = f.tickets.archive(GUILD, &ticket.channel_id, "s1").await.unwrap();
    assert_eq!(archived.ticket_number, 8);
    assert_eq!(f.status(&ticket.channel_id).await, TicketStatus::Archived);
    assert!(f.db.guilds().active_tickets(GUILD).await.unwrap().is_empty());
    assert!(archived.preview.contains("Owner: Ana"));
    assert!(archived.transcript_path.as_ref().unwrap().exists());
    assert!(archived.transcript_url.as_ref().unwrap().starts_with("memory://archive/"));

    let posted = f.platform.messages("archive");
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].attachments.len(), 1);
    assert!(posted[0].attachments[0].name.starts_with("transcript-g1-8-"));
    assert_eq!(posted[1].embeds[0].title.as_deref(), Some("Ticket #008 archived"));

    // The channel lingers for the settle delay.
    assert!(f.platform.channel_snapshot(&ticket.channel_id).is_some());
    archived.deletion.await.unwrap();
    assert!(f.platform.channel_snapshot(&ticket.channel_id).is_none());
    assert!(f.db.tickets().find(&ticket.channel_id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_opens_get_contiguous_numbers() {
    let f = fixture().await;
    f.seed_history().await;
    let users = ["c1", "c2", "c3", "c4", "c5"];
    for user in users {
        f.platform.add_member(member(user, user, &[]));
    }

    let results = join_all(users.iter().map(|u| f.tickets.open(GUILD, u))).await;

    let mut numbers: Vec<i64> = results
        .into_iter()
        .map(|r| r.unwrap().ticket_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (8..13).collect::<Vec<_>>());
    assert_eq!(f.db.guilds().active_tickets(GUILD).await.unwrap().len(), 5);
}

#[tokio::test]
async fn taken_number_is_recovered_once() {
    let f = fixture().await;
    // A ticket the counter does not know about.
    f.db.tickets()
        .insert(&NewTicket {
            channel_id: "legacy",
            guild_id: GUILD,
            owner_id: "u9",
            ticket_number: 1,
            welcome_message_id: None,
            created_at: 0,
        })
        .await
        .unwrap();

    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();

    assert_eq!(ticket.ticket_number, 2);
    assert_eq!(f.platform.channel_snapshot(&ticket.channel_id).unwrap().name, "Ana-002");
    assert_eq!(f.db.guilds().ticket_counter(GUILD).await.unwrap(), 2);

    let next = f.tickets.open(GUILD, "u2").await.unwrap();
    assert_eq!(next.ticket_number, 3);
}

#[tokio::test]
async fn unrecordable_ticket_channel_is_deleted_again() {
    let f = fixture().await;
    // Squat the id the platform hands out next so both inserts collide.
    f.db.tickets()
        .insert(&NewTicket {
            channel_id: "900001",
            guild_id: GUILD,
            owner_id: "u9",
            ticket_number: 1,
            welcome_message_id: None,
            created_at: 0,
        })
        .await
        .unwrap();

    let err = f.tickets.open(GUILD, "u1").await.unwrap_err();

    assert!(matches!(err, LifecycleError::Conflict(_)), "{err:?}");
    assert!(f.platform.channels_named("Ana-001").is_empty());
    assert_eq!(f.platform.count(CallKind::DeleteChannel), 1);
    assert!(f.db.guilds().active_tickets(GUILD).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_ticket_is_refused_until_channel_vanishes() {
    let f = fixture().await;
    let first = f.tickets.open(GUILD, "u1").await.unwrap();

    let err = f.tickets.open(GUILD, "u1").await.unwrap_err();
    assert_eq!(
        Fixture::rejection(err),
        Rejection::AlreadyHasTicket {
            channel_id: first.channel_id.clone()
        }
    );

    f.platform.remove_channel(&first.channel_id);
    let second = f.tickets.open(GUILD, "u1").await.unwrap();

    assert_eq!(second.ticket_number, 2);
    assert_eq!(f.status(&first.channel_id).await, TicketStatus::Archived);
    assert_eq!(
        f.db.guilds().active_tickets(GUILD).await.unwrap(),
        vec![second.channel_id]
    );
}

#[tokio::test]
async fn double_pressed_open_yields_one_ticket() {
    let f = fixture().await;

    let results = join_all([f.tickets.open(GUILD, "u1"), f.tickets.open(GUILD, "u1")]).await;

    let (opened, refused): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    assert_eq!(opened.len(), 1);
    let winner = opened.into_iter().next().unwrap().unwrap();
    let refusal = refused.into_iter().next().unwrap().unwrap_err();
    assert_eq!(
        Fixture::rejection(refusal),
        Rejection::AlreadyHasTicket {
            channel_id: winner.channel_id.clone()
        }
    );

    // Whatever channel the loser created is gone again.
    let live = f.platform.channels_named("Ana-001").len() + f.platform.channels_named("Ana-002").len();
    assert_eq!(live, 1);
    assert!(f.platform.channel_snapshot(&winner.channel_id).is_some());
    assert_eq!(
        f.db.guilds().active_tickets(GUILD).await.unwrap(),
        vec![winner.channel_id.clone()]
    );
    assert_eq!(
        f.db.tickets().find_open_for_owner(GUILD, "u1").await.unwrap().unwrap().channel_id,
        winner.channel_id
    );
}

#[tokio::test]
async fn close_and_reopen_follow_status() {
    let f = fixture().await;
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();

    let err = f.tickets.close(ch, "u2").await.unwrap_err();
    assert!(matches!(err, LifecycleError::PermissionDenied));
    let err = f.tickets.reopen(ch, "u1").await.unwrap_err();
    assert_eq!(Fixture::rejection(err), Rejection::TicketNotClosed);

    f.tickets.close(ch, "u1").await.unwrap();
    let err = f.tickets.close(ch, "s1").await.unwrap_err();
    assert_eq!(Fixture::rejection(err), Rejection::TicketAlreadyClosed);

    let stored = f.db.tickets().find(ch).await.unwrap().unwrap();
    assert_eq!(stored.closed_by.as_deref(), Some("u1"));
    assert!(stored.closed_at.is_some());
    let channel = f.platform.channel_snapshot(ch).unwrap();
    assert!(channel.overwrite_for("u1").unwrap().deny.contains(Permissions::SEND_MESSAGES));
    let status_id = stored.status_message_id.clone().unwrap();
    let welcome_id = stored.welcome_message_id.clone().unwrap();
    let welcome = f.platform.messages(ch).into_iter().find(|m| m.id == welcome_id).unwrap();
    assert_eq!(welcome.embeds[0].title.as_deref(), Some("Ticket closed"));

    f.tickets.reopen(ch, "s1").await.unwrap();

    let stored = f.db.tickets().find(ch).await.unwrap().unwrap();
    assert_eq!(stored.status, TicketStatus::Open);
    assert_eq!(stored.closed_at, None);
    assert_eq!(stored.status_message_id.as_deref(), Some(status_id.as_str()));
    let history = f.platform.messages(ch);
    let status = history.iter().find(|m| m.id == status_id).unwrap();
    assert_eq!(status.content, "Ticket reopened by <@s1>.");
    let channel = f.platform.channel_snapshot(ch).unwrap();
    let overwrite = channel.overwrite_for("u1").unwrap();
    assert!(overwrite.allow.contains(Permissions::SEND_MESSAGES));
    assert!(!overwrite.deny.contains(Permissions::SEND_MESSAGES));
    // Welcome, then a single status message edited in place.
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn lost_status_message_is_posted_again() {
    let f = fixture().await;
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();
    f.tickets.close(ch, "u1").await.unwrap();
    let first = f.db.tickets().find(ch).await.unwrap().unwrap().status_message_id.unwrap();
    f.platform.delete_message(ch, &first).await.unwrap();

    f.tickets.reopen(ch, "u1").await.unwrap();

    let second = f.db.tickets().find(ch).await.unwrap().unwrap().status_message_id.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn privilege_follows_role_rank() {
    let f = fixture().await;
    assert!(f.tickets.is_privileged(GUILD, "s1").await.unwrap());
    assert!(f.tickets.is_privileged(GUILD, "s2").await.unwrap());
    assert!(!f.tickets.is_privileged(GUILD, "h1").await.unwrap());
    assert!(!f.tickets.is_privileged(GUILD, "u1").await.unwrap());
    assert!(!f.tickets.is_privileged(GUILD, "nobody").await.unwrap());
}

#[tokio::test]
async fn archive_needs_privilege_and_closed_ticket() {
    let f = fixture().await;
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();

    let err = f.tickets.request_archive(GUILD, ch, "s1").await.unwrap_err();
    assert_eq!(Fixture::rejection(err), Rejection::TicketNotClosed);
    let err = f.tickets.archive(GUILD, ch, "s1").await.unwrap_err();
    assert_eq!(Fixture::rejection(err), Rejection::TicketNotClosed);

    f.tickets.close(ch, "u1").await.unwrap();
    let err = f.tickets.request_archive(GUILD, ch, "u1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::PermissionDenied));
    let err = f.tickets.archive(GUILD, ch, "h1").await.unwrap_err();
    assert!(matches!(err, LifecycleError::PermissionDenied));

    f.tickets.request_archive(GUILD, ch, "s2").await.unwrap();
    let prompt = f.platform.messages(ch).pop().unwrap();
    assert!(prompt.buttons.contains(&Button::component(ComponentAction::CONFIRM_DELETE, "Archive")));

    f.tickets.cancel_archive(ch, Some(&prompt.id)).await.unwrap();
    assert!(f.platform.messages(ch).iter().all(|m| m.id != prompt.id));
    // Already gone is fine.
    f.tickets.cancel_archive(ch, Some(&prompt.id)).await.unwrap();

    assert_eq!(f.status(ch).await, TicketStatus::Closed);
    let archived = f.tickets.archive(GUILD, ch, "s2").await.unwrap();
    archived.deletion.await.unwrap();
    let err = f.tickets.archive(GUILD, ch, "s2").await.unwrap_err();
    assert_eq!(Fixture::rejection(err), Rejection::NotTicket);
}

#[tokio::test]
async fn failed_upload_leaves_ticket_closed() {
    let f = fixture().await;
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();
    f.tickets.close(ch, "u1").await.unwrap();
    f.platform
        .fail_next(CallKind::SendMessage, PlatformError::Transient("429".into()));

    let err = f.tickets.archive(GUILD, ch, "s1").await.unwrap_err();

    assert!(matches!(err, LifecycleError::Transient(_)), "{err:?}");
    assert_eq!(f.status(ch).await, TicketStatus::Closed);
    assert!(f.platform.channel_snapshot(ch).is_some());
    assert_eq!(f.db.guilds().active_tickets(GUILD).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_archive_channel_still_archives() {
    let f = fixture().await;
    f.platform.remove_channel("archive");
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();
    f.tickets.close(ch, "u1").await.unwrap();

    let archived = f.tickets.archive(GUILD, ch, "s1").await.unwrap();

    assert_eq!(archived.transcript_url, None);
    assert!(archived.transcript_path.is_some());
    archived.deletion.await.unwrap();
    assert!(f.platform.channel_snapshot(ch).is_none());
}

#[tokio::test]
async fn human_authors_become_participants() {
    let f = fixture().await;
    let ticket = f.tickets.open(GUILD, "u1").await.unwrap();
    let ch = ticket.channel_id.as_str();

    f.tickets.on_message(ch, "s1", false).await.unwrap();
    f.tickets.on_message(ch, "s1", false).await.unwrap();
    f.tickets.on_message(ch, "bot", true).await.unwrap();
    f.tickets.on_message("elsewhere", "u2", false).await.unwrap();

    assert_eq!(f.db.tickets().participants(ch).await.unwrap(), vec!["s1", "u1"]);
}

#[tokio::test]
async fn orphans_are_archived_and_purged() {
    let f = fixture().await;
    f.platform.add_member(member("u3", "Citra", &[]));
    let vanished = f.tickets.open(GUILD, "u1").await.unwrap();
    let live = f.tickets.open(GUILD, "u2").await.unwrap();
    let stuck = f.tickets.open(GUILD, "u3").await.unwrap();
    f.platform.remove_channel(&vanished.channel_id);
    // Archived, but its channel deletion never happened.
    f.db.tickets().mark_archived(&stuck.channel_id).await.unwrap();

    let report = f.tickets.reconcile_orphans().await.unwrap();

    assert_eq!(report, OrphanReport { archived: 1, purged: 2 });
    assert!(f.db.tickets().find(&vanished.channel_id).await.unwrap().is_none());
    assert!(f.db.tickets().find(&stuck.channel_id).await.unwrap().is_none());
    assert!(f.platform.channel_snapshot(&stuck.channel_id).is_none());
    assert_eq!(f.status(&live.channel_id).await, TicketStatus::Open);

    let again = f.tickets.reconcile_orphans().await.unwrap();
    assert_eq!(again, OrphanReport::default());
}

#[tokio::test]
async fn transcript_cleanup_uses_configured_dir() {
    let f = fixture().await;
    let dir = f.dir.path().join("transcripts");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("transcript-g1-1-20200101000000.html"), b"<html></html>")
        .await
        .unwrap();

    // Fresh files are kept under the default retention.
    assert_eq!(f.tickets.cleanup_transcripts().await.unwrap(), 0);
    assert!(dir.join("transcript-g1-1-20200101000000.html").exists());
}
