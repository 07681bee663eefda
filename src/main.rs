//! ephemerd - ephemeral resource lifecycle daemon
//!
//! Keeps temporary voice rooms, support tickets and sticky notices on a
//! real-time chat platform consistent with the local store, driven by the
//! platform's event stream and periodic reconciliation.

mod config;
mod db;
mod dispatch;
mod error;
mod events;
mod http;
mod metrics;
mod platform;
mod reconcile;
mod sticky;
mod telemetry;
mod tickets;
mod voice;

use crate::config::Config;
use crate::db::Database;
use crate::dispatch::Dispatcher;
use crate::events::PlatformEvent;
use crate::platform::memory::MemoryPlatform;
use crate::platform::{ChannelKind, Platform, Role};
use crate::reconcile::Reconciler;
use crate::sticky::StickyNotices;
use crate::tickets::TicketLifecycle;
use crate::voice::VoiceLifecycle;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Events buffered between the source and the dispatcher.
const EVENT_QUEUE_SIZE: usize = 1024;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        backend = %config.platform.backend,
        guild = %config.platform.guild_id,
        database = %config.database.path,
        "Starting ephemerd"
    );

    // A store that cannot be opened is fatal.
    let db = Database::new(&config.database.path).await?;

    let memory = Arc::new(MemoryPlatform::new("ephemerd"));
    seed_memory_platform(&memory, &config);
    let platform: Arc<dyn Platform> = memory.clone();

    let shutdown = CancellationToken::new();

    // Convention: metrics_port = 0 disables the HTTP endpoint.
    let metrics_port = config.server.metrics_port;
    let http_task = if metrics_port == 0 {
        info!("Metrics disabled");
        None
    } else {
        metrics::init();
        info!("Metrics initialized");
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            http::run_http_server(metrics_port, shutdown).await;
        }))
    };

    let sticky = StickyNotices::new(Arc::clone(&platform), config.sticky.debounce());
    let voice = Arc::new(VoiceLifecycle::new(
        Arc::clone(&platform),
        db.clone(),
        sticky.clone(),
        config.voice.clone(),
    ));
    let tickets = Arc::new(TicketLifecycle::new(
        Arc::clone(&platform),
        db.clone(),
        config.tickets.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&voice),
        Arc::clone(&tickets),
        config.voice.sweep_interval(),
        config.server.reconcile_interval(),
    ));
    reconciler.startup().await;
    let background = [
        reconciler.spawn_voice_sweep(shutdown.clone()),
        reconciler.spawn_reconcile(shutdown.clone()),
        reconciler.spawn_transcript_cleanup(shutdown.clone()),
    ];

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let dispatcher = Arc::new(Dispatcher::new(platform, voice, tickets, sticky));
    let dispatch_task = tokio::spawn(dispatcher.run(rx));

    let ingest = read_events(&memory, tx).await;

    // The sender is gone; the dispatcher drains what is queued.
    if let Err(e) = dispatch_task.await {
        error!(error = %e, "Dispatcher task failed");
    }
    shutdown.cancel();
    for task in background {
        let _ = task.await;
    }
    if let Some(task) = http_task {
        let _ = task.await;
    }
    info!("Shutdown complete");

    ingest
}

/// Feed newline-delimited JSON events from stdin until EOF or Ctrl-C.
///
/// Each event is applied to the in-memory world first so handlers observe
/// the state the event describes.
async fn read_events(memory: &MemoryPlatform, events: mpsc::Sender<PlatformEvent>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            info!("Event source closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PlatformEvent>(line) {
            Ok(event) => {
                memory.observe(&event);
                if events.send(event).await.is_err() {
                    warn!("Dispatcher gone, dropping event source");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Skipping malformed event"),
        }
    }
    Ok(())
}

/// Create the configured channels and roles in the memory backend.
fn seed_memory_platform(memory: &MemoryPlatform, config: &Config) {
    let guild = config.platform.guild_id.as_str();
    let voice = &config.voice;
    let tickets = &config.tickets;

    memory.add_channel(guild, &voice.first_lobby, "+ Create room", ChannelKind::Voice, None, 0);
    memory.add_channel(guild, &voice.second_lobby, "+ Create lounge", ChannelKind::Voice, None, 1);
    for source in [&voice.first_permission_source, &voice.second_permission_source]
        .into_iter()
        .flatten()
    {
        memory.add_channel(guild, source, "room-template", ChannelKind::Category, None, 2);
    }
    memory.add_channel(guild, &tickets.category, "Tickets", ChannelKind::Category, None, 3);
    memory.add_channel(guild, &tickets.archive_channel, "ticket-archive", ChannelKind::Text, None, 4);

    memory.add_role(
        guild,
        Role {
            id: tickets.admin_role.clone(),
            position: 10,
        },
    );
    for role in [&voice.media_bot_role, &voice.owner_role].into_iter().flatten() {
        memory.add_role(
            guild,
            Role {
                id: role.clone(),
                position: 1,
            },
        );
    }
    info!(guild = %guild, "Memory platform seeded");
}
