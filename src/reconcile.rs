//! Background reconciliation.
//!
//! Events can be missed while the process is down or the gateway drops
//! them. These loops re-derive state from the platform on a schedule:
//! the voice sweep every couple of minutes, the ticket orphan pass on a
//! long interval, transcript retention once a day.

use crate::telemetry::spans;
use crate::tickets::TicketLifecycle;
use crate::voice::VoiceLifecycle;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Transcript retention runs once a day.
pub const TRANSCRIPT_CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Owns the periodic passes over every machine.
pub struct Reconciler {
    voice: Arc<VoiceLifecycle>,
    tickets: Arc<TicketLifecycle>,
    sweep_interval: Duration,
    reconcile_interval: Duration,
}

impl Reconciler {
    pub fn new(
        voice: Arc<VoiceLifecycle>,
        tickets: Arc<TicketLifecycle>,
        sweep_interval: Duration,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            voice,
            tickets,
            sweep_interval,
            reconcile_interval,
        }
    }

    /// One full pass before the event stream is consumed: drop rooms and
    /// tickets whose channels vanished while we were away, delete rooms
    /// abandoned meanwhile and prune old transcripts. Failures are logged;
    /// startup continues.
    pub async fn startup(&self) {
        async {
            self.sweep_voice().await;
            self.reconcile_tickets().await;
            self.cleanup_transcripts().await;
        }
        .instrument(spans::sweep("startup"))
        .await;
        info!("Startup reconciliation complete");
    }

    async fn sweep_voice(&self) {
        if let Err(e) = self.voice.sweep().await {
            warn!(error = %e, "Voice sweep failed");
        }
    }

    async fn reconcile_tickets(&self) {
        if let Err(e) = self.tickets.reconcile_orphans().await {
            warn!(error = %e, "Ticket reconciliation failed");
        }
    }

    async fn cleanup_transcripts(&self) {
        if let Err(e) = self.tickets.cleanup_transcripts().await {
            warn!(error = %e, "Transcript cleanup failed");
        }
    }

    /// Periodic voice sweep.
    pub fn spawn_voice_sweep(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        spawn_every("voice_sweep", self.sweep_interval, shutdown, move || {
            let this = Arc::clone(&this);
            async move { this.sweep_voice().await }
        })
    }

    /// Long-interval pass over tickets and rooms.
    pub fn spawn_reconcile(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        spawn_every("reconcile", self.reconcile_interval, shutdown, move || {
            let this = Arc::clone(&this);
            async move {
                this.reconcile_tickets().await;
                this.sweep_voice().await;
            }
        })
    }

    pub fn spawn_transcript_cleanup(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        spawn_every("transcript_cleanup", TRANSCRIPT_CLEANUP_PERIOD, shutdown, move || {
            let this = Arc::clone(&this);
            async move { this.cleanup_transcripts().await }
        })
    }
}

/// Run `job` every `period` until `shutdown` fires. The first run happens
/// one period after spawning; startup covers the immediate pass.
fn spawn_every<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, period_secs = period.as_secs(), "Background task started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    job().instrument(spans::sweep(name)).await;
                }
            }
        }
        debug!(task = name, "Background task stopped");
    })
}
