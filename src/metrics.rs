//! Prometheus metrics collection for ephemerd.
//!
//! Exposed over HTTP by [`crate::http`] when `server.metrics_port` is set.
//!
//! - `ephemerd_events_total{kind}` - platform events dispatched
//! - `ephemerd_event_duration_seconds{kind}` - handler latency
//! - `ephemerd_handler_errors_total{kind,code}` - per-event failures
//! - `ephemerd_voice_rooms{action}` - rooms created, renamed, handed over, deleted
//! - `ephemerd_tickets{action}` - tickets opened, closed, reopened, archived
//! - `ephemerd_ticket_conflicts_total{outcome}` - numbering races
//! - `ephemerd_sticky_reposts_total` - sticky notices reposted
//! - `ephemerd_reconcile_removals_total{resource}` - drift corrected by sweeps

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Dispatcher
// ========================================================================

pub static EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

pub static EVENT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

pub static HANDLER_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Lifecycle machines
// ========================================================================

pub static VOICE_ROOMS: OnceLock<IntCounterVec> = OnceLock::new();

pub static TICKETS: OnceLock<IntCounterVec> = OnceLock::new();

/// Ticket-number uniqueness violations, by `recovered` / `failed`.
pub static TICKET_CONFLICTS: OnceLock<IntCounterVec> = OnceLock::new();

pub static STICKY_REPOSTS: OnceLock<IntCounter> = OnceLock::new();

pub static RECONCILE_REMOVALS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            }
        };
    }

    register!(EVENTS, IntCounterVec::new(Opts::new("ephemerd_events_total", "Platform events dispatched by kind"), &["kind"]));
    register!(EVENT_LATENCY, HistogramVec::new(
        HistogramOpts::new("ephemerd_event_duration_seconds", "Event handler latency by kind")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["kind"]));
    register!(HANDLER_ERRORS, IntCounterVec::new(Opts::new("ephemerd_handler_errors_total", "Event handler errors by kind and code"), &["kind", "code"]));
    register!(VOICE_ROOMS, IntCounterVec::new(Opts::new("ephemerd_voice_rooms_total", "Voice room lifecycle transitions"), &["action"]));
    register!(TICKETS, IntCounterVec::new(Opts::new("ephemerd_tickets_total", "Ticket lifecycle transitions"), &["action"]));
    register!(TICKET_CONFLICTS, IntCounterVec::new(Opts::new("ephemerd_ticket_conflicts_total", "Ticket number collisions"), &["outcome"]));
    register!(STICKY_REPOSTS, IntCounter::new("ephemerd_sticky_reposts_total", "Sticky notices reposted after a quiet period"));
    register!(RECONCILE_REMOVALS, IntCounterVec::new(Opts::new("ephemerd_reconcile_removals_total", "Records or channels removed by reconciliation"), &["resource"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn inc(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

/// Record a handled event with latency.
#[inline]
pub fn record_event(kind: &str, duration_secs: f64) {
    inc(&EVENTS, &[kind]);
    if let Some(h) = EVENT_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}

#[inline]
pub fn record_handler_error(kind: &str, code: &str) {
    inc(&HANDLER_ERRORS, &[kind, code]);
}

/// `created`, `renamed`, `handed_over`, `deleted`.
#[inline]
pub fn record_voice(action: &str) {
    inc(&VOICE_ROOMS, &[action]);
}

/// `opened`, `closed`, `reopened`, `archived`.
#[inline]
pub fn record_ticket(action: &str) {
    inc(&TICKETS, &[action]);
}

#[inline]
pub fn record_ticket_conflict(outcome: &str) {
    inc(&TICKET_CONFLICTS, &[outcome]);
}

#[inline]
pub fn record_sticky_repost() {
    if let Some(c) = STICKY_REPOSTS.get() {
        c.inc();
    }
}

/// `voice_record`, `voice_channel`, `ticket`, `transcript`.
#[inline]
pub fn record_reconcile_removal(resource: &str) {
    inc(&RECONCILE_REMOVALS, &[resource]);
}
