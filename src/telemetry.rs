//! Telemetry utilities for handler timing and span construction.

use std::time::Instant;

/// Guard for timing an event handler and recording metrics.
///
/// Records latency when dropped.
pub struct HandlerTimer {
    kind: &'static str,
    start: Instant,
}

impl HandlerTimer {
    /// Start timing a handler for an event kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for HandlerTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_event(self.kind, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one inbound platform event.
    pub fn event(kind: &str, channel: Option<&str>) -> Span {
        if let Some(channel) = channel {
            info_span!("event", kind = %kind, channel = %channel)
        } else {
            info_span!("event", kind = %kind)
        }
    }

    /// Span for a background sweep.
    pub fn sweep(name: &str) -> Span {
        info_span!("sweep", name = %name)
    }

    /// Span for a button interaction.
    pub fn interaction(custom_id: &str, actor: &str) -> Span {
        info_span!("interaction", custom_id = %custom_id, actor = %actor)
    }
}
