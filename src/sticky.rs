//! Sticky notice engine.
//!
//! Keeps one notice as the most recent message of a channel. Every other
//! message deletes the posted copy and (re)starts a debounce timer; once
//! the channel has been quiet for the debounce window the notice is posted
//! again. Tracking is in memory only; a restart forgets it.
//!
//! All bookkeeping for a channel happens under its registry entry without
//! awaiting, so cancel-then-reschedule is atomic with respect to other
//! handlers. Timers carry a generation number and give up if a newer
//! message restarted the window while they slept. A timer is only aborted
//! while it sleeps; once it sends, a newer generation makes it delete its
//! own copy.

use crate::platform::{ChannelId, MessageId, OutgoingMessage, Platform};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Notice {
    template: OutgoingMessage,
    /// `Some` while posted, `None` while idle.
    message_id: Option<MessageId>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

struct Inner {
    platform: Arc<dyn Platform>,
    debounce: Duration,
    notices: DashMap<ChannelId, Notice>,
}

/// Registry of sticky notices, one per channel. Cheap to clone.
#[derive(Clone)]
pub struct StickyNotices {
    inner: Arc<Inner>,
}

impl StickyNotices {
    pub fn new(platform: Arc<dyn Platform>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                debounce,
                notices: DashMap::new(),
            }),
        }
    }

    /// Start tracking a channel. Does not post.
    pub fn setup(&self, channel_id: &str, template: OutgoingMessage) {
        let previous = self.inner.notices.insert(
            channel_id.to_string(),
            Notice {
                template,
                message_id: None,
                timer: None,
                generation: 0,
            },
        );
        if let Some(timer) = previous.and_then(|n| n.timer) {
            timer.abort();
        }
    }

    pub fn is_tracked(&self, channel_id: &str) -> bool {
        self.inner.notices.contains_key(channel_id)
    }

    /// Id of the posted copy, if the notice is currently posted.
    pub fn current_message(&self, channel_id: &str) -> Option<MessageId> {
        self.inner
            .notices
            .get(channel_id)
            .and_then(|n| n.message_id.clone())
    }

    /// Post the notice for the first time.
    pub async fn post_initial(&self, channel_id: &str) -> Option<MessageId> {
        let template = self.inner.notices.get(channel_id)?.template.clone();
        let sent = match self.inner.platform.send_message(channel_id, template).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Failed to post sticky notice");
                return None;
            }
        };

        let kept = match self.inner.notices.get_mut(channel_id) {
            Some(mut n) if n.message_id.is_none() => {
                n.message_id = Some(sent.id.clone());
                true
            }
            _ => false,
        };
        if kept {
            Some(sent.id)
        } else {
            // Torn down or already posted while we were sending.
            self.inner.discard(channel_id, &sent.id).await;
            None
        }
    }

    /// Feed a message posted in a channel.
    pub async fn on_channel_message(&self, channel_id: &str, message_id: &str) {
        let stale = {
            let Some(mut notice) = self.inner.notices.get_mut(channel_id) else {
                return;
            };
            if notice.message_id.as_deref() == Some(message_id) {
                return;
            }
            if let Some(timer) = notice.timer.take() {
                timer.abort();
            }
            notice.generation += 1;
            let generation = notice.generation;
            notice.timer = Some(tokio::spawn(Inner::repost_after_quiet(
                Arc::clone(&self.inner),
                channel_id.to_string(),
                generation,
            )));
            notice.message_id.take()
        };

        if let Some(stale) = stale {
            self.inner.discard(channel_id, &stale).await;
        }
    }

    /// Swap the notice content and update the posted copy in place.
    pub async fn replace_template(&self, channel_id: &str, template: OutgoingMessage) {
        let posted = {
            let Some(mut notice) = self.inner.notices.get_mut(channel_id) else {
                return;
            };
            notice.template = template.clone();
            notice.message_id.clone()
        };
        if let Some(message_id) = posted
            && let Err(e) = self
                .inner
                .platform
                .edit_message(channel_id, &message_id, template)
                .await
        {
            debug!(channel = %channel_id, error = %e, "Sticky notice edit failed; next repost carries it");
        }
    }

    /// Stop tracking a channel and cancel its timer. Returns the id of the
    /// copy that was posted, if any; deleting it is up to the caller.
    pub fn teardown(&self, channel_id: &str) -> Option<MessageId> {
        let (_, notice) = self.inner.notices.remove(channel_id)?;
        if let Some(timer) = notice.timer {
            timer.abort();
        }
        notice.message_id
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.inner.notices.len()
    }
}

impl Inner {
    async fn repost_after_quiet(self: Arc<Self>, channel_id: String, generation: u64) {
        tokio::time::sleep(self.debounce).await;

        let template = {
            let Some(mut notice) = self.notices.get_mut(&channel_id) else {
                return;
            };
            if notice.generation != generation || notice.message_id.is_some() {
                return;
            }
            // Not abortable from here on; a newer generation discards the copy.
            notice.timer = None;
            notice.template.clone()
        };

        let sent = match self.platform.send_message(&channel_id, template).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Failed to repost sticky notice");
                return;
            }
        };

        let current = match self.notices.get_mut(&channel_id) {
            Some(mut n) if n.generation == generation && n.message_id.is_none() => {
                n.message_id = Some(sent.id.clone());
                true
            }
            _ => false,
        };
        if current {
            crate::metrics::record_sticky_repost();
            debug!(channel = %channel_id, message = %sent.id, "Sticky notice reposted");
        } else {
            // A message arrived or the channel was torn down mid-send.
            self.discard(&channel_id, &sent.id).await;
        }
    }

    async fn discard(&self, channel_id: &str, message_id: &str) {
        match self.platform.delete_message(channel_id, message_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(channel = %channel_id, message = %message_id, error = %e, "Failed to delete sticky notice"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{CallKind, MemoryPlatform};
    use crate::platform::{ChannelKind, PlatformError};

    fn setup() -> (Arc<MemoryPlatform>, StickyNotices) {
        let platform = Arc::new(MemoryPlatform::new("bot"));
        platform.add_channel("g", "room", "room", ChannelKind::Voice, None, 0);
        let sticky = StickyNotices::new(platform.clone(), Duration::from_secs(7));
        sticky.setup("room", OutgoingMessage::text("notice"));
        (platform, sticky)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_messages_yields_one_delete_and_one_repost() {
        let (platform, sticky) = setup();
        let first = sticky.post_initial("room").await.unwrap();

        for id in ["m1", "m2", "m3"] {
            sticky.on_channel_message("room", id).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(sticky.current_message("room"), None);

        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(platform.count(CallKind::DeleteMessage), 1);
        assert_eq!(platform.count(CallKind::SendMessage), 2);
        let reposted = sticky.current_message("room").unwrap();
        assert_ne!(reposted, first);
        let history = platform.messages("room");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, reposted);
    }

    #[tokio::test(start_paused = true)]
    async fn own_message_does_not_trigger() {
        let (platform, sticky) = setup();
        let id = sticky.post_initial("room").await.unwrap();

        sticky.on_channel_message("room", &id).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(platform.count(CallKind::DeleteMessage), 0);
        assert_eq!(platform.count(CallKind::SendMessage), 1);
        assert_eq!(sticky.current_message("room"), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn already_deleted_notice_is_tolerated() {
        let (platform, sticky) = setup();
        sticky.post_initial("room").await.unwrap();
        platform.fail_next(CallKind::DeleteMessage, PlatformError::NotFound("message".into()));

        sticky.on_channel_message("room", "m1").await;
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(platform.count(CallKind::SendMessage), 2);
        assert!(sticky.current_message("room").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_pending_repost() {
        let (platform, sticky) = setup();
        sticky.post_initial("room").await.unwrap();
        sticky.on_channel_message("room", "m1").await;

        assert_eq!(sticky.teardown("room"), None);
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(platform.count(CallKind::SendMessage), 1);
        assert_eq!(sticky.tracked_count(), 0);
        assert!(!sticky.is_tracked("room"));
    }

    #[tokio::test(start_paused = true)]
    async fn message_during_slow_repost_leaves_one_copy() {
        let (platform, sticky) = setup();
        sticky.post_initial("room").await.unwrap();
        platform.set_send_latency(Duration::from_millis(500));

        sticky.on_channel_message("room", "m1").await;
        // The repost is visible in the channel but its send has not returned.
        tokio::time::sleep(Duration::from_millis(7200)).await;
        assert_eq!(platform.messages("room").len(), 1);
        assert_eq!(sticky.current_message("room"), None);

        sticky.on_channel_message("room", "m2").await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let history = platform.messages("room");
        assert_eq!(history.len(), 1);
        assert_eq!(sticky.current_message("room"), Some(history[0].id.clone()));
        assert_eq!(platform.count(CallKind::SendMessage), 3);
    }

    #[tokio::test]
    async fn untracked_channel_is_ignored() {
        let (platform, sticky) = setup();
        sticky.on_channel_message("elsewhere", "m1").await;
        assert!(sticky.post_initial("elsewhere").await.is_none());
        assert!(platform.calls().is_empty());
    }
}
