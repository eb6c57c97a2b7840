//! Subscription registry and event fan-out.
//!
//! Every push-style request becomes an entry keyed by subscription id and
//! indexed by the owning channel. Each entry holds a [`TeardownGuard`];
//! removing the entry, by `unsubscribe` or by closing the channel, drops
//! the guard and runs its teardown exactly once.

use crate::channel::{Channel, ChannelId};
use crate::protocol::{EventType, OutboundMessage, PushEvent};
use dappgate_core::Origin;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type SubscriptionId = String;

/// Runs its teardown once, when dropped.
pub struct TeardownGuard(Option<Box<dyn FnOnce() + Send>>);

impl TeardownGuard {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(teardown)))
    }

    /// Cancel a token on teardown.
    pub fn cancel(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }
}

struct Entry {
    channel: ChannelId,
    origin: Option<Origin>,
    _guard: TeardownGuard,
}

#[derive(Default)]
struct HubState {
    subs: HashMap<SubscriptionId, Entry>,
    by_channel: HashMap<ChannelId, HashSet<SubscriptionId>>,
}

/// Owner of every live subscription.
pub struct SubscriptionHub {
    state: Mutex<HubState>,
    tracker: TaskTracker,
    root: CancellationToken,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            tracker: TaskTracker::new(),
            root: CancellationToken::new(),
        }
    }

    /// Register a listener under `channel`.
    ///
    /// Returns `None`, after running the teardown, if the channel is already
    /// closed; a late registration must not outlive its channel.
    pub fn register(&self, channel: &Channel, guard: TeardownGuard) -> Option<SubscriptionId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.register_with_id(channel, id, guard)
    }

    /// Same as [`register`](Self::register) with a caller-chosen id, e.g. one
    /// the node assigned. An id already in use is rejected.
    pub fn register_with_id(
        &self,
        channel: &Channel,
        id: SubscriptionId,
        guard: TeardownGuard,
    ) -> Option<SubscriptionId> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        if channel.is_closed() || state.subs.contains_key(&id) {
            drop(state);
            drop(guard);
            return None;
        }
        state.subs.insert(
            id.clone(),
            Entry {
                channel: channel.id(),
                origin: channel.origin().cloned(),
                _guard: guard,
            },
        );
        state.by_channel.entry(channel.id()).or_default().insert(id.clone());
        tracing::debug!("Subscription {} opened on channel {}", id, channel.id());
        Some(id)
    }

    /// Spawn a push task for `channel`.
    ///
    /// `make` receives the subscription id, the channel and a token that is
    /// cancelled on teardown. The entry is removed when the task finishes on
    /// its own.
    pub fn spawn_subscription<F, Fut>(self: &Arc<Self>, channel: &Channel, make: F) -> Option<SubscriptionId>
    where
        F: FnOnce(SubscriptionId, Channel, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.spawn_subscription_with_id(channel, id, make)
    }

    pub fn spawn_subscription_with_id<F, Fut>(
        self: &Arc<Self>,
        channel: &Channel,
        id: SubscriptionId,
        make: F,
    ) -> Option<SubscriptionId>
    where
        F: FnOnce(SubscriptionId, Channel, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let id = self.register_with_id(channel, id, TeardownGuard::cancel(token.clone()))?;
        let task = make(id.clone(), channel.clone(), token.clone());

        let hub: Weak<Self> = Arc::downgrade(self);
        let channel_id = channel.id();
        let sub_id = id.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {
                    if let Some(hub) = hub.upgrade() {
                        hub.unsubscribe(channel_id, &sub_id);
                    }
                }
            }
        });
        Some(id)
    }

    /// Remove one subscription. Only the owning channel may remove it.
    pub fn unsubscribe(&self, channel: ChannelId, id: &str) -> bool {
        let entry = {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            match state.subs.get(id) {
                Some(entry) if entry.channel == channel => {}
                _ => return false,
            }
            if let Some(ids) = state.by_channel.get_mut(&channel) {
                ids.remove(id);
                if ids.is_empty() {
                    state.by_channel.remove(&channel);
                }
            }
            state.subs.remove(id)
        };
        // Teardown runs outside the lock.
        drop(entry);
        tracing::debug!("Subscription {} closed", id);
        true
    }

    /// Tear down everything registered under a channel. Idempotent.
    pub fn close_channel(&self, channel: ChannelId) -> usize {
        let entries: Vec<Entry> = {
            let Ok(mut state) = self.state.lock() else {
                return 0;
            };
            let ids = state.by_channel.remove(&channel).unwrap_or_default();
            ids.iter().filter_map(|id| state.subs.remove(id)).collect()
        };
        let count = entries.len();
        drop(entries);
        if count > 0 {
            tracing::info!("Closed {} subscription(s) of channel {}", count, channel);
        }
        count
    }

    pub fn count_for(&self, channel: ChannelId) -> usize {
        self.state
            .lock()
            .map(|s| s.by_channel.get(&channel).map_or(0, HashSet::len))
            .unwrap_or(0)
    }

    pub fn count_for_origin(&self, origin: &Origin) -> usize {
        self.state
            .lock()
            .map(|s| s.subs.values().filter(|e| e.origin.as_ref() == Some(origin)).count())
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.state.lock().map(|s| s.subs.len()).unwrap_or(0)
    }

    /// Cancel every push task and wait for them to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = match self.state.lock() {
            Ok(mut state) => {
                state.by_channel.clear();
                state.subs.drain().map(|(_, e)| e).collect()
            }
            Err(_) => Vec::new(),
        };
        drop(entries);
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Push one event for a subscription. Returns false once the channel is gone.
pub fn push(channel: &Channel, subscription_id: &str, kind: EventType, payload: Value) -> bool {
    channel.send(OutboundMessage::Event {
        subscription_id: subscription_id.to_string(),
        event: PushEvent::new(kind, payload),
    })
}

/// Turns periodic liveness samples into `connect`/`disconnect` edges.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    last: Option<bool>,
}

impl LivenessTracker {
    /// Report the current sample; yields an event only on a change.
    pub fn observe(&mut self, live: bool) -> Option<EventType> {
        let changed = self.last != Some(live);
        self.last = Some(live);
        match (changed, live) {
            (false, _) => None,
            (true, true) => Some(EventType::Connect),
            (true, false) => Some(EventType::Disconnect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_guard(counter: &Arc<AtomicUsize>) -> TeardownGuard {
        let counter = Arc::clone(counter);
        TeardownGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_close_channel_runs_each_teardown_once() {
        let hub = SubscriptionHub::new();
        let (channel, _rx) = Channel::new(1, ChannelKind::Internal);
        let (other, _other_rx) = Channel::new(2, ChannelKind::Internal);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            hub.register(&channel, counting_guard(&counter)).unwrap();
        }
        hub.register(&other, counting_guard(&counter)).unwrap();

        assert_eq!(hub.close_channel(1), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(hub.count_for(1), 0);
        assert_eq!(hub.count_for(2), 1);

        assert_eq!(hub.close_channel(1), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_requires_owner() {
        let hub = SubscriptionHub::new();
        let (channel, _rx) = Channel::new(1, ChannelKind::Internal);
        let counter = Arc::new(AtomicUsize::new(0));
        let id = hub.register(&channel, counting_guard(&counter)).unwrap();

        assert!(!hub.unsubscribe(2, &id));
        assert!(hub.unsubscribe(1, &id));
        assert!(!hub.unsubscribe(1, &id));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(hub.close_channel(1), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_on_closed_channel_tears_down_immediately() {
        let hub = SubscriptionHub::new();
        let (channel, rx) = Channel::new(1, ChannelKind::Internal);
        drop(rx);
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(hub.register(&channel, counting_guard(&counter)).is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(hub.total(), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let hub = SubscriptionHub::new();
        let (channel, _rx) = Channel::new(1, ChannelKind::Internal);
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(hub.register_with_id(&channel, "0xabc".into(), counting_guard(&counter)).is_some());
        assert!(hub.register_with_id(&channel, "0xabc".into(), counting_guard(&counter)).is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(hub.total(), 1);
    }

    #[tokio::test]
    async fn test_spawned_task_cancelled_on_close() {
        let hub = Arc::new(SubscriptionHub::new());
        let (channel, _rx) = Channel::new(1, ChannelKind::Internal);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        hub.spawn_subscription(&channel, |_, _, token| async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        })
        .unwrap();
        assert_eq!(hub.count_for(1), 1);

        hub.close_channel(1);
        // The select drops the inner future once the token fires.
        let _ = done_rx.await;
        assert_eq!(hub.total(), 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_task_removes_entry() {
        let hub = Arc::new(SubscriptionHub::new());
        let (channel, mut rx) = Channel::new(1, ChannelKind::Internal);

        hub.spawn_subscription(&channel, |id, channel, _| async move {
            push(&channel, &id, EventType::Data, Value::Bool(true));
        })
        .unwrap();

        let message = rx.recv().await.unwrap();
        assert!(matches!(message, OutboundMessage::Event { .. }));
        for _ in 0..100 {
            if hub.total() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.total(), 0);
    }

    #[test]
    fn test_liveness_edges() {
        let mut tracker = LivenessTracker::default();
        assert_eq!(tracker.observe(true), Some(EventType::Connect));
        assert_eq!(tracker.observe(true), None);
        assert_eq!(tracker.observe(false), Some(EventType::Disconnect));
        assert_eq!(tracker.observe(false), None);
        assert_eq!(tracker.observe(true), Some(EventType::Connect));
    }
}
