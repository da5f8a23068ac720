//! Subscription registry: which live channels watch which poll.
//!
//! A channel watches at most one poll at a time. The registry lock is held
//! only to mutate the maps or to clone a subscriber list; delivery happens
//! outside of it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::types::PollId;

/// Unique live-channel identifier.
pub type ChannelId = Uuid;

/// The channel was closed by its receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

/// Sending half of a viewer's live connection.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// A handle together with the receiver its messages arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn send(&self, msg: ServerMessage) -> Result<(), ChannelClosed> {
        self.tx.send(msg).map_err(|_| ChannelClosed)
    }
}

#[derive(Default)]
struct RegistryInner {
    by_poll: HashMap<PollId, HashMap<ChannelId, ChannelHandle>>,
    poll_of: HashMap<ChannelId, PollId>,
}

impl RegistryInner {
    fn detach(&mut self, channel_id: &ChannelId) -> Option<PollId> {
        let poll_id = self.poll_of.remove(channel_id)?;
        if let Some(channels) = self.by_poll.get_mut(&poll_id) {
            channels.remove(channel_id);
            if channels.is_empty() {
                self.by_poll.remove(&poll_id);
            }
        }
        Some(poll_id)
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` for `poll_id`, moving it off any poll it watched
    /// before. Returns that previous poll.
    pub fn subscribe(&self, poll_id: PollId, handle: ChannelHandle) -> Option<PollId> {
        let channel_id = handle.id();
        let mut inner = self.lock();
        let previous = inner.detach(&channel_id);
        inner.poll_of.insert(channel_id, poll_id);
        inner
            .by_poll
            .entry(poll_id)
            .or_default()
            .insert(channel_id, handle);
        debug!(
            "Channel {} subscribed to poll {} (previous: {:?})",
            channel_id, poll_id, previous
        );
        previous
    }

    /// Remove a channel from whatever poll it watches. Unknown channels are a no-op.
    pub fn unsubscribe(&self, channel_id: &ChannelId) -> Option<PollId> {
        let removed = self.lock().detach(channel_id);
        if let Some(poll_id) = removed {
            debug!("Channel {} unsubscribed from poll {}", channel_id, poll_id);
        }
        removed
    }

    /// Copy of the current subscribers of a poll.
    pub fn subscribers_of(&self, poll_id: PollId) -> Vec<ChannelHandle> {
        self.lock()
            .by_poll
            .get(&poll_id)
            .map(|channels| channels.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn poll_of(&self, channel_id: &ChannelId) -> Option<PollId> {
        self.lock().poll_of.get(channel_id).copied()
    }

    /// Number of subscribed channels across all polls.
    pub fn subscriber_count(&self) -> usize {
        self.lock().poll_of.len()
    }

    /// Number of polls with at least one subscriber.
    pub fn watched_poll_count(&self) -> usize {
        self.lock().by_poll.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn subscribe_moves_channel_between_polls() {
        let registry = SubscriptionRegistry::new();
        let (handle, _rx) = ChannelHandle::channel();

        assert_eq!(registry.subscribe(1, handle.clone()), None);
        assert_eq!(registry.subscribe(2, handle.clone()), Some(1));

        assert!(registry.subscribers_of(1).is_empty());
        assert_eq!(registry.subscribers_of(2).len(), 1);
        assert_eq!(registry.poll_of(&handle.id()), Some(2));
        assert_eq!(registry.watched_poll_count(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (handle, _rx) = ChannelHandle::channel();
        registry.subscribe(5, handle.clone());

        assert_eq!(registry.unsubscribe(&handle.id()), Some(5));
        assert_eq!(registry.unsubscribe(&handle.id()), None);
        assert_eq!(registry.unsubscribe(&Uuid::new_v4()), None);
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(registry.watched_poll_count(), 0);
    }

    #[test]
    fn concurrent_subscribe_and_unsubscribe() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut threads = Vec::new();
        for t in 0..8 {
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                let mut kept = Vec::new();
                for i in 0..100 {
                    let (handle, rx) = ChannelHandle::channel();
                    registry.subscribe((t % 2) as PollId, handle.clone());
                    if i % 2 == 0 {
                        registry.unsubscribe(&handle.id());
                    } else {
                        kept.push(rx);
                    }
                }
                kept
            }));
        }
        let kept: usize = threads.into_iter().map(|t| t.join().unwrap().len()).sum();

        assert_eq!(registry.subscriber_count(), kept);
        assert_eq!(
            registry.subscribers_of(0).len() + registry.subscribers_of(1).len(),
            kept
        );
    }
}
