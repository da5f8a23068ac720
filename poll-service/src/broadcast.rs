//! Fan-out of tally snapshots to the live subscribers of a poll.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::metrics;
use crate::protocol::ServerMessage;
use crate::subscription::SubscriptionRegistry;
use crate::tally::PollSnapshot;

/// Event name carried by tally updates on the live channel
pub const POLL_UPDATE_EVENT: &str = "poll-update";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Send `snapshot` to everyone subscribed to its poll right now.
    ///
    /// Best effort: a closed channel is dropped from the registry and the
    /// remaining subscribers still get the update. Each channel is FIFO, so
    /// callers publishing one poll's snapshots in commit order deliver them
    /// in that order.
    pub fn publish(&self, snapshot: &PollSnapshot) -> DeliveryReport {
        let subscribers = self.registry.subscribers_of(snapshot.poll_id);
        let mut report = DeliveryReport::default();

        for handle in subscribers {
            match handle.send(ServerMessage::PollUpdate(snapshot.clone())) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    warn!(
                        "Dropping closed channel {} from poll {}",
                        handle.id(),
                        snapshot.poll_id
                    );
                    self.registry.unsubscribe(&handle.id());
                    report.dropped += 1;
                }
            }
        }

        metrics::record_broadcast(report.delivered, report.dropped);
        debug!(
            "Published {} for poll {}: {} delivered, {} dropped",
            POLL_UPDATE_EVENT, snapshot.poll_id, report.delivered, report.dropped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::ChannelHandle;
    use crate::tally::OptionTally;

    fn snapshot(poll_id: i64, count: u64) -> PollSnapshot {
        PollSnapshot {
            poll_id,
            options: vec![OptionTally {
                option_id: 1,
                count,
            }],
        }
    }

    #[test]
    fn closed_channel_does_not_stop_delivery() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(registry.clone());

        let (alive, mut alive_rx) = ChannelHandle::channel();
        let (gone, gone_rx) = ChannelHandle::channel();
        registry.subscribe(1, alive);
        registry.subscribe(1, gone.clone());
        drop(gone_rx);

        let report = dispatcher.publish(&snapshot(1, 1));
        assert_eq!(report, DeliveryReport { delivered: 1, dropped: 1 });
        assert_eq!(
            alive_rx.try_recv().unwrap(),
            ServerMessage::PollUpdate(snapshot(1, 1))
        );
        assert_eq!(registry.poll_of(&gone.id()), None);
    }

    #[test]
    fn only_subscribers_of_the_poll_receive() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(registry.clone());

        let (watcher, mut watcher_rx) = ChannelHandle::channel();
        let (other, mut other_rx) = ChannelHandle::channel();
        registry.subscribe(1, watcher);
        registry.subscribe(2, other);

        dispatcher.publish(&snapshot(1, 1));
        dispatcher.publish(&snapshot(1, 2));

        assert_eq!(watcher_rx.try_recv().unwrap(), ServerMessage::PollUpdate(snapshot(1, 1)));
        assert_eq!(watcher_rx.try_recv().unwrap(), ServerMessage::PollUpdate(snapshot(1, 2)));
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribed_channel_receives_nothing_more() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(registry.clone());
        let (handle, mut rx) = ChannelHandle::channel();
        registry.subscribe(1, handle.clone());

        registry.unsubscribe(&handle.id());
        registry.unsubscribe(&handle.id());
        let report = dispatcher.publish(&snapshot(1, 1));

        assert_eq!(report, DeliveryReport::default());
        assert!(rx.try_recv().is_err());
    }
}
