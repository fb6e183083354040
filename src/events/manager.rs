//! Event bus broadcasting board events to subscribers.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{BoardEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<BoardEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: BoardEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    fn wants(&self, event: &BoardEvent) -> bool {
        event
            .category()
            .is_some_and(|category| self.config.filter.matches(category))
    }
}

/// Manages subscriptions and broadcasts events.
pub struct EventBus {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription. Only events published afterwards are seen.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            let _ = sub.sender.try_send(BoardEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Send `event` to every matching subscriber. Drops subscribers that fail to receive.
    pub fn publish(&self, event: BoardEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.wants(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    // Best effort; the buffer is usually still full.
                    let _ = sub.sender.try_send(BoardEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventCategory, EventFilter};
    use crate::history::ActionKind;
    use std::time::Duration;

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = EventBus::new();

        let handle = bus.subscribe(SubscriptionConfig::default());
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(handle.id);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(
            handle.try_recv().unwrap(),
            BoardEvent::Dropped { reason: DropReason::Unsubscribed }
        );
    }

    #[test]
    fn test_publish_to_matching() {
        let bus = EventBus::new();
        let handle = bus.subscribe(SubscriptionConfig {
            filter: EventFilter::categories(&[EventCategory::History]),
            ..Default::default()
        });

        bus.publish(BoardEvent::Undone { kind: ActionKind::Add });

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event, BoardEvent::Undone { kind: ActionKind::Add });
    }

    #[test]
    fn test_publish_filters_non_matching() {
        let bus = EventBus::new();
        let handle = bus.subscribe(SubscriptionConfig {
            filter: EventFilter::notices(),
            ..Default::default()
        });

        bus.publish(BoardEvent::Saved { entities: 3 });
        bus.publish(BoardEvent::CapacityReached { max: 8 });

        assert_eq!(handle.drain(), vec![BoardEvent::CapacityReached { max: 8 }]);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let bus = EventBus::new();
        let _handle = bus.subscribe(SubscriptionConfig {
            buffer_size: 2,
            ..Default::default()
        });

        for _ in 0..10 {
            bus.publish(BoardEvent::NothingToUndo);
        }

        assert_eq!(bus.subscription_count(), 0);
    }
}
