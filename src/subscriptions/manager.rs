//! Subscription registry and change dispatch.

use super::context::SubscriptionContext;
use super::subscription::Subscription;
use super::types::{
    DropReason, EntityChangeEvent, Message, SubscriptionEvent, SubscriptionHandle, SubscriptionId,
};
use crate::config::CoreSettings;
use crate::error::Result;
use crate::eval::Evaluator;
use crate::model::EntityFormatter;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// One receiving subscriber.
struct Subscriber {
    topic: String,
    sender: Sender<SubscriptionEvent>,
}

/// A topic with the subscribers listening on it.
struct TopicEntry {
    subscription: Arc<Subscription>,
    subscribers: Vec<SubscriptionId>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    topics: HashMap<String, TopicEntry>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(&id)?;
        if let Some(entry) = self.topics.get_mut(&subscriber.topic) {
            entry.subscribers.retain(|s| *s != id);
            if entry.subscribers.is_empty() {
                self.topics.remove(&subscriber.topic);
                debug!(topic = %subscriber.topic, "last subscriber left topic");
            }
        }
        Some(subscriber)
    }
}

/// Manages subscriptions and publishes matching entity changes.
///
/// Each topic is parsed once, however many subscribers share it. Changes are
/// matched per topic and the formatted message is sent to every subscriber
/// of that topic through a bounded channel; a subscriber whose buffer is full
/// is dropped.
pub struct SubscriptionManager {
    context: SubscriptionContext,
    formatter: Arc<dyn EntityFormatter>,
    registry: RwLock<Registry>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    buffer_size: usize,
}

impl SubscriptionManager {
    pub fn new(settings: &CoreSettings, formatter: Arc<dyn EntityFormatter>) -> Self {
        Self {
            context: SubscriptionContext::new(settings),
            formatter,
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            buffer_size: settings.subscription_buffer_size.max(1),
        }
    }

    pub fn context(&self) -> &SubscriptionContext {
        &self.context
    }

    /// Subscribe to a topic.
    ///
    /// `Ok(None)` when the topic's query options were dropped as invalid.
    pub fn subscribe(&self, topic: &str) -> Result<Option<SubscriptionHandle>> {
        let existing = self
            .registry
            .read()
            .topics
            .get(topic)
            .map(|entry| Arc::clone(&entry.subscription));
        let subscription = match existing {
            Some(subscription) => subscription,
            None => match self.context.subscription(topic)? {
                Some(subscription) => Arc::new(subscription),
                None => return Ok(None),
            },
        };

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        let mut registry = self.registry.write();
        registry
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                subscription,
                subscribers: Vec::new(),
            })
            .subscribers
            .push(id);
        registry.subscribers.insert(
            id,
            Subscriber {
                topic: topic.to_string(),
                sender,
            },
        );
        Ok(Some(SubscriptionHandle {
            id,
            topic: topic.to_string(),
            receiver,
        }))
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(subscriber) = self.registry.write().remove(id) {
            // Best effort: the receiver may already be gone.
            let _ = subscriber.sender.try_send(SubscriptionEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Number of subscribers.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().subscribers.len()
    }

    /// Number of distinct topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.registry.read().topics.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .read()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.subscribers.len())
    }

    // --- Dispatch ---

    /// Publish an entity change to every matching topic.
    ///
    /// Returns the number of messages delivered.
    pub fn dispatch(&self, event: &EntityChangeEvent) -> usize {
        let evaluator = Evaluator::new(self.context.id_manager());
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        let mut disconnected = Vec::new();
        {
            let registry = self.registry.read();
            for (topic, entry) in &registry.topics {
                let matched = match entry.subscription.matches(&evaluator, &event.entity, &event.changed) {
                    Ok(matched) => matched,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "could not evaluate subscription");
                        false
                    }
                };
                if !matched {
                    continue;
                }
                let payload = match self.formatter.format(&event.entity, &entry.subscription.selected()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "could not format entity");
                        continue;
                    }
                };
                let message = Message {
                    topic: topic.clone(),
                    payload,
                };
                for id in &entry.subscribers {
                    let Some(subscriber) = registry.subscribers.get(id) else {
                        continue;
                    };
                    match subscriber.sender.try_send(SubscriptionEvent::Message(message.clone())) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => overflowed.push(*id),
                        Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
                    }
                }
            }
        }

        if !overflowed.is_empty() || !disconnected.is_empty() {
            let mut registry = self.registry.write();
            for id in overflowed {
                if let Some(subscriber) = registry.remove(id) {
                    warn!(subscription = id.0, topic = %subscriber.topic, "dropping slow subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = subscriber.sender.try_send(SubscriptionEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
            for id in disconnected {
                registry.remove(id);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityProperty, EntityType, JsonFormatter, Property};
    use crate::types::{Id, LongIdManager};
    use std::time::Duration;

    fn manager(buffer_size: usize) -> SubscriptionManager {
        let settings = CoreSettings {
            subscription_buffer_size: buffer_size,
            ..Default::default()
        };
        SubscriptionManager::new(&settings, Arc::new(JsonFormatter::new("", Arc::new(LongIdManager))))
    }

    fn thing(id: i64, name: &str) -> EntityChangeEvent {
        EntityChangeEvent::created(Entity::reference(EntityType::Thing, Id::Long(id)).with(EntityProperty::Name, name))
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = manager(10);
        let a = manager.subscribe("Things").unwrap().unwrap();
        let b = manager.subscribe("Things").unwrap().unwrap();
        assert_eq!(manager.subscription_count(), 2);
        assert_eq!(manager.topic_count(), 1);
        assert_eq!(manager.subscriber_count("Things"), 2);

        manager.unsubscribe(a.id);
        assert_eq!(manager.subscriber_count("Things"), 1);
        assert_eq!(
            a.recv_timeout(Duration::from_millis(100)).unwrap(),
            SubscriptionEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        );
        manager.unsubscribe(b.id);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.topic_count(), 0);
    }

    #[test]
    fn test_dispatch_to_matching() {
        let manager = manager(10);
        let handle = manager.subscribe("Things?$filter=name eq 'lamp'").unwrap().unwrap();

        assert_eq!(manager.dispatch(&thing(1, "lamp")), 1);
        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            SubscriptionEvent::Message(message) => {
                assert_eq!(message.topic, "Things?$filter=name eq 'lamp'");
                assert!(message.payload.contains("\"name\":\"lamp\""));
            }
            other => panic!("Expected Message event, got {:?}", other),
        }

        assert_eq!(manager.dispatch(&thing(2, "desk")), 0);
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_property_message_carries_only_the_property() {
        let manager = manager(10);
        let handle = manager.subscribe("Things(1)/name").unwrap().unwrap();
        let update = EntityChangeEvent::updated(
            Entity::reference(EntityType::Thing, Id::Long(1))
                .with(EntityProperty::Name, "lamp")
                .with(EntityProperty::Description, "desk lamp"),
            vec![Property::Entity(EntityProperty::Name)],
        );
        manager.dispatch(&update);
        assert_eq!(
            handle.try_recv().unwrap(),
            SubscriptionEvent::Message(Message {
                topic: "Things(1)/name".to_string(),
                payload: r#"{"name":"lamp"}"#.to_string(),
            })
        );
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = manager(2);
        let _handle = manager.subscribe("Things").unwrap().unwrap();
        for i in 0..10 {
            manager.dispatch(&thing(i, "x"));
        }
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.topic_count(), 0);
    }

    #[test]
    fn test_disconnected_subscriber_is_removed() {
        let manager = manager(10);
        let handle = manager.subscribe("Things").unwrap().unwrap();
        drop(handle);
        assert_eq!(manager.dispatch(&thing(1, "x")), 0);
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_invalid_filter_is_not_registered() {
        let manager = manager(10);
        assert!(manager.subscribe("Things?$filter=name eq").unwrap().is_none());
        assert_eq!(manager.subscription_count(), 0);
        assert!(manager.subscribe("/Things").is_err());
    }
}
