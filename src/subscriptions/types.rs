//! Events, messages and handles exchanged with subscribers.

use crate::model::{Entity, EntityAccess, Property};
use serde::Serialize;

/// A created or updated entity, as published on the change bus.
#[derive(Clone, Debug)]
pub struct EntityChangeEvent {
    pub entity: Entity,
    /// Properties touched by the change.
    pub changed: Vec<Property>,
}

impl EntityChangeEvent {
    /// A newly created entity: every property counts as changed.
    pub fn created(entity: Entity) -> Self {
        let changed = entity
            .entity_type()
            .properties()
            .iter()
            .map(|p| Property::Entity(*p))
            .collect();
        Self { entity, changed }
    }

    pub fn updated(entity: Entity, changed: Vec<Property>) -> Self {
        Self { entity, changed }
    }
}

/// A formatted notification for one topic.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

/// Events received through a [`SubscriptionHandle`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    /// An entity matching the subscription changed.
    Message(Message),

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Receiving end of one subscriber.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Topic as given by the subscriber.
    pub topic: String,
    pub receiver: crossbeam_channel::Receiver<SubscriptionEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SubscriptionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
