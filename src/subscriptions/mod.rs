//! Live subscriptions to entity changes.
//!
//! A topic such as `v1.1/Datastreams(9)/Observations?$filter=result gt 5`
//! is parsed into a [`Subscription`]:
//! - the path is parsed and compressed like an HTTP resource path
//! - the trailing elements classify it as entity set, entity or property
//! - ids in the path become an implicit identity condition
//!
//! Changes are matched with the in-memory evaluator, so a subscriber sees
//! exactly the entities the same filter selects from the store.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(&settings, formatter);
//! let handle = manager.subscribe("Datastreams(9)/Observations")?.expect("valid topic");
//!
//! manager.dispatch(&EntityChangeEvent::created(observation));
//! match handle.recv() {
//!     Ok(SubscriptionEvent::Message(message)) => println!("{}", message.payload),
//!     Ok(SubscriptionEvent::Dropped { reason }) => println!("dropped: {:?}", reason),
//!     Err(_) => {}
//! }
//! ```

mod context;
mod manager;
mod subscription;
mod types;

pub use context::SubscriptionContext;
pub use manager::SubscriptionManager;
pub use subscription::{Subscription, SubscriptionKind};
pub use types::{
    DropReason, EntityChangeEvent, Message, SubscriptionEvent, SubscriptionHandle, SubscriptionId,
};
