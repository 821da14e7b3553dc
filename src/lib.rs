//! # SensorThings Query Core
//!
//! Resource paths, `$filter`/`$orderby` expressions and live subscriptions
//! for a SensorThings API server.
//!
//! ## Core Concepts
//!
//! - **Paths**: `/Things(1)/Datastreams` parsed and anchored at the deepest id
//! - **Expressions**: one typed AST for filters and sort keys
//! - **Compiler**: expressions to PostgreSQL conditions over the entity tables
//! - **Evaluator**: the same expressions against entity snapshots in memory
//! - **Subscriptions**: MQTT-style topics matched against entity changes
//!
//! Both evaluators share one set of typing rules, so an entity matches a
//! subscription exactly when the store would return it for the same filter.
//!
//! ## Example
//!
//! ```ignore
//! use sta_query::{parse_path, LongIdManager, Query, QueryBuilder};
//!
//! let path = parse_path(&LongIdManager, "", "/Things(1)/Datastreams")?;
//! let query = Query::parse("$filter=name eq 'temperature'&$top=10")?;
//! let select = QueryBuilder::new(&LongIdManager).build(&path, &query)?;
//! let sql = select.to_sql();
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod expression;
pub mod geo;
pub mod model;
pub mod path;
pub mod resolve;
pub mod sql;
pub mod subscriptions;
pub mod time;
pub mod types;

// Re-exports
pub use config::CoreSettings;
pub use error::{QueryError, Result};
pub use eval::{Evaluator, Value};
pub use expression::{
    parse_filter, parse_order_by, Constant, Direction, Expression, Function, FunctionKind, OrderBy,
    Query,
};
pub use geo::Geometry;
pub use model::{
    Entity, EntityAccess, EntityFormatter, EntityProperty, EntityType, FieldValue, JsonFormatter,
    NavigationProperty, Property,
};
pub use path::{parse_path, PathElement, ResourcePath};
pub use sql::{Compiler, QueryBuilder, RenderedSql, SelectQuery};
pub use subscriptions::{
    DropReason, EntityChangeEvent, Message, Subscription, SubscriptionContext, SubscriptionEvent,
    SubscriptionHandle, SubscriptionId, SubscriptionKind, SubscriptionManager,
};
pub use types::*;
