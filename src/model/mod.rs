//! The SensorThings data model as seen by the query core.
//!
//! - [`schema`]: entity types, entity properties with their physical
//!   sub-fields, and navigation properties with their inverses.
//! - [`entity`]: entity snapshots and the accessor interface the in-memory
//!   evaluator reads.
//! - [`format`]: the serialization collaborator invoked on a match.

mod entity;
mod format;
mod schema;

pub use entity::{Accessor, AccessorTable, Bound, Entity, EntityAccess, FieldValue};
pub use format::{EntityFormatter, JsonFormatter};
pub use schema::{
    EntityProperty, EntityType, NavigationProperty, Property, Storage, SubField, KEY_BOOLEAN,
    KEY_END, KEY_GEOMETRY, KEY_JSON, KEY_NUMBER, KEY_START, KEY_STRING, KEY_UOM_DEFINITION,
    KEY_UOM_NAME, KEY_UOM_SYMBOL,
};
