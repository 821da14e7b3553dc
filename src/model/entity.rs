//! Entity snapshots and the field-accessor interface the in-memory
//! evaluator reads from.

use super::schema::{EntityProperty, EntityType, NavigationProperty, Property};
use crate::error::{QueryError, Result};
use crate::geo::Geometry;
use crate::types::Id;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A property value as held by the entity model.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Instant(DateTime<Utc>),
    Interval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Json(JsonValue),
    Geometry(Geometry),
    Id(Id),
    /// Target of a to-one navigation property.
    Entity(Box<Entity>),
    /// Targets of a to-many navigation property.
    EntitySet(Vec<Entity>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// JSON rendering used by the default formatter.
    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Long(v) => JsonValue::from(*v),
            FieldValue::Double(v) => JsonValue::from(*v),
            FieldValue::Decimal(d) => serde_json::from_str(&d.to_string())
                .unwrap_or_else(|_| JsonValue::String(d.to_string())),
            FieldValue::String(s) => JsonValue::String(s.clone()),
            FieldValue::Instant(t) => JsonValue::String(instant_text(t)),
            FieldValue::Interval { start, end } => {
                JsonValue::String(format!("{}/{}", instant_text(start), instant_text(end)))
            }
            FieldValue::Json(v) => v.clone(),
            FieldValue::Geometry(g) => g.to_geojson(),
            FieldValue::Id(Id::Long(v)) => JsonValue::from(*v),
            FieldValue::Id(Id::String(s)) => JsonValue::String(s.clone()),
            FieldValue::Entity(e) => e.to_json(),
            FieldValue::EntitySet(items) => {
                JsonValue::Array(items.iter().map(Entity::to_json).collect())
            }
        }
    }
}

pub(crate) fn instant_text(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for FieldValue {
            fn from(v: $ty) -> Self {
                FieldValue::$variant(v)
            }
        })*
    };
}

field_value_from! {
    bool => Bool,
    i64 => Long,
    f64 => Double,
    Decimal => Decimal,
    String => String,
    DateTime<Utc> => Instant,
    JsonValue => Json,
    Geometry => Geometry,
    Id => Id,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<Entity> for FieldValue {
    fn from(v: Entity) -> Self {
        FieldValue::Entity(Box::new(v))
    }
}

/// Read access to one entity's fields.
pub trait EntityAccess {
    fn entity_type(&self) -> EntityType;

    /// Value of an entity or navigation property; `Null` when absent.
    fn get(&self, property: &Property) -> FieldValue;

    /// Whether the property carries a value in this snapshot.
    fn is_set(&self, property: &Property) -> bool {
        !self.get(property).is_null()
    }

    fn id(&self) -> Option<Id> {
        match self.get(&Property::Entity(EntityProperty::Id)) {
            FieldValue::Id(id) => Some(id),
            FieldValue::Long(v) => Some(Id::Long(v)),
            FieldValue::String(s) => Some(Id::String(s)),
            _ => None,
        }
    }
}

/// A dynamic entity snapshot, as carried by change events.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    entity_type: EntityType,
    id: Option<Id>,
    properties: BTreeMap<EntityProperty, FieldValue>,
    links: BTreeMap<NavigationProperty, FieldValue>,
}

impl Entity {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            id: None,
            properties: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// An entity known only by type and id.
    pub fn reference(entity_type: EntityType, id: impl Into<Id>) -> Self {
        Self::new(entity_type).with_id(id)
    }

    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with(mut self, property: EntityProperty, value: impl Into<FieldValue>) -> Self {
        if property == EntityProperty::Id {
            if let FieldValue::Id(id) = value.into() {
                self.id = Some(id);
            }
            return self;
        }
        self.properties.insert(property, value.into());
        self
    }

    pub fn with_link(mut self, navigation: NavigationProperty, target: Entity) -> Self {
        self.links.insert(navigation, target.into());
        self
    }

    pub fn with_links(mut self, navigation: NavigationProperty, targets: Vec<Entity>) -> Self {
        self.links.insert(navigation, FieldValue::EntitySet(targets));
        self
    }

    fn to_json(&self) -> JsonValue {
        let mut out = serde_json::Map::new();
        if let Some(id) = &self.id {
            out.insert("@iot.id".to_string(), FieldValue::Id(id.clone()).to_json());
        }
        for (property, value) in &self.properties {
            out.insert(property.json_name().to_string(), value.to_json());
        }
        JsonValue::Object(out)
    }
}

impl EntityAccess for Entity {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn get(&self, property: &Property) -> FieldValue {
        match property {
            Property::Entity(EntityProperty::Id) => {
                self.id.clone().map(FieldValue::Id).unwrap_or(FieldValue::Null)
            }
            Property::Entity(p) => self.properties.get(p).cloned().unwrap_or(FieldValue::Null),
            Property::Navigation(n) => self.links.get(n).cloned().unwrap_or(FieldValue::Null),
            Property::Custom(_) => FieldValue::Null,
        }
    }

    fn is_set(&self, property: &Property) -> bool {
        match property {
            Property::Entity(EntityProperty::Id) => self.id.is_some(),
            Property::Entity(p) => self.properties.contains_key(p),
            Property::Navigation(n) => self.links.contains_key(n),
            Property::Custom(_) => false,
        }
    }

    fn id(&self) -> Option<Id> {
        self.id.clone()
    }
}

/// Reads one field of a typed entity struct.
pub type Accessor<T> = fn(&T) -> FieldValue;

/// Enum-keyed accessor table for a typed entity struct, built once.
pub struct AccessorTable<T> {
    entity_type: EntityType,
    properties: BTreeMap<EntityProperty, Accessor<T>>,
    links: BTreeMap<NavigationProperty, Accessor<T>>,
}

impl<T> AccessorTable<T> {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            properties: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn property(mut self, property: EntityProperty, accessor: Accessor<T>) -> Result<Self> {
        if !self.entity_type.has_property(property) {
            return Err(QueryError::InvalidArgument(format!(
                "{} has no property {}",
                self.entity_type, property
            )));
        }
        self.properties.insert(property, accessor);
        Ok(self)
    }

    pub fn navigation(mut self, navigation: NavigationProperty, accessor: Accessor<T>) -> Result<Self> {
        if !self.entity_type.has_navigation(navigation) {
            return Err(QueryError::InvalidArgument(format!(
                "{} has no navigation property {}",
                self.entity_type, navigation
            )));
        }
        self.links.insert(navigation, accessor);
        Ok(self)
    }

    /// View `item` through this table.
    pub fn bind<'a>(&'a self, item: &'a T) -> Bound<'a, T> {
        Bound { table: self, item }
    }
}

/// A typed entity paired with its accessor table.
pub struct Bound<'a, T> {
    table: &'a AccessorTable<T>,
    item: &'a T,
}

impl<T> EntityAccess for Bound<'_, T> {
    fn entity_type(&self) -> EntityType {
        self.table.entity_type
    }

    fn get(&self, property: &Property) -> FieldValue {
        let accessor = match property {
            Property::Entity(p) => self.table.properties.get(p),
            Property::Navigation(n) => self.table.links.get(n),
            Property::Custom(_) => None,
        };
        accessor.map(|f| f(self.item)).unwrap_or(FieldValue::Null)
    }
}
