//! Entity types, their properties and navigation links.

use std::fmt;

pub const KEY_START: &str = "start";
pub const KEY_END: &str = "end";
pub const KEY_NUMBER: &str = "n";
pub const KEY_BOOLEAN: &str = "b";
pub const KEY_STRING: &str = "s";
pub const KEY_JSON: &str = "j";
pub const KEY_GEOMETRY: &str = "g";
pub const KEY_UOM_NAME: &str = "name";
pub const KEY_UOM_SYMBOL: &str = "symbol";
pub const KEY_UOM_DEFINITION: &str = "definition";

/// The entity types of the data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Actuator,
    Datastream,
    FeatureOfInterest,
    HistoricalLocation,
    Location,
    MultiDatastream,
    Observation,
    ObservedProperty,
    Sensor,
    Task,
    TaskingCapability,
    Thing,
}

impl EntityType {
    pub const ALL: [EntityType; 12] = [
        EntityType::Actuator,
        EntityType::Datastream,
        EntityType::FeatureOfInterest,
        EntityType::HistoricalLocation,
        EntityType::Location,
        EntityType::MultiDatastream,
        EntityType::Observation,
        EntityType::ObservedProperty,
        EntityType::Sensor,
        EntityType::Task,
        EntityType::TaskingCapability,
        EntityType::Thing,
    ];

    /// Singular name, used for entity path segments and to-one navigation.
    pub fn entity_name(self) -> &'static str {
        match self {
            EntityType::Actuator => "Actuator",
            EntityType::Datastream => "Datastream",
            EntityType::FeatureOfInterest => "FeatureOfInterest",
            EntityType::HistoricalLocation => "HistoricalLocation",
            EntityType::Location => "Location",
            EntityType::MultiDatastream => "MultiDatastream",
            EntityType::Observation => "Observation",
            EntityType::ObservedProperty => "ObservedProperty",
            EntityType::Sensor => "Sensor",
            EntityType::Task => "Task",
            EntityType::TaskingCapability => "TaskingCapability",
            EntityType::Thing => "Thing",
        }
    }

    /// Plural name, used for entity-set path segments.
    pub fn set_name(self) -> &'static str {
        match self {
            EntityType::Actuator => "Actuators",
            EntityType::Datastream => "Datastreams",
            EntityType::FeatureOfInterest => "FeaturesOfInterest",
            EntityType::HistoricalLocation => "HistoricalLocations",
            EntityType::Location => "Locations",
            EntityType::MultiDatastream => "MultiDatastreams",
            EntityType::Observation => "Observations",
            EntityType::ObservedProperty => "ObservedProperties",
            EntityType::Sensor => "Sensors",
            EntityType::Task => "Tasks",
            EntityType::TaskingCapability => "TaskingCapabilities",
            EntityType::Thing => "Things",
        }
    }

    pub fn from_set_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.set_name() == name)
    }

    pub fn from_entity_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.entity_name() == name)
    }

    /// Entity properties, in serialization order.
    pub fn properties(self) -> &'static [EntityProperty] {
        use EntityProperty as P;
        match self {
            EntityType::Actuator | EntityType::Sensor => &[
                P::Id,
                P::Name,
                P::Description,
                P::EncodingType,
                P::Metadata,
                P::Properties,
            ],
            EntityType::Datastream => &[
                P::Id,
                P::Name,
                P::Description,
                P::ObservationType,
                P::UnitOfMeasurement,
                P::ObservedArea,
                P::PhenomenonTime,
                P::ResultTime,
                P::Properties,
            ],
            EntityType::FeatureOfInterest => &[
                P::Id,
                P::Name,
                P::Description,
                P::EncodingType,
                P::Feature,
                P::Properties,
            ],
            EntityType::HistoricalLocation => &[P::Id, P::Time],
            EntityType::Location => &[
                P::Id,
                P::Name,
                P::Description,
                P::EncodingType,
                P::Location,
                P::Properties,
            ],
            EntityType::MultiDatastream => &[
                P::Id,
                P::Name,
                P::Description,
                P::MultiObservationDataTypes,
                P::UnitOfMeasurements,
                P::ObservedArea,
                P::PhenomenonTime,
                P::ResultTime,
                P::Properties,
            ],
            EntityType::Observation => &[
                P::Id,
                P::PhenomenonTime,
                P::ResultTime,
                P::Result,
                P::ResultQuality,
                P::ValidTime,
                P::Parameters,
            ],
            EntityType::ObservedProperty => &[
                P::Id,
                P::Name,
                P::Definition,
                P::Description,
                P::Properties,
            ],
            EntityType::Task => &[P::Id, P::CreationTime, P::TaskingParameters],
            EntityType::TaskingCapability => &[
                P::Id,
                P::Name,
                P::Description,
                P::TaskingParameters,
                P::Properties,
            ],
            EntityType::Thing => &[P::Id, P::Name, P::Description, P::Properties],
        }
    }

    pub fn navigation_properties(self) -> &'static [NavigationProperty] {
        use NavigationProperty as N;
        match self {
            EntityType::Actuator => &[N::TaskingCapabilities],
            EntityType::Datastream => &[N::Thing, N::Sensor, N::ObservedProperty, N::Observations],
            EntityType::FeatureOfInterest => &[N::Observations],
            EntityType::HistoricalLocation => &[N::Thing, N::Locations],
            EntityType::Location => &[N::Things, N::HistoricalLocations],
            EntityType::MultiDatastream => &[
                N::Thing,
                N::Sensor,
                N::ObservedProperties,
                N::Observations,
            ],
            EntityType::Observation => &[N::Datastream, N::MultiDatastream, N::FeatureOfInterest],
            EntityType::ObservedProperty => &[N::Datastreams, N::MultiDatastreams],
            EntityType::Sensor => &[N::Datastreams, N::MultiDatastreams],
            EntityType::Task => &[N::TaskingCapability],
            EntityType::TaskingCapability => &[N::Actuator, N::Thing, N::Tasks],
            EntityType::Thing => &[
                N::Locations,
                N::HistoricalLocations,
                N::Datastreams,
                N::MultiDatastreams,
                N::TaskingCapabilities,
            ],
        }
    }

    pub fn has_property(self, property: EntityProperty) -> bool {
        self.properties().contains(&property)
    }

    pub fn has_navigation(self, navigation: NavigationProperty) -> bool {
        self.navigation_properties().contains(&navigation)
    }

    /// The navigation property of this type that leads to `target`.
    pub fn navigation_to(self, target: EntityType) -> Option<NavigationProperty> {
        self.navigation_properties()
            .iter()
            .copied()
            .find(|n| n.target() == target)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_name())
    }
}

/// How one physical column of a property is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Primary key; its kind comes from the id strategy.
    Id,
    Number,
    String,
    Boolean,
    Json,
    Geometry,
    Instant,
}

/// A named physical column backing (part of) a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubField {
    pub key: &'static str,
    pub storage: Storage,
}

const fn sub(key: &'static str, storage: Storage) -> SubField {
    SubField { key, storage }
}

const ID: &[SubField] = &[sub("id", Storage::Id)];
const STRING: &[SubField] = &[sub("value", Storage::String)];
const JSON: &[SubField] = &[sub("value", Storage::Json)];
const GEOMETRY: &[SubField] = &[sub("value", Storage::Geometry)];
const INSTANT: &[SubField] = &[sub("value", Storage::Instant)];
const INTERVAL: &[SubField] = &[sub(KEY_START, Storage::Instant), sub(KEY_END, Storage::Instant)];
const RESULT: &[SubField] = &[
    sub(KEY_NUMBER, Storage::Number),
    sub(KEY_BOOLEAN, Storage::Boolean),
    sub(KEY_STRING, Storage::String),
    sub(KEY_JSON, Storage::Json),
];
const LOCATED: &[SubField] = &[sub(KEY_JSON, Storage::Json), sub(KEY_GEOMETRY, Storage::Geometry)];
const UNIT_OF_MEASUREMENT: &[SubField] = &[
    sub(KEY_UOM_NAME, Storage::String),
    sub(KEY_UOM_SYMBOL, Storage::String),
    sub(KEY_UOM_DEFINITION, Storage::String),
];

/// Entity (non-navigation) properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityProperty {
    Id,
    Name,
    Description,
    EncodingType,
    Definition,
    Metadata,
    ObservationType,
    MultiObservationDataTypes,
    UnitOfMeasurement,
    UnitOfMeasurements,
    ObservedArea,
    PhenomenonTime,
    ResultTime,
    ValidTime,
    Result,
    ResultQuality,
    Parameters,
    Feature,
    Location,
    Time,
    Properties,
    TaskingParameters,
    CreationTime,
}

impl EntityProperty {
    pub const ALL: [EntityProperty; 23] = [
        EntityProperty::Id,
        EntityProperty::Name,
        EntityProperty::Description,
        EntityProperty::EncodingType,
        EntityProperty::Definition,
        EntityProperty::Metadata,
        EntityProperty::ObservationType,
        EntityProperty::MultiObservationDataTypes,
        EntityProperty::UnitOfMeasurement,
        EntityProperty::UnitOfMeasurements,
        EntityProperty::ObservedArea,
        EntityProperty::PhenomenonTime,
        EntityProperty::ResultTime,
        EntityProperty::ValidTime,
        EntityProperty::Result,
        EntityProperty::ResultQuality,
        EntityProperty::Parameters,
        EntityProperty::Feature,
        EntityProperty::Location,
        EntityProperty::Time,
        EntityProperty::Properties,
        EntityProperty::TaskingParameters,
        EntityProperty::CreationTime,
    ];

    /// Name used in paths, filters and JSON documents.
    pub fn json_name(self) -> &'static str {
        match self {
            EntityProperty::Id => "id",
            EntityProperty::Name => "name",
            EntityProperty::Description => "description",
            EntityProperty::EncodingType => "encodingType",
            EntityProperty::Definition => "definition",
            EntityProperty::Metadata => "metadata",
            EntityProperty::ObservationType => "observationType",
            EntityProperty::MultiObservationDataTypes => "multiObservationDataTypes",
            EntityProperty::UnitOfMeasurement => "unitOfMeasurement",
            EntityProperty::UnitOfMeasurements => "unitOfMeasurements",
            EntityProperty::ObservedArea => "observedArea",
            EntityProperty::PhenomenonTime => "phenomenonTime",
            EntityProperty::ResultTime => "resultTime",
            EntityProperty::ValidTime => "validTime",
            EntityProperty::Result => "result",
            EntityProperty::ResultQuality => "resultQuality",
            EntityProperty::Parameters => "parameters",
            EntityProperty::Feature => "feature",
            EntityProperty::Location => "location",
            EntityProperty::Time => "time",
            EntityProperty::Properties => "properties",
            EntityProperty::TaskingParameters => "taskingParameters",
            EntityProperty::CreationTime => "creationTime",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if name == "@iot.id" {
            return Some(EntityProperty::Id);
        }
        Self::ALL.into_iter().find(|p| p.json_name() == name)
    }

    /// Whether custom (document) segments may follow this property.
    pub fn allows_custom(self) -> bool {
        matches!(
            self,
            EntityProperty::Properties
                | EntityProperty::Parameters
                | EntityProperty::Result
                | EntityProperty::ResultQuality
                | EntityProperty::Feature
                | EntityProperty::Location
                | EntityProperty::TaskingParameters
                | EntityProperty::UnitOfMeasurement
                | EntityProperty::UnitOfMeasurements
                | EntityProperty::MultiObservationDataTypes
                | EntityProperty::Metadata
        )
    }

    /// The physical columns backing this property on `entity_type`, in the
    /// fixed order both evaluators build composites in.
    pub fn sub_fields(self, entity_type: EntityType) -> &'static [SubField] {
        match self {
            EntityProperty::Id => ID,
            EntityProperty::Name
            | EntityProperty::Description
            | EntityProperty::EncodingType
            | EntityProperty::Definition
            | EntityProperty::Metadata
            | EntityProperty::ObservationType => STRING,
            EntityProperty::MultiObservationDataTypes
            | EntityProperty::UnitOfMeasurements
            | EntityProperty::ResultQuality
            | EntityProperty::Parameters
            | EntityProperty::Properties
            | EntityProperty::TaskingParameters => JSON,
            EntityProperty::UnitOfMeasurement => UNIT_OF_MEASUREMENT,
            EntityProperty::ObservedArea => GEOMETRY,
            EntityProperty::PhenomenonTime | EntityProperty::ValidTime => INTERVAL,
            EntityProperty::ResultTime => match entity_type {
                EntityType::Datastream | EntityType::MultiDatastream => INTERVAL,
                _ => INSTANT,
            },
            EntityProperty::Time | EntityProperty::CreationTime => INSTANT,
            EntityProperty::Result => RESULT,
            EntityProperty::Feature | EntityProperty::Location => LOCATED,
        }
    }
}

impl fmt::Display for EntityProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_name())
    }
}

/// Navigation properties. The name is the segment used in paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NavigationProperty {
    Actuator,
    Datastream,
    Datastreams,
    FeatureOfInterest,
    HistoricalLocations,
    Locations,
    MultiDatastream,
    MultiDatastreams,
    Observations,
    ObservedProperty,
    ObservedProperties,
    Sensor,
    Tasks,
    TaskingCapability,
    TaskingCapabilities,
    Thing,
    Things,
}

impl NavigationProperty {
    pub const ALL: [NavigationProperty; 17] = [
        NavigationProperty::Actuator,
        NavigationProperty::Datastream,
        NavigationProperty::Datastreams,
        NavigationProperty::FeatureOfInterest,
        NavigationProperty::HistoricalLocations,
        NavigationProperty::Locations,
        NavigationProperty::MultiDatastream,
        NavigationProperty::MultiDatastreams,
        NavigationProperty::Observations,
        NavigationProperty::ObservedProperty,
        NavigationProperty::ObservedProperties,
        NavigationProperty::Sensor,
        NavigationProperty::Tasks,
        NavigationProperty::TaskingCapability,
        NavigationProperty::TaskingCapabilities,
        NavigationProperty::Thing,
        NavigationProperty::Things,
    ];

    pub fn target(self) -> EntityType {
        match self {
            NavigationProperty::Actuator => EntityType::Actuator,
            NavigationProperty::Datastream | NavigationProperty::Datastreams => {
                EntityType::Datastream
            }
            NavigationProperty::FeatureOfInterest => EntityType::FeatureOfInterest,
            NavigationProperty::HistoricalLocations => EntityType::HistoricalLocation,
            NavigationProperty::Locations => EntityType::Location,
            NavigationProperty::MultiDatastream | NavigationProperty::MultiDatastreams => {
                EntityType::MultiDatastream
            }
            NavigationProperty::Observations => EntityType::Observation,
            NavigationProperty::ObservedProperty | NavigationProperty::ObservedProperties => {
                EntityType::ObservedProperty
            }
            NavigationProperty::Sensor => EntityType::Sensor,
            NavigationProperty::Tasks => EntityType::Task,
            NavigationProperty::TaskingCapability | NavigationProperty::TaskingCapabilities => {
                EntityType::TaskingCapability
            }
            NavigationProperty::Thing | NavigationProperty::Things => EntityType::Thing,
        }
    }

    /// Whether this navigation leads to a collection.
    pub fn is_set(self) -> bool {
        matches!(
            self,
            NavigationProperty::Datastreams
                | NavigationProperty::HistoricalLocations
                | NavigationProperty::Locations
                | NavigationProperty::MultiDatastreams
                | NavigationProperty::Observations
                | NavigationProperty::ObservedProperties
                | NavigationProperty::Tasks
                | NavigationProperty::TaskingCapabilities
                | NavigationProperty::Things
        )
    }

    pub fn name(self) -> &'static str {
        let target = self.target();
        if self.is_set() {
            target.set_name()
        } else {
            target.entity_name()
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.name() == name)
    }

    /// The navigation on the target type that leads back to `source`.
    pub fn inverse(self, source: EntityType) -> Option<NavigationProperty> {
        self.target().navigation_to(source)
    }
}

impl fmt::Display for NavigationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    Entity(EntityProperty),
    Navigation(NavigationProperty),
    /// A segment inside a document-valued property.
    Custom(String),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::Entity(p) => p.json_name(),
            Property::Navigation(n) => n.name(),
            Property::Custom(name) => name,
        }
    }

    /// Resolve a filter/select segment that is not inside a document.
    pub fn from_name(name: &str) -> Option<Self> {
        NavigationProperty::from_name(name)
            .map(Property::Navigation)
            .or_else(|| EntityProperty::from_name(name).map(Property::Entity))
    }
}

impl From<EntityProperty> for Property {
    fn from(p: EntityProperty) -> Self {
        Property::Entity(p)
    }
}

impl From<NavigationProperty> for Property {
    fn from(n: NavigationProperty) -> Self {
        Property::Navigation(n)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_set_name(t.set_name()), Some(t));
            assert_eq!(EntityType::from_entity_name(t.entity_name()), Some(t));
        }
        for n in NavigationProperty::ALL {
            assert_eq!(NavigationProperty::from_name(n.name()), Some(n));
        }
        for p in EntityProperty::ALL {
            assert_eq!(EntityProperty::from_name(p.json_name()), Some(p));
        }
        assert_eq!(EntityProperty::from_name("@iot.id"), Some(EntityProperty::Id));
    }

    #[test]
    fn test_every_navigation_has_an_inverse() {
        for t in EntityType::ALL {
            for n in t.navigation_properties() {
                let inverse = n.inverse(t).expect("inverse navigation");
                assert_eq!(inverse.target(), t);
                assert!(n.target().has_navigation(inverse));
            }
        }
    }

    #[test]
    fn test_result_time_shape_depends_on_type() {
        let obs = EntityProperty::ResultTime.sub_fields(EntityType::Observation);
        assert_eq!(obs.len(), 1);
        let ds = EntityProperty::ResultTime.sub_fields(EntityType::Datastream);
        assert_eq!(ds.iter().map(|s| s.key).collect::<Vec<_>>(), vec!["start", "end"]);
    }

    #[test]
    fn test_property_lookup_prefers_navigation() {
        assert_eq!(
            Property::from_name("Datastream"),
            Some(Property::Navigation(NavigationProperty::Datastream))
        );
        assert_eq!(
            Property::from_name("name"),
            Some(Property::Entity(EntityProperty::Name))
        );
        assert_eq!(Property::from_name("unknown"), None);
    }
}
