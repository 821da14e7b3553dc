//! Table, column and join metadata for the relational store.

use crate::model::{
    EntityProperty, EntityType, NavigationProperty, KEY_BOOLEAN, KEY_END, KEY_GEOMETRY,
    KEY_JSON, KEY_NUMBER, KEY_START, KEY_STRING, KEY_UOM_DEFINITION, KEY_UOM_NAME,
    KEY_UOM_SYMBOL,
};

pub const ID_COLUMN: &str = "ID";

pub fn table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Thing => "THINGS",
        EntityType::Location => "LOCATIONS",
        EntityType::HistoricalLocation => "HIST_LOCATIONS",
        EntityType::Datastream => "DATASTREAMS",
        EntityType::MultiDatastream => "MULTI_DATASTREAMS",
        EntityType::Sensor => "SENSORS",
        EntityType::ObservedProperty => "OBS_PROPERTIES",
        EntityType::Observation => "OBSERVATIONS",
        EntityType::FeatureOfInterest => "FEATURES",
        EntityType::Actuator => "ACTUATORS",
        EntityType::TaskingCapability => "TASKINGCAPABILITIES",
        EntityType::Task => "TASKS",
    }
}

/// Column referencing an entity of `entity_type` from another table.
pub fn foreign_key(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Thing => "THING_ID",
        EntityType::Location => "LOCATION_ID",
        EntityType::HistoricalLocation => "HIST_LOCATION_ID",
        EntityType::Datastream => "DATASTREAM_ID",
        EntityType::MultiDatastream => "MULTI_DATASTREAM_ID",
        EntityType::Sensor => "SENSOR_ID",
        EntityType::ObservedProperty => "OBS_PROPERTY_ID",
        EntityType::Observation => "OBSERVATION_ID",
        EntityType::FeatureOfInterest => "FEATURE_ID",
        EntityType::Actuator => "ACTUATOR_ID",
        EntityType::TaskingCapability => "TASKINGCAPABILITY_ID",
        EntityType::Task => "TASK_ID",
    }
}

fn junction_table(a: EntityType, b: EntityType) -> Option<&'static str> {
    use EntityType::*;
    match (a, b) {
        (Thing, Location) | (Location, Thing) => Some("THINGS_LOCATIONS"),
        (Location, HistoricalLocation) | (HistoricalLocation, Location) => {
            Some("LOCATIONS_HIST_LOCATIONS")
        }
        (MultiDatastream, ObservedProperty) | (ObservedProperty, MultiDatastream) => {
            Some("MULTI_DATASTREAMS_OBS_PROPERTIES")
        }
        _ => None,
    }
}

/// How a navigation property is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    /// The source row holds the target's id.
    Forward { foreign_key: &'static str },
    /// Target rows hold the source's id.
    Reverse { foreign_key: &'static str },
    /// Many-to-many through a junction table.
    Junction {
        table: &'static str,
        source_key: &'static str,
        target_key: &'static str,
    },
}

impl Link {
    pub fn is_to_many(self) -> bool {
        !matches!(self, Link::Forward { .. })
    }
}

pub fn link(source: EntityType, navigation: NavigationProperty) -> Option<Link> {
    if !source.has_navigation(navigation) {
        return None;
    }
    let target = navigation.target();
    let inverse = navigation.inverse(source)?;
    Some(match (navigation.is_set(), inverse.is_set()) {
        (false, _) => Link::Forward {
            foreign_key: foreign_key(target),
        },
        (true, false) => Link::Reverse {
            foreign_key: foreign_key(source),
        },
        (true, true) => Link::Junction {
            table: junction_table(source, target)?,
            source_key: foreign_key(source),
            target_key: foreign_key(target),
        },
    })
}

/// Column backing one sub-field of a property.
pub fn column(entity_type: EntityType, property: EntityProperty, key: &str) -> Option<&'static str> {
    use EntityProperty as P;
    if !entity_type.has_property(property) {
        return None;
    }
    let column = match property {
        P::Id => ID_COLUMN,
        P::Name => "NAME",
        P::Description => "DESCRIPTION",
        P::EncodingType => "ENCODING_TYPE",
        P::Definition => "DEFINITION",
        P::Metadata => "METADATA",
        P::ObservationType => "OBSERVATION_TYPE",
        P::MultiObservationDataTypes => "OBSERVATION_TYPES",
        P::UnitOfMeasurements => "UNIT_OF_MEASUREMENTS",
        P::ObservedArea => "OBSERVED_AREA",
        P::ResultQuality => "RESULT_QUALITY",
        P::Parameters => "PARAMETERS",
        P::Properties => "PROPERTIES",
        P::TaskingParameters => "TASKING_PARAMETERS",
        P::CreationTime => "CREATION_TIME",
        P::Time => "TIME",
        P::UnitOfMeasurement => match key {
            KEY_UOM_NAME => "UNIT_NAME",
            KEY_UOM_SYMBOL => "UNIT_SYMBOL",
            KEY_UOM_DEFINITION => "UNIT_DEFINITION",
            _ => return None,
        },
        P::PhenomenonTime => match key {
            KEY_START => "PHENOMENON_TIME_START",
            KEY_END => "PHENOMENON_TIME_END",
            _ => return None,
        },
        P::ValidTime => match key {
            KEY_START => "VALID_TIME_START",
            KEY_END => "VALID_TIME_END",
            _ => return None,
        },
        P::ResultTime => match key {
            KEY_START => "RESULT_TIME_START",
            KEY_END => "RESULT_TIME_END",
            _ => "RESULT_TIME",
        },
        P::Result => match key {
            KEY_NUMBER => "RESULT_NUMBER",
            KEY_BOOLEAN => "RESULT_BOOLEAN",
            KEY_STRING => "RESULT_STRING",
            KEY_JSON => "RESULT_JSON",
            _ => return None,
        },
        P::Feature | P::Location => match key {
            KEY_GEOMETRY => "GEOM",
            KEY_JSON if property == P::Feature => "FEATURE",
            KEY_JSON => "LOCATION",
            _ => return None,
        },
    };
    Some(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links() {
        assert_eq!(
            link(EntityType::Observation, NavigationProperty::Datastream),
            Some(Link::Forward {
                foreign_key: "DATASTREAM_ID"
            })
        );
        assert_eq!(
            link(EntityType::Datastream, NavigationProperty::Observations),
            Some(Link::Reverse {
                foreign_key: "DATASTREAM_ID"
            })
        );
        assert_eq!(
            link(EntityType::Thing, NavigationProperty::Locations),
            Some(Link::Junction {
                table: "THINGS_LOCATIONS",
                source_key: "THING_ID",
                target_key: "LOCATION_ID"
            })
        );
        assert_eq!(link(EntityType::Thing, NavigationProperty::Sensor), None);
    }

    #[test]
    fn test_every_navigation_is_mapped() {
        for t in EntityType::ALL {
            for n in t.navigation_properties() {
                assert!(link(t, *n).is_some(), "{}/{}", t, n);
            }
        }
    }

    #[test]
    fn test_every_sub_field_has_a_column() {
        for t in EntityType::ALL {
            for p in t.properties() {
                for sub in p.sub_fields(t) {
                    assert!(column(t, *p, sub.key).is_some(), "{}.{}/{}", t, p, sub.key);
                }
            }
        }
    }
}
