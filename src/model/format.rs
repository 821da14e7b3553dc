//! Rendering matched entities into notification payloads.

use super::entity::{EntityAccess, FieldValue};
use super::schema::{EntityProperty, Property};
use crate::error::Result;
use crate::types::IdManager;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Serializes an entity for delivery to subscribers.
pub trait EntityFormatter: Send + Sync {
    /// Render `entity`, restricted to `selected` when it is not empty.
    fn format(&self, entity: &dyn EntityAccess, selected: &[Property]) -> Result<String>;
}

/// Default JSON rendering with `@iot.id`, `@iot.selfLink` and navigation links.
pub struct JsonFormatter {
    service_root_url: String,
    id_manager: Arc<dyn IdManager>,
}

impl JsonFormatter {
    pub fn new(service_root_url: impl Into<String>, id_manager: Arc<dyn IdManager>) -> Self {
        Self {
            service_root_url: service_root_url.into(),
            id_manager,
        }
    }
}

impl EntityFormatter for JsonFormatter {
    fn format(&self, entity: &dyn EntityAccess, selected: &[Property]) -> Result<String> {
        let entity_type = entity.entity_type();
        let wants = |p: &Property| selected.is_empty() || selected.contains(p);
        let mut out = Map::new();

        let self_link = entity.id().map(|id| {
            format!(
                "{}/{}({})",
                self.service_root_url,
                entity_type.set_name(),
                self.id_manager.url_text(&id)
            )
        });
        if wants(&Property::Entity(EntityProperty::Id)) {
            if let Some(id) = entity.id() {
                out.insert("@iot.id".to_string(), FieldValue::Id(id).to_json());
            }
            if let Some(link) = &self_link {
                out.insert("@iot.selfLink".to_string(), JsonValue::String(link.clone()));
            }
        }
        for property in entity_type.properties() {
            if *property == EntityProperty::Id {
                continue;
            }
            let key = Property::Entity(*property);
            if wants(&key) && entity.is_set(&key) {
                out.insert(property.json_name().to_string(), entity.get(&key).to_json());
            }
        }
        if let Some(link) = &self_link {
            for navigation in entity_type.navigation_properties() {
                if wants(&Property::Navigation(*navigation)) {
                    out.insert(
                        format!("{}@iot.navigationLink", navigation.name()),
                        JsonValue::String(format!("{}/{}", link, navigation.name())),
                    );
                }
            }
        }
        Ok(serde_json::to_string(&JsonValue::Object(out))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityType};
    use crate::types::{Id, LongIdManager};

    #[test]
    fn test_format_full_entity() {
        let formatter = JsonFormatter::new("http://example.org/v1.0", Arc::new(LongIdManager));
        let thing = Entity::reference(EntityType::Thing, Id::Long(1)).with(EntityProperty::Name, "lamp");
        let text = formatter.format(&thing, &[]).unwrap();
        let doc: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["@iot.id"], 1);
        assert_eq!(doc["@iot.selfLink"], "http://example.org/v1.0/Things(1)");
        assert_eq!(doc["name"], "lamp");
        assert_eq!(
            doc["Datastreams@iot.navigationLink"],
            "http://example.org/v1.0/Things(1)/Datastreams"
        );
    }

    #[test]
    fn test_format_selected_property() {
        let formatter = JsonFormatter::new("", Arc::new(LongIdManager));
        let thing = Entity::reference(EntityType::Thing, Id::Long(1))
            .with(EntityProperty::Name, "lamp")
            .with(EntityProperty::Description, "on the desk");
        let text = formatter
            .format(&thing, &[Property::Entity(EntityProperty::Name)])
            .unwrap();
        assert_eq!(text, r#"{"name":"lamp"}"#);
    }
}
