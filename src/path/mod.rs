//! Resource paths: `/Things(1)/Datastreams`, `/Observations(5)/result`, ...
//!
//! A [`ResourcePath`] is an ordered list of [`PathElement`]s together with
//! the element the path addresses (`main`) and the deepest entity that was
//! named by id (`identified`). [`ResourcePath::compress`] drops the
//! navigation history in front of the deepest identified anchor.

mod parser;

pub use parser::{parse_path, percent_decode};

use crate::error::{QueryError, Result};
use crate::expression::{Constant, Expression, FunctionKind};
use crate::model::{EntityProperty, EntityType, Property};
use crate::types::{Id, IdManager};

#[derive(Clone, Debug, PartialEq)]
pub enum PathElement {
    EntitySet(EntityType),
    /// An entity, named by id or reached through a to-one navigation.
    Entity {
        entity_type: EntityType,
        id: Option<Id>,
    },
    Property(Property),
    /// Array index inside a document property.
    CustomIndex(usize),
}

impl PathElement {
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            PathElement::EntitySet(t) => Some(*t),
            PathElement::Entity { entity_type, .. } => Some(*entity_type),
            _ => None,
        }
    }

    pub fn is_identified_entity(&self) -> bool {
        matches!(self, PathElement::Entity { id: Some(_), .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourcePath {
    service_root_url: String,
    elements: Vec<PathElement>,
    main: Option<usize>,
    identified: Option<usize>,
    is_ref: bool,
    is_value: bool,
}

impl ResourcePath {
    pub fn new(service_root_url: impl Into<String>) -> Self {
        Self {
            service_root_url: service_root_url.into(),
            ..Default::default()
        }
    }

    /// Append an element, optionally marking it as main or identified.
    pub fn add_element(&mut self, element: PathElement, is_main: bool, is_identified: bool) {
        self.elements.push(element);
        let index = self.elements.len() - 1;
        if is_main {
            self.main = Some(index);
        }
        if is_identified {
            self.identified = Some(index);
        }
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    pub fn main_element(&self) -> Option<&PathElement> {
        self.main.and_then(|i| self.elements.get(i))
    }

    pub fn identified_element(&self) -> Option<&PathElement> {
        self.identified.and_then(|i| self.elements.get(i))
    }

    pub fn main_index(&self) -> Option<usize> {
        self.main
    }

    pub fn identified_index(&self) -> Option<usize> {
        self.identified
    }

    /// Entity type of the addressed entity or entity set.
    pub fn main_entity_type(&self) -> Option<EntityType> {
        self.main_element().and_then(PathElement::entity_type)
    }

    pub fn service_root_url(&self) -> &str {
        &self.service_root_url
    }

    pub fn is_ref(&self) -> bool {
        self.is_ref
    }

    pub fn is_value(&self) -> bool {
        self.is_value
    }

    pub fn set_ref(&mut self, is_ref: bool) {
        self.is_ref = is_ref;
    }

    pub fn set_value(&mut self, is_value: bool) {
        self.is_value = is_value;
    }

    /// Anchor the path at its deepest `EntitySet(id)` pair.
    ///
    /// Scans from the tail; the first entity with an id that directly follows
    /// its entity set wins and every element before that set is discarded.
    /// A path without such a pair is left as it is.
    pub fn compress(&mut self) {
        for i in (1..self.elements.len()).rev() {
            let anchored = match (&self.elements[i - 1], &self.elements[i]) {
                (
                    PathElement::EntitySet(set_type),
                    PathElement::Entity {
                        entity_type,
                        id: Some(_),
                    },
                ) => set_type == entity_type,
                _ => false,
            };
            if anchored {
                self.elements.drain(..i - 1);
                self.identified = Some(1);
                self.main = self
                    .elements
                    .iter()
                    .rposition(|e| e.entity_type().is_some());
                return;
            }
        }
    }

    /// Condition selecting the entities the path addresses.
    ///
    /// Walks the navigations from the identified entity to the main element
    /// and returns their inverses, read from the main entity, ending in
    /// `id eq <identified id>`. `/Datastreams(9)/Observations` yields
    /// `Datastream/id eq 9`. `None` when nothing is identified.
    pub fn identity_filter(&self) -> Result<Option<Expression>> {
        let (Some(identified), Some(main)) = (self.identified, self.main) else {
            return Ok(None);
        };
        let Some(PathElement::Entity {
            entity_type,
            id: Some(id),
        }) = self.elements.get(identified)
        else {
            return Ok(None);
        };
        let mut current = *entity_type;
        let mut inverses = Vec::new();
        for element in self.elements.iter().take(main + 1).skip(identified + 1) {
            let Some(target) = element.entity_type() else {
                continue;
            };
            let navigation = current.navigation_to(target).ok_or_else(|| {
                QueryError::InvalidPath(format!("no navigation from {} to {}", current, target))
            })?;
            let inverse = navigation.inverse(current).ok_or_else(|| {
                QueryError::InvalidPath(format!("{} has no inverse on {}", navigation, target))
            })?;
            inverses.push(Property::Navigation(inverse));
            current = target;
        }
        inverses.reverse();
        inverses.push(Property::Entity(EntityProperty::Id));
        let value = match id {
            Id::Long(v) => Constant::Integer(*v),
            Id::String(s) => Constant::String(s.clone()),
        };
        Ok(Some(Expression::binary(
            FunctionKind::Eq,
            Expression::path(inverses),
            Expression::constant(value),
        )))
    }

    /// Path text relative to the service root, e.g. `/Things(1)/Datastreams`.
    pub fn canonical_text(&self, ids: &dyn IdManager) -> String {
        let mut out = String::new();
        for element in &self.elements {
            match element {
                PathElement::EntitySet(t) => {
                    out.push('/');
                    out.push_str(t.set_name());
                }
                PathElement::Entity {
                    id: Some(id), ..
                } => {
                    out.push('(');
                    out.push_str(&ids.url_text(id));
                    out.push(')');
                }
                PathElement::Entity {
                    entity_type,
                    id: None,
                } => {
                    out.push('/');
                    out.push_str(entity_type.entity_name());
                }
                PathElement::Property(p) => {
                    out.push('/');
                    out.push_str(p.name());
                }
                PathElement::CustomIndex(i) => {
                    out.push_str(&format!("[{}]", i));
                }
            }
        }
        if self.is_ref {
            out.push_str("/$ref");
        } else if self.is_value {
            out.push_str("/$value");
        }
        out
    }

    /// Absolute URL of the path.
    pub fn url(&self, ids: &dyn IdManager) -> String {
        format!("{}{}", self.service_root_url, self.canonical_text(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityProperty, NavigationProperty};
    use crate::types::LongIdManager;

    fn things_datastreams() -> ResourcePath {
        let mut path = ResourcePath::new("");
        path.add_element(PathElement::EntitySet(EntityType::Thing), true, false);
        path.add_element(
            PathElement::Entity {
                entity_type: EntityType::Thing,
                id: Some(Id::Long(1)),
            },
            true,
            true,
        );
        path.add_element(PathElement::EntitySet(EntityType::Datastream), true, false);
        path
    }

    #[test]
    fn test_compress_keeps_single_anchor() {
        let mut path = things_datastreams();
        path.compress();
        assert_eq!(path.main_element(), Some(&PathElement::EntitySet(EntityType::Datastream)));
        assert_eq!(
            path.identified_element(),
            Some(&PathElement::Entity {
                entity_type: EntityType::Thing,
                id: Some(Id::Long(1))
            })
        );
        assert_eq!(path.canonical_text(&LongIdManager), "/Things(1)/Datastreams");
    }

    #[test]
    fn test_compress_drops_history_before_deepest_anchor() {
        let mut path = things_datastreams();
        path.add_element(
            PathElement::Entity {
                entity_type: EntityType::Datastream,
                id: Some(Id::Long(2)),
            },
            true,
            true,
        );
        path.add_element(PathElement::EntitySet(EntityType::Observation), true, false);
        path.compress();
        assert_eq!(path.elements().len(), 3);
        assert_eq!(path.identified_index(), Some(1));
        assert_eq!(path.main_index(), Some(2));
        assert_eq!(path.canonical_text(&LongIdManager), "/Datastreams(2)/Observations");
    }

    #[test]
    fn test_compress_without_anchor_is_noop() {
        let mut path = ResourcePath::new("");
        path.add_element(PathElement::EntitySet(EntityType::Thing), true, false);
        let before = path.clone();
        path.compress();
        assert_eq!(path, before);
        assert_eq!(path.identified_element(), None);
    }

    #[test]
    fn test_identity_filter_follows_inverse_navigations() {
        let mut path = things_datastreams();
        path.compress();
        let filter = path.identity_filter().unwrap().unwrap();
        assert_eq!(filter.to_string(), "(Thing/id eq 1)");

        let mut path = things_datastreams();
        path.add_element(PathElement::EntitySet(EntityType::Observation), true, false);
        assert_eq!(
            path.identity_filter().unwrap().unwrap().to_string(),
            "(Datastream/Thing/id eq 1)"
        );

        let mut single = ResourcePath::new("");
        single.add_element(PathElement::EntitySet(EntityType::Thing), false, false);
        single.add_element(
            PathElement::Entity {
                entity_type: EntityType::Thing,
                id: Some(Id::String("a".into())),
            },
            true,
            true,
        );
        assert_eq!(single.identity_filter().unwrap().unwrap().to_string(), "(id eq 'a')");

        let mut unanchored = ResourcePath::new("");
        unanchored.add_element(PathElement::EntitySet(EntityType::Thing), true, false);
        assert_eq!(unanchored.identity_filter().unwrap(), None);
    }

    #[test]
    fn test_canonical_text_renders_every_element_kind() {
        let mut path = ResourcePath::new("http://example.org/v1.0");
        path.add_element(PathElement::EntitySet(EntityType::Observation), true, false);
        path.add_element(
            PathElement::Entity {
                entity_type: EntityType::Observation,
                id: Some(Id::Long(4)),
            },
            true,
            true,
        );
        path.add_element(
            PathElement::Entity {
                entity_type: EntityType::Datastream,
                id: None,
            },
            true,
            false,
        );
        path.add_element(
            PathElement::Property(Property::Entity(EntityProperty::Properties)),
            false,
            false,
        );
        path.add_element(PathElement::Property(Property::Custom("list".into())), false, false);
        path.add_element(PathElement::CustomIndex(0), false, false);
        path.set_value(true);
        assert_eq!(
            path.url(&LongIdManager),
            "http://example.org/v1.0/Observations(4)/Datastream/properties/list[0]/$value"
        );
        assert_eq!(
            NavigationProperty::Datastream.name(),
            EntityType::Datastream.entity_name()
        );
    }
}
