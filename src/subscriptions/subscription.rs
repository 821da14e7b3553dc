//! Parsed subscriptions and change matching.

use crate::error::{QueryError, Result};
use crate::eval::Evaluator;
use crate::expression::Expression;
use crate::model::{EntityAccess, EntityType, Property};
use crate::path::{PathElement, ResourcePath};

/// What a topic subscribes to.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionKind {
    /// Every entity of a set: `Datastreams(9)/Observations`.
    EntitySet,
    /// One entity: `Things(3)` or `Observations(1)/Datastream`.
    Entity,
    /// One property of one entity: `Things(3)/name`.
    Property(Property),
}

/// A subscription built from a topic. Immutable once built.
#[derive(Clone, Debug)]
pub struct Subscription {
    topic: String,
    kind: SubscriptionKind,
    entity_type: EntityType,
    path: ResourcePath,
    identity: Option<Expression>,
    filter: Option<Expression>,
    select: Vec<Property>,
}

impl Subscription {
    /// Classify a compressed path by its trailing elements.
    pub(crate) fn classify(path: &ResourcePath) -> Result<(SubscriptionKind, EntityType)> {
        if path.is_ref() || path.is_value() {
            return Err(QueryError::InvalidPath(
                "$ref and $value can not be subscribed to".to_string(),
            ));
        }
        match path.elements() {
            [.., PathElement::EntitySet(t)] => Ok((SubscriptionKind::EntitySet, *t)),
            [.., PathElement::Entity { entity_type, .. }] => Ok((SubscriptionKind::Entity, *entity_type)),
            [.., PathElement::Entity { entity_type, .. }, PathElement::Property(p @ Property::Entity(_))] => {
                Ok((SubscriptionKind::Property(p.clone()), *entity_type))
            }
            [] => Err(QueryError::InvalidPath("empty path".to_string())),
            _ => Err(QueryError::InvalidPath(
                "path must end in an entity set, an entity or an entity property".to_string(),
            )),
        }
    }

    pub(crate) fn new(
        topic: String,
        path: ResourcePath,
        filter: Option<Expression>,
        select: Vec<Property>,
    ) -> Result<Self> {
        let (kind, entity_type) = Self::classify(&path)?;
        let identity = path.identity_filter()?;
        Ok(Self {
            topic,
            kind,
            entity_type,
            path,
            identity,
            filter,
            select,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kind(&self) -> &SubscriptionKind {
        &self.kind
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Condition derived from the ids in the topic path.
    pub fn identity(&self) -> Option<&Expression> {
        self.identity.as_ref()
    }

    /// `$filter` of the topic.
    pub fn filter(&self) -> Option<&Expression> {
        self.filter.as_ref()
    }

    /// Properties a notification carries; empty for all.
    pub fn selected(&self) -> Vec<Property> {
        match &self.kind {
            SubscriptionKind::Property(p) => vec![p.clone()],
            _ => self.select.clone(),
        }
    }

    /// Whether a change of `entity` touching `changed` is published on this
    /// subscription.
    pub fn matches(&self, evaluator: &Evaluator<'_>, entity: &dyn EntityAccess, changed: &[Property]) -> Result<bool> {
        if entity.entity_type() != self.entity_type {
            return Ok(false);
        }
        if let SubscriptionKind::Property(property) = &self.kind {
            if !changed.contains(property) {
                return Ok(false);
            }
        }
        if let Some(identity) = &self.identity {
            if !evaluator.matches(identity, entity)? {
                return Ok(false);
            }
        }
        match &self.filter {
            Some(filter) => evaluator.matches(filter, entity),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityProperty, NavigationProperty};
    use crate::path::parse_path;
    use crate::types::{Id, LongIdManager};

    fn classify(text: &str) -> Result<(SubscriptionKind, EntityType)> {
        Subscription::classify(&parse_path(&LongIdManager, "", text)?)
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            classify("/Things(1)/Datastreams").unwrap(),
            (SubscriptionKind::EntitySet, EntityType::Datastream)
        );
        assert_eq!(classify("/Things").unwrap(), (SubscriptionKind::EntitySet, EntityType::Thing));
        assert_eq!(classify("/Things(1)").unwrap(), (SubscriptionKind::Entity, EntityType::Thing));
        assert_eq!(
            classify("/Observations(1)/Datastream").unwrap(),
            (SubscriptionKind::Entity, EntityType::Datastream)
        );
        assert_eq!(
            classify("/Things(1)/name").unwrap(),
            (
                SubscriptionKind::Property(Property::Entity(EntityProperty::Name)),
                EntityType::Thing
            )
        );
    }

    #[test]
    fn test_unsubscribable_shapes() {
        for text in ["/Things(1)/properties/a", "/Things(1)/name/$value", "/Things(1)/$ref"] {
            assert!(matches!(classify(text), Err(QueryError::InvalidPath(_))), "{}", text);
        }
    }

    #[test]
    fn test_entity_subscription_matches_its_id_only() {
        let path = parse_path(&LongIdManager, "", "/Things(3)").unwrap();
        let subscription = Subscription::new("Things(3)".into(), path, None, Vec::new()).unwrap();
        let evaluator = Evaluator::new(&LongIdManager);
        let changed = [Property::Entity(EntityProperty::Name)];
        let three = Entity::reference(EntityType::Thing, Id::Long(3));
        let four = Entity::reference(EntityType::Thing, Id::Long(4));
        assert!(subscription.matches(&evaluator, &three, &changed).unwrap());
        assert!(!subscription.matches(&evaluator, &four, &changed).unwrap());
        let sensor = Entity::reference(EntityType::Sensor, Id::Long(3));
        assert!(!subscription.matches(&evaluator, &sensor, &changed).unwrap());
    }

    #[test]
    fn test_to_one_entity_subscription_follows_inverse() {
        let path = parse_path(&LongIdManager, "", "/Observations(1)/Datastream").unwrap();
        let subscription = Subscription::new("Observations(1)/Datastream".into(), path, None, Vec::new()).unwrap();
        let evaluator = Evaluator::new(&LongIdManager);
        let datastream = Entity::reference(EntityType::Datastream, Id::Long(7)).with_links(
            NavigationProperty::Observations,
            vec![Entity::reference(EntityType::Observation, Id::Long(1))],
        );
        assert!(subscription.matches(&evaluator, &datastream, &[]).unwrap());
        let other = Entity::reference(EntityType::Datastream, Id::Long(8));
        assert!(!subscription.matches(&evaluator, &other, &[]).unwrap());
    }
}
