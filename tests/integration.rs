//! Integration tests for paths, queries and subscriptions.

use serde_json::json;
use sta_query::sql::SqlValue;
use sta_query::{
    parse_path, CoreSettings, Entity, EntityChangeEvent, EntityProperty, EntityType, Evaluator,
    FieldValue, Id, JsonFormatter, LongIdManager, NavigationProperty, PathElement, Property, Query,
    QueryBuilder, QueryError, SubscriptionEvent, SubscriptionKind, SubscriptionManager,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn manager(settings: CoreSettings) -> SubscriptionManager {
    let formatter = JsonFormatter::new(settings.service_root_url.clone(), settings.id_manager());
    SubscriptionManager::new(&settings, Arc::new(formatter))
}

fn observation(id: i64, datastream: i64, result: impl Into<FieldValue>) -> Entity {
    Entity::reference(EntityType::Observation, Id::Long(id))
        .with(EntityProperty::Result, result)
        .with_link(
            NavigationProperty::Datastream,
            Entity::reference(EntityType::Datastream, Id::Long(datastream)),
        )
}

// --- Paths ---

#[test]
fn test_path_anchors_at_identified_set() {
    let path = parse_path(&LongIdManager, "http://example.org/v1.1", "/Things(1)/Datastreams").unwrap();
    assert_eq!(path.main_element(), Some(&PathElement::EntitySet(EntityType::Datastream)));
    assert_eq!(
        path.identified_element(),
        Some(&PathElement::Entity {
            entity_type: EntityType::Thing,
            id: Some(Id::Long(1)),
        })
    );
    assert_eq!(path.url(&LongIdManager), "http://example.org/v1.1/Things(1)/Datastreams");
}

#[test]
fn test_deep_path_keeps_only_the_deepest_anchor() {
    let path = parse_path(
        &LongIdManager,
        "",
        "/Things(1)/Datastreams(2)/Observations(3)/FeatureOfInterest",
    )
    .unwrap();
    assert_eq!(path.canonical_text(&LongIdManager), "/Observations(3)/FeatureOfInterest");
    assert_eq!(path.main_entity_type(), Some(EntityType::FeatureOfInterest));
}

// --- Queries ---

#[test]
fn test_datastream_observations_query() {
    init_tracing();
    let path = parse_path(&LongIdManager, "", "/Datastreams(9)/Observations").unwrap();
    let query = Query::parse("$filter=result gt 5&$orderby=phenomenonTime&$top=100&$count=true").unwrap();
    let select = QueryBuilder::new(&LongIdManager).build(&path, &query).unwrap();
    let sql = select.to_sql();
    assert!(sql.text.starts_with("SELECT \"e0\".*"));
    assert!(sql.text.contains("FROM \"OBSERVATIONS\" AS \"e0\""));
    assert!(sql.text.contains("\"e0\".\"DATASTREAM_ID\" = $1::bigint"));
    assert!(sql.text.contains("\"e0\".\"RESULT_NUMBER\" > $2::bigint"));
    assert!(sql.text.ends_with("LIMIT 100"));
    assert_eq!(sql.params, vec![SqlValue::Long(9), SqlValue::Long(5)]);
    assert!(select.count);
    assert!(!select.distinct);
}

#[test]
fn test_result_filter_follows_literal_kind() {
    let numeric = sta_query::parse_filter("result gt 5").unwrap();
    let textual = sta_query::parse_filter("result gt '5'").unwrap();
    let evaluator = Evaluator::new(&LongIdManager);

    let seven = observation(1, 9, 7i64);
    let seven_text = observation(2, 9, "7");
    assert!(evaluator.matches(&numeric, &seven).unwrap());
    assert!(!evaluator.matches(&numeric, &seven_text).unwrap());
    assert!(evaluator.matches(&textual, &seven_text).unwrap());
}

// --- Subscriptions ---

#[test]
fn test_entity_set_subscription_with_parent_id() {
    init_tracing();
    let manager = manager(CoreSettings::default());
    let handle = manager.subscribe("Datastreams(9)/Observations").unwrap().unwrap();

    assert_eq!(manager.dispatch(&EntityChangeEvent::created(observation(1, 9, 1.5))), 1);
    assert_eq!(manager.dispatch(&EntityChangeEvent::created(observation(2, 10, 1.5))), 0);

    match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
        SubscriptionEvent::Message(message) => {
            let doc: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
            assert_eq!(doc["@iot.id"], 1);
            assert_eq!(doc["result"], 1.5);
        }
        other => panic!("Expected Message event, got {:?}", other),
    }
    assert!(handle.try_recv().is_err());
}

#[test]
fn test_property_subscription_needs_the_property_changed() {
    let manager = manager(CoreSettings::default());
    let handle = manager.subscribe("Things(3)/Name").unwrap().unwrap();
    let thing = Entity::reference(EntityType::Thing, Id::Long(3))
        .with(EntityProperty::Name, "lamp")
        .with(EntityProperty::Description, "desk");

    let description = EntityChangeEvent::updated(thing.clone(), vec![Property::Entity(EntityProperty::Description)]);
    assert_eq!(manager.dispatch(&description), 0);

    let name = EntityChangeEvent::updated(thing, vec![Property::Entity(EntityProperty::Name)]);
    assert_eq!(manager.dispatch(&name), 1);
    match handle.try_recv().unwrap() {
        SubscriptionEvent::Message(message) => assert_eq!(message.payload, r#"{"name":"lamp"}"#),
        other => panic!("Expected Message event, got {:?}", other),
    }
}

#[test]
fn test_property_subscription_rejects_query_options() {
    let manager = manager(CoreSettings::default());
    let result = manager.subscribe("Things(3)/Name?$filter=name eq 'x'");
    assert!(matches!(result, Err(QueryError::QueryOptionsNotAllowed(_))));
    assert_eq!(manager.subscription_count(), 0);
}

#[test]
fn test_filtered_subscription_over_navigation() {
    let manager = manager(CoreSettings {
        topic_prefix: Some("v1.1/".to_string()),
        ..Default::default()
    });
    let topic = "v1.1/Observations?$filter=Datastream/Thing/properties/room eq 'kitchen'";
    let handle = manager.subscribe(topic).unwrap().unwrap();
    let subscription = manager.context().subscription(topic).unwrap().unwrap();
    assert_eq!(subscription.kind(), &SubscriptionKind::EntitySet);

    let in_room = |room: &str| {
        Entity::reference(EntityType::Observation, Id::Long(1)).with_link(
            NavigationProperty::Datastream,
            Entity::reference(EntityType::Datastream, Id::Long(2)).with_link(
                NavigationProperty::Thing,
                Entity::reference(EntityType::Thing, Id::Long(3))
                    .with(EntityProperty::Properties, json!({"room": room})),
            ),
        )
    };
    assert_eq!(manager.dispatch(&EntityChangeEvent::created(in_room("kitchen"))), 1);
    assert_eq!(manager.dispatch(&EntityChangeEvent::created(in_room("hall"))), 0);
    assert!(matches!(handle.try_recv(), Ok(SubscriptionEvent::Message(_))));
}

#[test]
fn test_string_id_scheme() {
    let settings = CoreSettings::from_json(r#"{"idScheme": "string"}"#).unwrap();
    let manager = manager(settings);
    let _handle = manager.subscribe("Things('lab-1')/Datastreams").unwrap().unwrap();
    let datastream = Entity::reference(EntityType::Datastream, Id::String("ds".into())).with_link(
        NavigationProperty::Thing,
        Entity::reference(EntityType::Thing, Id::String("lab-1".into())),
    );
    assert_eq!(manager.dispatch(&EntityChangeEvent::created(datastream)), 1);
}

mod path_round_trip {
    use proptest::prelude::*;
    use sta_query::{parse_path, LongIdManager};

    fn path_text() -> impl Strategy<Value = String> {
        let root = prop::sample::select(vec!["Things", "Datastreams", "Sensors", "Observations"]);
        (root, prop::option::of(1i64..1000), prop::option::of(1i64..1000)).prop_map(|(root, a, b)| {
            let mut text = format!("/{}", root);
            if let Some(a) = a {
                text.push_str(&format!("({})", a));
                let next = match root {
                    "Things" => "Datastreams",
                    "Datastreams" => "Observations",
                    "Sensors" => "Datastreams",
                    _ => "FeatureOfInterest",
                };
                text.push('/');
                text.push_str(next);
                if let (Some(b), true) = (b, next != "FeatureOfInterest") {
                    text.push_str(&format!("({})", b));
                }
            }
            text
        })
    }

    proptest! {
        #[test]
        fn test_canonical_text_parses_to_the_same_path(text in path_text()) {
            let path = parse_path(&LongIdManager, "", &text).unwrap();
            let canonical = path.canonical_text(&LongIdManager);
            let reparsed = parse_path(&LongIdManager, "", &canonical).unwrap();
            prop_assert_eq!(reparsed.canonical_text(&LongIdManager), canonical);
            prop_assert_eq!(reparsed.main_entity_type(), path.main_entity_type());
        }
    }
}
