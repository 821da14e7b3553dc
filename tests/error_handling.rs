//! Error handling and edge case tests.

use chrono::{TimeZone, Utc};
use sta_query::{
    parse_filter, parse_path, Compiler, CoreSettings, Entity, EntityProperty, EntityType, Evaluator,
    Id, JsonFormatter, LongIdManager, Query, QueryError, SubscriptionContext,
    SubscriptionManager,
};
use std::sync::Arc;

fn compile(entity_type: EntityType, filter: &str) -> Result<(), QueryError> {
    let expression = parse_filter(filter)?;
    Compiler::new(&LongIdManager, entity_type).compile_filter(&expression)?;
    Ok(())
}

fn observation() -> Entity {
    Entity::reference(EntityType::Observation, Id::Long(1))
        .with(EntityProperty::Result, 4i64)
        .with(EntityProperty::ResultTime, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
}

// --- Structural errors ---

#[test]
fn test_path_errors_are_structural() {
    for bad in [
        "Things",
        "/Nothings",
        "/Things(1",
        "/Things(1)x",
        "/Things(1)/nosuch",
        "/Things/$value",
        "/Things(1)//name",
    ] {
        let err = parse_path(&LongIdManager, "", bad).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPath(_)), "{} -> {:?}", bad, err);
        assert!(err.is_structural());
    }
}

#[test]
fn test_query_option_errors_are_structural() {
    for bad in ["$top=-1", "$count=maybe", "$frobnicate=1", "$filter=name eq"] {
        let err = Query::parse(bad).unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }), "{} -> {:?}", bad, err);
        assert!(err.is_structural());
    }
}

#[test]
fn test_property_path_errors_are_structural() {
    for bad in ["Datastream/Thing eq 1", "Sensor/name eq 'a'", "Datastream/name/first eq 'a'"] {
        let err = compile(EntityType::Observation, bad).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPropertyPath(_)), "{} -> {:?}", bad, err);
        assert!(err.is_structural());
    }
}

#[test]
fn test_topic_errors_are_structural() {
    let context = SubscriptionContext::new(&CoreSettings {
        topic_prefix: Some("v1.1/".to_string()),
        ..Default::default()
    });
    let err = context.subscription("Things").unwrap_err();
    assert!(matches!(err, QueryError::InvalidTopic { .. }));
    assert!(err.is_structural());

    let err = context.subscription("v1.1/Things(1)/name?$select=name").unwrap_err();
    assert!(matches!(err, QueryError::QueryOptionsNotAllowed(_)));
    assert!(err.is_structural());

    assert!(matches!(context.subscription("v1.1/Things/$ref"), Err(QueryError::InvalidPath(_))));
}

// --- Semantic errors ---

#[test]
fn test_type_errors_are_semantic() {
    let cases = [
        (EntityType::Thing, "name eq geography'POINT (1 2)'"),
        (EntityType::Observation, "resultTime mod 2 eq 1"),
        (EntityType::Observation, "5 div phenomenonTime eq 1"),
        (EntityType::Location, "st_relate(location, location, name)"),
    ];
    for (entity_type, filter) in cases {
        let err = compile(entity_type, filter).unwrap_err();
        assert!(!err.is_structural(), "{} -> {:?}", filter, err);
    }
}

#[test]
fn test_evaluator_reports_the_same_errors() {
    let evaluator = Evaluator::new(&LongIdManager);
    let entity = observation();
    for filter in ["resultTime mod 2 eq 1", "resultTime eq geography'POINT (1 2)'"] {
        let expression = parse_filter(filter).unwrap();
        let compiled = Compiler::new(&LongIdManager, EntityType::Observation)
            .compile_filter(&expression)
            .unwrap_err();
        let evaluated = evaluator.matches(&expression, &entity).unwrap_err();
        assert_eq!(
            std::mem::discriminant(&compiled),
            std::mem::discriminant(&evaluated),
            "{}",
            filter
        );
    }
}

// --- Edge cases ---

#[test]
fn test_null_operands_never_match() {
    let evaluator = Evaluator::new(&LongIdManager);
    let bare = Entity::reference(EntityType::Observation, Id::Long(1));
    for filter in ["result eq 1", "not (result eq 1)", "result ne 1", "result add 1 gt 0"] {
        assert!(!evaluator.matches(&parse_filter(filter).unwrap(), &bare).unwrap(), "{}", filter);
    }
}

#[test]
fn test_invalid_filter_subscription_is_skipped() {
    let settings = CoreSettings::default();
    let manager = SubscriptionManager::new(
        &settings,
        Arc::new(JsonFormatter::new("", settings.id_manager())),
    );
    assert!(manager.subscribe("Things?$filter=name div 2 eq 1").unwrap().is_none());
    assert!(manager.subscribe("Things?$filter=nosuch eq 1").unwrap().is_none());
    assert_eq!(manager.subscription_count(), 0);
}

#[test]
fn test_config_errors() {
    assert!(matches!(
        CoreSettings::from_json("{\"idScheme\": \"uuid\"}"),
        Err(QueryError::Serialization(_))
    ));
    let settings = CoreSettings::from_json("{}").unwrap();
    assert_eq!(settings.subscription_buffer_size, 1000);
}
