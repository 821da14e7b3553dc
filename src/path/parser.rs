//! Resource-path text to [`ResourcePath`].

use super::{PathElement, ResourcePath};
use crate::error::{QueryError, Result};
use crate::model::{EntityProperty, EntityType, NavigationProperty, Property};
use crate::types::IdManager;

/// Decode `%XX` escapes. `+` is kept as is.
pub fn percent_decode(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| QueryError::InvalidPath(format!("bad escape at {} in '{}'", i, text)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| QueryError::InvalidPath(format!("'{}' does not decode to UTF-8", text)))
}

/// Split on `/` outside quotes and parentheses.
fn split_segments(text: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| QueryError::InvalidPath(format!("unbalanced ')' in '{}'", text)))?;
            }
            '/' if !quoted && depth == 0 => {
                segments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted || depth != 0 {
        return Err(QueryError::InvalidPath(format!("unterminated id in '{}'", text)));
    }
    segments.push(&text[start..]);
    Ok(segments)
}

/// One segment: `name`, `name(id)` or `name[0][1]`.
struct Segment<'a> {
    name: &'a str,
    id: Option<&'a str>,
    indexes: Vec<usize>,
}

fn split_segment(segment: &str) -> Result<Segment<'_>> {
    if let Some(open) = segment.find('(') {
        let id = segment[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| QueryError::InvalidPath(format!("segment '{}' has text after the id", segment)))?;
        return Ok(Segment {
            name: &segment[..open],
            id: Some(id),
            indexes: Vec::new(),
        });
    }
    let name_end = segment.find('[').unwrap_or(segment.len());
    let mut indexes = Vec::new();
    let mut rest = &segment[name_end..];
    while !rest.is_empty() {
        let close = rest
            .find(']')
            .filter(|_| rest.starts_with('['))
            .ok_or_else(|| QueryError::InvalidPath(format!("bad index in segment '{}'", segment)))?;
        let index = rest[1..close]
            .parse::<usize>()
            .map_err(|_| QueryError::InvalidPath(format!("bad index in segment '{}'", segment)))?;
        indexes.push(index);
        rest = &rest[close + 1..];
    }
    Ok(Segment {
        name: &segment[..name_end],
        id: None,
        indexes,
    })
}

fn entity_property(entity_type: EntityType, name: &str) -> Option<EntityProperty> {
    EntityProperty::from_name(name)
        .filter(|p| entity_type.has_property(*p))
        .or_else(|| {
            entity_type
                .properties()
                .iter()
                .copied()
                .find(|p| p.json_name().eq_ignore_ascii_case(name))
        })
}

/// Parse a resource path such as `/Things(1)/Datastreams` or
/// `/Observations(5)/parameters/depth[0]/$value`.
///
/// The path is compressed before it is returned.
pub fn parse_path(ids: &dyn IdManager, service_root_url: &str, text: &str) -> Result<ResourcePath> {
    let mut path = ResourcePath::new(service_root_url);
    let body = text
        .strip_prefix('/')
        .ok_or_else(|| QueryError::InvalidPath(format!("'{}' does not start with '/'", text)))?;
    if body.is_empty() {
        return Ok(path);
    }
    let segments = split_segments(body)?;
    let count = segments.len();
    for (position, raw) in segments.into_iter().enumerate() {
        let is_last = position + 1 == count;
        if raw == "$ref" || raw == "$value" {
            if !is_last {
                return Err(QueryError::InvalidPath(format!("'{}' must end the path", raw)));
            }
            let last = path.last();
            if raw == "$ref" {
                if !matches!(last, Some(PathElement::EntitySet(_)) | Some(PathElement::Entity { .. })) {
                    return Err(QueryError::InvalidPath("$ref must follow an entity or set".into()));
                }
                path.set_ref(true);
            } else {
                if !matches!(last, Some(PathElement::Property(_)) | Some(PathElement::CustomIndex(_))) {
                    return Err(QueryError::InvalidPath("$value must follow a property".into()));
                }
                path.set_value(true);
            }
            continue;
        }
        let segment = split_segment(raw)?;
        if segment.name.is_empty() {
            return Err(QueryError::InvalidPath(format!("empty segment in '{}'", text)));
        }
        match path.last().cloned() {
            None => {
                let entity_type = EntityType::from_set_name(segment.name).ok_or_else(|| {
                    QueryError::InvalidPath(format!("unknown entity set '{}'", segment.name))
                })?;
                add_set(&mut path, ids, entity_type, &segment)?;
            }
            Some(PathElement::EntitySet(t)) => {
                return Err(QueryError::InvalidPath(format!(
                    "'{}' can not follow the set {} without an id",
                    segment.name,
                    t.set_name()
                )));
            }
            Some(PathElement::Entity { entity_type, .. }) => {
                if let Some(navigation) = NavigationProperty::from_name(segment.name)
                    .filter(|n| entity_type.has_navigation(*n))
                {
                    if navigation.is_set() {
                        add_set(&mut path, ids, navigation.target(), &segment)?;
                    } else {
                        no_id(&segment)?;
                        path.add_element(
                            PathElement::Entity {
                                entity_type: navigation.target(),
                                id: None,
                            },
                            true,
                            false,
                        );
                    }
                } else if let Some(property) = entity_property(entity_type, segment.name) {
                    no_id(&segment)?;
                    path.add_element(PathElement::Property(Property::Entity(property)), false, false);
                    add_indexes(&mut path, property, &segment)?;
                } else {
                    return Err(QueryError::InvalidPath(format!(
                        "{} has no property '{}'",
                        entity_type, segment.name
                    )));
                }
            }
            Some(PathElement::Property(_)) | Some(PathElement::CustomIndex(_)) => {
                no_id(&segment)?;
                let base = path
                    .elements()
                    .iter()
                    .rev()
                    .find_map(|e| match e {
                        PathElement::Property(Property::Entity(p)) => Some(*p),
                        _ => None,
                    })
                    .ok_or_else(|| QueryError::InvalidPath("custom segment without property".into()))?;
                if !base.allows_custom() {
                    return Err(QueryError::InvalidPath(format!(
                        "property {} has no sub-properties",
                        base
                    )));
                }
                path.add_element(
                    PathElement::Property(Property::Custom(segment.name.to_string())),
                    false,
                    false,
                );
                for index in &segment.indexes {
                    path.add_element(PathElement::CustomIndex(*index), false, false);
                }
            }
        }
    }
    path.compress();
    Ok(path)
}

fn add_set(path: &mut ResourcePath, ids: &dyn IdManager, entity_type: EntityType, segment: &Segment<'_>) -> Result<()> {
    if !segment.indexes.is_empty() {
        return Err(QueryError::InvalidPath(format!("index on entity set '{}'", segment.name)));
    }
    path.add_element(PathElement::EntitySet(entity_type), true, false);
    if let Some(id_text) = segment.id {
        let id = ids.parse(id_text)?;
        path.add_element(
            PathElement::Entity {
                entity_type,
                id: Some(id),
            },
            true,
            true,
        );
    }
    Ok(())
}

fn add_indexes(path: &mut ResourcePath, property: EntityProperty, segment: &Segment<'_>) -> Result<()> {
    if segment.indexes.is_empty() {
        return Ok(());
    }
    if !property.allows_custom() {
        return Err(QueryError::InvalidPath(format!("property {} can not be indexed", property)));
    }
    for index in &segment.indexes {
        path.add_element(PathElement::CustomIndex(*index), false, false);
    }
    Ok(())
}

fn no_id(segment: &Segment<'_>) -> Result<()> {
    match segment.id {
        Some(_) => Err(QueryError::InvalidPath(format!("'{}' does not take an id", segment.name))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Id, LongIdManager, StringIdManager};
    use proptest::prelude::*;

    fn parse(text: &str) -> Result<ResourcePath> {
        parse_path(&LongIdManager, "", text)
    }

    #[test]
    fn test_parse_navigation_chain() {
        let path = parse("/Things(1)/Datastreams").unwrap();
        assert_eq!(path.main_entity_type(), Some(EntityType::Datastream));
        assert!(path.identified_element().unwrap().is_identified_entity());
        assert_eq!(path.canonical_text(&LongIdManager), "/Things(1)/Datastreams");
    }

    #[test]
    fn test_parse_property_is_case_insensitive() {
        let path = parse("/Things(3)/Name").unwrap();
        assert_eq!(
            path.last(),
            Some(&PathElement::Property(Property::Entity(EntityProperty::Name)))
        );
        assert_eq!(path.canonical_text(&LongIdManager), "/Things(3)/name");
    }

    #[test]
    fn test_parse_custom_segments_and_value() {
        let path = parse("/Things(1)/properties/list[2]/$value").unwrap();
        assert!(path.is_value());
        assert_eq!(path.last(), Some(&PathElement::CustomIndex(2)));
        assert!(parse("/Things(1)/name/first").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(matches!(parse("Things"), Err(QueryError::InvalidPath(_))));
        assert!(parse("/Thingz").is_err());
        assert!(parse("/Things/Datastreams").is_err());
        assert!(parse("/Things(1)/Sensor").is_err());
        assert!(parse("/Things(x)").is_err());
        assert!(parse("/Observations(1)/Datastream(2)").is_err());
        assert!(parse("/Things(1)/$value").is_err());
        assert!(parse("/Things(1)/$ref/name").is_err());
        assert!(parse("/").unwrap().is_empty());
    }

    #[test]
    fn test_string_ids_may_contain_separators() {
        let path = parse_path(&StringIdManager, "", "/Things('a/b(c)')/Datastreams").unwrap();
        assert_eq!(
            path.identified_element(),
            Some(&PathElement::Entity {
                entity_type: EntityType::Thing,
                id: Some(Id::String("a/b(c)".into()))
            })
        );
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("Things%281%29").unwrap(), "Things(1)");
        assert_eq!(percent_decode("a+b").unwrap(), "a+b");
        assert!(percent_decode("%zz").is_err());
        assert!(percent_decode("%e2%28").is_err());
    }

    fn canonical_path() -> impl Strategy<Value = String> {
        let head = prop_oneof![
            Just("/Things({})/Datastreams({})/Observations"),
            Just("/Datastreams({})/Observations({})/FeatureOfInterest"),
            Just("/Locations({})/HistoricalLocations({})/Thing/properties/x"),
            Just("/Observations({})/Datastream/Sensor/name"),
            Just("/Things({})/Locations({})/$ref"),
            Just("/Things({})/properties/list[0]/$value"),
        ];
        (head, 0i64..10_000, 0i64..10_000)
            .prop_map(|(template, a, b)| template.replacen("{}", &a.to_string(), 1).replacen("{}", &b.to_string(), 1))
    }

    proptest! {
        #[test]
        fn test_canonical_text_roundtrips(text in canonical_path()) {
            let path = parse(&text).unwrap();
            let canonical = path.canonical_text(&LongIdManager);
            let mut again = parse(&canonical).unwrap();
            again.compress();
            prop_assert_eq!(again.canonical_text(&LongIdManager), canonical);
        }
    }
}
