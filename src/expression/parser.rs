//! Token-level parser for filter expressions and order-by lists.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons,
//! `add`/`sub`, `mul`/`div`/`mod`. All binary operators are left
//! associative.

use super::lexer::{lexer, Token};
use super::query::{Direction, OrderBy};
use super::{Constant, Expression, Function, FunctionKind};
use crate::error::{QueryError, Result};
use crate::geo::Geometry;
use crate::model::Property;
use crate::time::parse_duration;
use chrono::{DateTime, NaiveDate, NaiveTime};
use chumsky::error::SimpleReason;
use chumsky::prelude::*;
use chumsky::Stream;
use rust_decimal::Decimal;
use std::str::FromStr;

type Table = &'static [(&'static str, FunctionKind)];

const MULTIPLICATIVE: Table = &[
    ("mul", FunctionKind::Mul),
    ("div", FunctionKind::Div),
    ("mod", FunctionKind::Mod),
];
const ADDITIVE: Table = &[("add", FunctionKind::Add), ("sub", FunctionKind::Sub)];
const COMPARISON: Table = &[
    ("eq", FunctionKind::Eq),
    ("ne", FunctionKind::Ne),
    ("gt", FunctionKind::Gt),
    ("ge", FunctionKind::Ge),
    ("lt", FunctionKind::Lt),
    ("le", FunctionKind::Le),
];

/// Words that never start a property path.
const RESERVED: &[&str] = &[
    "and", "or", "not", "eq", "ne", "gt", "ge", "lt", "le", "add", "sub", "mul", "div", "mod",
    "asc", "desc", "true", "false",
];

/// Parse a `$filter` value.
pub fn parse_filter(text: &str) -> Result<Expression> {
    let tokens = tokenize(text)?;
    let len = text.len();
    expression()
        .then_ignore(end())
        .parse(Stream::from_iter(len..len + 1, tokens.into_iter()))
        .map_err(|errors| QueryError::parse(text, describe(&errors)))
}

/// Parse an `$orderby` value: comma separated expressions with an optional
/// `asc`/`desc`.
pub fn parse_order_by(text: &str) -> Result<Vec<OrderBy>> {
    let tokens = tokenize(text)?;
    let len = text.len();
    let direction = choice((
        keyword("asc").to(Direction::Ascending),
        keyword("desc").to(Direction::Descending),
    ));
    expression()
        .then(direction.or_not())
        .map(|(expression, direction)| OrderBy {
            expression,
            direction: direction.unwrap_or_default(),
        })
        .separated_by(just(Token::Comma))
        .at_least(1)
        .then_ignore(end())
        .parse(Stream::from_iter(len..len + 1, tokens.into_iter()))
        .map_err(|errors| QueryError::parse(text, describe(&errors)))
}

fn tokenize(text: &str) -> Result<Vec<(Token, super::Span)>> {
    lexer().parse(text).map_err(|errors| {
        let message = errors
            .iter()
            .map(|e| match e.found() {
                Some(c) => format!("unexpected character '{}' at {}", c, e.span().start),
                None => "unexpected end of input".to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        QueryError::parse(text, message)
    })
}

fn describe(errors: &[Simple<Token>]) -> String {
    errors
        .iter()
        .map(|error| {
            if let SimpleReason::Custom(message) = error.reason() {
                return message.clone();
            }
            let found = error
                .found()
                .map(|t| format!("'{}'", t))
                .unwrap_or_else(|| "end of input".to_string());
            let expected: Vec<String> = error
                .expected()
                .filter_map(|t| t.as_ref().map(|t| format!("'{}'", t)))
                .collect();
            if expected.is_empty() {
                format!("unexpected {}", found)
            } else {
                format!("unexpected {}, expected one of: {}", found, expected.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn keyword(word: &'static str) -> impl Parser<Token, Token, Error = Simple<Token>> + Clone {
    just(Token::Ident(word.to_string()))
}

fn operator(table: Table) -> impl Parser<Token, FunctionKind, Error = Simple<Token>> + Clone {
    filter_map(move |span, token: Token| {
        let kind = match &token {
            Token::Ident(word) => table
                .iter()
                .find(|(name, _)| name == word)
                .map(|(_, kind)| *kind),
            _ => None,
        };
        kind.ok_or_else(|| Simple::<Token>::custom(span, format!("unexpected '{}'", token)))
    })
}

fn expression() -> impl Parser<Token, Expression, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let constant = filter_map(|span, token: Token| {
            let constant = match token {
                Token::Literal(text) => literal(&text),
                Token::Str(text) => Ok(Constant::String(text)),
                Token::Typed(prefix, text) => typed(&prefix, &text),
                Token::Ident(word) if word == "true" => Ok(Constant::Boolean(true)),
                Token::Ident(word) if word == "false" => Ok(Constant::Boolean(false)),
                other => Err(format!("unexpected '{}'", other)),
            };
            constant
                .map(Expression::Constant)
                .map_err(|message| Simple::<Token>::custom(span, message))
        });

        let call = select! { Token::Ident(name) => name }
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .try_map(|(name, args), span: std::ops::Range<usize>| {
                let kind = FunctionKind::from_name(&name)
                    .ok_or_else(|| Simple::<Token>::custom(span.clone(), format!("unknown function '{}'", name)))?;
                Function::new(kind, args)
                    .map(Expression::Function)
                    .map_err(|e| Simple::<Token>::custom(span, e.to_string()))
            });

        let segment = filter_map(|span, token: Token| match token {
            Token::Ident(word) if !RESERVED.contains(&word.as_str()) => Ok(word),
            other => Err(Simple::<Token>::custom(span, format!("unexpected '{}'", other))),
        });
        let path = segment
            .clone()
            .then(just(Token::Slash).ignore_then(segment).repeated())
            .try_map(|(first, rest), span| {
                let segments = std::iter::once(first).chain(rest).collect();
                property_path(segments)
                    .map(Expression::Path)
                    .map_err(|message| Simple::<Token>::custom(span, message))
            });

        let atom = choice((
            constant,
            call,
            path,
            expr.clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        ))
        .boxed();

        let product = atom
            .clone()
            .then(operator(MULTIPLICATIVE).then(atom).repeated())
            .foldl(|l, (kind, r)| Expression::binary(kind, l, r))
            .boxed();
        let sum = product
            .clone()
            .then(operator(ADDITIVE).then(product).repeated())
            .foldl(|l, (kind, r)| Expression::binary(kind, l, r))
            .boxed();
        let comparison = sum
            .clone()
            .then(operator(COMPARISON).then(sum).repeated())
            .foldl(|l, (kind, r)| Expression::binary(kind, l, r))
            .boxed();
        let negation = keyword("not")
            .repeated()
            .then(comparison)
            .foldr(|_, e| Expression::negate(e))
            .boxed();
        let conjunction = negation
            .clone()
            .then(operator(&[("and", FunctionKind::And)]).then(negation).repeated())
            .foldl(|l, (kind, r)| Expression::binary(kind, l, r))
            .boxed();
        conjunction
            .clone()
            .then(operator(&[("or", FunctionKind::Or)]).then(conjunction).repeated())
            .foldl(|l, (kind, r)| Expression::binary(kind, l, r))
    })
}

/// Resolve path segments. Everything after an entity property is a
/// document key.
fn property_path(segments: Vec<String>) -> std::result::Result<Vec<Property>, String> {
    let mut properties = Vec::with_capacity(segments.len());
    let mut in_document = false;
    for segment in segments {
        if in_document {
            properties.push(Property::Custom(segment));
            continue;
        }
        match Property::from_name(&segment) {
            Some(property @ Property::Entity(_)) => {
                in_document = true;
                properties.push(property);
            }
            Some(property) => properties.push(property),
            None => return Err(format!("unknown property '{}'", segment)),
        }
    }
    Ok(properties)
}

fn literal(text: &str) -> std::result::Result<Constant, String> {
    let bad = |what: &str| format!("invalid {} literal '{}'", what, text);
    if let Some((start, end)) = text.split_once('/') {
        let start = DateTime::parse_from_rfc3339(start).map_err(|_| bad("interval"))?;
        let end = DateTime::parse_from_rfc3339(end).map_err(|_| bad("interval"))?;
        return Ok(Constant::Interval(start, end));
    }
    if text.contains('T') {
        return DateTime::parse_from_rfc3339(text)
            .map(Constant::DateTime)
            .map_err(|_| bad("datetime"));
    }
    if text.contains(':') {
        return NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
            .map(Constant::TimeOfDay)
            .map_err(|_| bad("time"));
    }
    let year_prefix = text.get(..4).map_or(false, |y| y.bytes().all(|b| b.is_ascii_digit()));
    if year_prefix && text.as_bytes().get(4) == Some(&b'-') {
        return NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Constant::Date)
            .map_err(|_| bad("date"));
    }
    number(text).ok_or_else(|| bad("number"))
}

fn number(text: &str) -> Option<Constant> {
    let (body, suffix) = match text.chars().last() {
        Some(c) if c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E' | 'T' | 'Z') => {
            (&text[..text.len() - 1], Some(c.to_ascii_lowercase()))
        }
        _ => (text, None),
    };
    let decimal = |s: &str| {
        Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok()
    };
    match suffix {
        Some('m') => decimal(body).map(Constant::Decimal),
        Some('d') | Some('f') => body.parse().ok().map(Constant::Double),
        Some('l') => body.parse().ok().map(Constant::Integer),
        Some(_) => None,
        None if body.contains(|c| matches!(c, '.' | 'e' | 'E')) => {
            body.parse().ok().map(Constant::Double)
        }
        // Integers too wide for i64 stay exact.
        None => body
            .parse()
            .ok()
            .map(Constant::Integer)
            .or_else(|| decimal(body).map(Constant::Decimal)),
    }
}

fn typed(prefix: &str, text: &str) -> std::result::Result<Constant, String> {
    match prefix.to_ascii_lowercase().as_str() {
        "duration" => parse_duration(text)
            .map(Constant::Duration)
            .map_err(|e| e.to_string()),
        "geography" | "geometry" => Geometry::from_wkt(text)
            .map(Constant::Geometry)
            .map_err(|e| e.to_string()),
        _ => Err(format!("unknown literal type '{}'", prefix)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityProperty, NavigationProperty};
    use chrono::Duration;

    fn path(names: &[&str]) -> Expression {
        Expression::Path(property_path(names.iter().map(|s| s.to_string()).collect()).unwrap())
    }

    fn int(v: i64) -> Expression {
        Expression::Constant(Constant::Integer(v))
    }

    #[test]
    fn test_precedence() {
        let parsed = parse_filter("result add 2 mul 3 gt 10 and not name eq 'x' or id eq 1").unwrap();
        let left = Expression::binary(
            FunctionKind::And,
            Expression::binary(
                FunctionKind::Gt,
                Expression::binary(
                    FunctionKind::Add,
                    path(&["result"]),
                    Expression::binary(FunctionKind::Mul, int(2), int(3)),
                ),
                int(10),
            ),
            Expression::negate(Expression::binary(
                FunctionKind::Eq,
                path(&["name"]),
                Expression::Constant(Constant::String("x".into())),
            )),
        );
        let expected = Expression::binary(
            FunctionKind::Or,
            left,
            Expression::binary(FunctionKind::Eq, path(&["id"]), int(1)),
        );
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_paths_switch_to_document_keys_after_entity_property() {
        let parsed = parse_filter("Datastream/Thing/properties/Datastream eq 1").unwrap();
        let Expression::Function(f) = parsed else { panic!("expected function") };
        assert_eq!(
            f.args()[0],
            Expression::Path(vec![
                Property::Navigation(NavigationProperty::Datastream),
                Property::Navigation(NavigationProperty::Thing),
                Property::Entity(EntityProperty::Properties),
                Property::Custom("Datastream".into()),
            ])
        );
    }

    #[test]
    fn test_literals() {
        let cases = [
            ("5", Constant::Integer(5)),
            ("-5", Constant::Integer(-5)),
            ("2.5", Constant::Double(2.5)),
            ("1e3", Constant::Double(1000.0)),
            ("1.5e-1", Constant::Double(0.15)),
            ("2.5M", Constant::Decimal(Decimal::new(25, 1))),
            ("true", Constant::Boolean(true)),
            ("2020-02-03", Constant::Date(NaiveDate::from_ymd_opt(2020, 2, 3).unwrap())),
            ("10:30:00", Constant::TimeOfDay(NaiveTime::from_hms_opt(10, 30, 0).unwrap())),
            ("duration'PT1H'", Constant::Duration(Duration::hours(1))),
        ];
        for (text, expected) in cases {
            assert_eq!(
                parse_filter(text).unwrap(),
                Expression::Constant(expected),
                "literal {}",
                text
            );
        }
        let Expression::Constant(Constant::Interval(start, end)) =
            parse_filter("2020-01-01T00:00:00Z/2020-01-02T00:00:00+02:00").unwrap()
        else {
            panic!("expected interval")
        };
        assert!(start < end);
    }

    #[test]
    fn test_function_calls() {
        let parsed = parse_filter("substring(name, 1, 2) eq 'ab'").unwrap();
        let Expression::Function(cmp) = parsed else { panic!("expected function") };
        let Expression::Function(sub) = &cmp.args()[0] else { panic!("expected call") };
        assert_eq!(sub.kind(), FunctionKind::Substring);
        assert_eq!(sub.args().len(), 3);

        let parsed =
            parse_filter("geo.intersects(location, geography'POINT (1 2)')").unwrap();
        let Expression::Function(geo) = parsed else { panic!("expected function") };
        assert_eq!(geo.kind(), FunctionKind::GeoIntersects);
        assert!(parse_filter("now() gt phenomenonTime").is_ok());
    }

    #[test]
    fn test_errors() {
        for bad in [
            "",
            "name eq",
            "length(name, 2) eq 1",
            "nosuch eq 1",
            "frobnicate(name) eq 1",
            "name eq 'unterminated",
            "2020-13-45 eq name",
            "(name eq 'a'",
        ] {
            let err = parse_filter(bad).unwrap_err();
            assert!(matches!(err, QueryError::Parse { .. }), "{} -> {:?}", bad, err);
        }
    }

    #[test]
    fn test_order_by() {
        let order = parse_order_by("result desc, phenomenonTime, id asc").unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].direction, Direction::Descending);
        assert_eq!(order[1].direction, Direction::Ascending);
        assert_eq!(order[2].expression, path(&["id"]));
        assert!(parse_order_by("result sideways").is_err());
    }
}
