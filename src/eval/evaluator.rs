//! Filter evaluation against entity snapshots.

use super::value::{Number, NumericOp, Rounding, Value};
use crate::error::{QueryError, Result};
use crate::expression::{Constant, Expression, Function, FunctionKind};
use crate::geo::Geometry;
use crate::model::{
    Entity, EntityAccess, EntityProperty, EntityType, FieldValue, NavigationProperty, Property,
    Storage, KEY_BOOLEAN, KEY_END, KEY_GEOMETRY, KEY_JSON, KEY_NUMBER, KEY_START, KEY_STRING,
    KEY_UOM_DEFINITION, KEY_UOM_NAME, KEY_UOM_SYMBOL,
};
use crate::resolve::{
    check_time_operands, document_keys, plan_arithmetic_operands, plan_comparison, plan_modulo,
    shape_property, ArithmeticPlan, Category, Compiled, ComparisonPlan, Composite, Operand,
};
use crate::time::{max_datetime, min_datetime, relate, Plan, Relation, Span, TimeAlgebra};
use crate::types::{Id, IdManager, Kind};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use tracing::trace;

type Prefix = Vec<NavigationProperty>;

/// Three-valued comparisons over any ordered point type.
struct ThreeValued<T>(PhantomData<T>);

impl<T> ThreeValued<T> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: Ord + Clone> TimeAlgebra for ThreeValued<T> {
    type Instant = Option<T>;
    type Truth = Option<bool>;

    fn lt(&self, a: &Option<T>, b: &Option<T>) -> Option<bool> {
        Some(a.as_ref()? < b.as_ref()?)
    }

    fn le(&self, a: &Option<T>, b: &Option<T>) -> Option<bool> {
        Some(a.as_ref()? <= b.as_ref()?)
    }

    fn eq(&self, a: &Option<T>, b: &Option<T>) -> Option<bool> {
        Some(a.as_ref()? == b.as_ref()?)
    }

    fn and(&self, a: Option<bool>, b: Option<bool>) -> Option<bool> {
        and3(a, b)
    }

    fn or(&self, a: Option<bool>, b: Option<bool>) -> Option<bool> {
        or3(a, b)
    }

    fn not(&self, a: Option<bool>) -> Option<bool> {
        a.map(|v| !v)
    }
}

fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn conversion(from: Kind, to: impl ToString) -> QueryError {
    QueryError::Conversion {
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn instant_span(value: Value) -> Result<Span<Option<DateTime<Utc>>>> {
    match value {
        Value::Instant { at, .. } => Ok(Span::instant(at)),
        Value::Interval { start, end } => Ok(Span::interval(start, end)),
        other => Err(conversion(other.kind(), "Instant")),
    }
}

fn relate_values(relation: Relation, left: Value, right: Value) -> Result<Option<bool>> {
    check_time_operands(relation, &left, &right)?;
    match (left, right) {
        (Value::Duration(a), Value::Duration(b)) => relate(
            &ThreeValued::new(),
            relation,
            &Span::instant(a),
            &Span::instant(b),
        ),
        (left, right) => relate(
            &ThreeValued::new(),
            relation,
            &instant_span(left)?,
            &instant_span(right)?,
        ),
    }
}

/// An instant, or the start of an interval.
fn instant_of(value: Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Instant { at, .. } => Ok(at),
        Value::Interval { start, .. } => Ok(start),
        other => Err(conversion(other.kind(), "Instant")),
    }
}

fn number_of(value: Value) -> Result<Option<Number>> {
    match value {
        Value::Number { value, .. } => Ok(value),
        other => Err(conversion(other.kind(), Kind::Number)),
    }
}

fn string_of(value: Value) -> Result<Option<String>> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(conversion(other.kind(), Kind::String)),
    }
}

fn geometry_of(value: Value) -> Result<Option<Geometry>> {
    match value {
        Value::Geometry(g) => Ok(g),
        other => Err(conversion(other.kind(), Kind::Geometry)),
    }
}

fn truth_of(value: Value) -> Result<Option<bool>> {
    match value {
        Value::Boolean(b) => Ok(b),
        other => Err(conversion(other.kind(), Kind::Boolean)),
    }
}

/// Characters of `s` from 1-based position `from`, at most `count` of
/// them; positions before the first character still use up the count.
fn substr(s: &str, from: i64, count: Option<i64>) -> Result<String> {
    let end = match count {
        Some(c) if c < 0 => {
            return Err(QueryError::InvalidArgument(
                "negative substring length not allowed".to_string(),
            ))
        }
        Some(c) => from.saturating_add(c),
        None => i64::MAX,
    };
    let start = from.max(1);
    if end <= start {
        return Ok(String::new());
    }
    let skip = usize::try_from(start - 1).unwrap_or(usize::MAX);
    let take = usize::try_from(end - start).unwrap_or(usize::MAX);
    Ok(s.chars().skip(skip).take(take).collect())
}

/// 1-based character position of `needle` in `haystack`, 0 when absent.
fn strpos(haystack: &str, needle: &str) -> i64 {
    match haystack.find(needle) {
        Some(byte) => haystack[..byte].chars().count() as i64 + 1,
        None => 0,
    }
}

fn date_part(at: DateTime<Utc>, part: DatePart) -> Number {
    let whole = |v: i64| Number::Decimal(Decimal::from(v));
    match part {
        DatePart::Year => whole(i64::from(at.year())),
        DatePart::Month => whole(i64::from(at.month())),
        DatePart::Day => whole(i64::from(at.day())),
        DatePart::Hour => whole(i64::from(at.hour())),
        DatePart::Minute => whole(i64::from(at.minute())),
        DatePart::Second => whole(i64::from(at.second())),
        DatePart::FractionalSeconds => {
            let micros = i64::from(at.nanosecond() / 1_000 % 1_000_000);
            Number::Decimal(Decimal::new(micros, 6))
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    FractionalSeconds,
}

fn scale_duration(duration: Duration, factor: Number, divide: bool) -> Result<Duration> {
    let micros = duration
        .num_microseconds()
        .ok_or_else(|| QueryError::InvalidArgument("interval out of range".to_string()))?;
    let factor = factor.to_f64();
    if divide && factor == 0.0 {
        return Err(QueryError::InvalidArgument("division by zero".to_string()));
    }
    let scaled = if divide {
        micros as f64 / factor
    } else {
        micros as f64 * factor
    };
    if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
        return Err(QueryError::InvalidArgument("interval out of range".to_string()));
    }
    Ok(Duration::microseconds(scaled.round() as i64))
}

fn checked(result: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
    result.ok_or_else(|| QueryError::InvalidArgument("timestamp out of range".to_string()))
}

fn shift(at: Option<DateTime<Utc>>, by: Option<Duration>, negate: bool) -> Result<Option<DateTime<Utc>>> {
    match (at, by) {
        (Some(at), Some(by)) => {
            let moved = if negate {
                at.checked_sub_signed(by)
            } else {
                at.checked_add_signed(by)
            };
            checked(moved).map(Some)
        }
        _ => Ok(None),
    }
}

fn arithmetic(plan: ArithmeticPlan<Value>, op: NumericOp) -> Result<Value> {
    match plan {
        ArithmeticPlan::Numeric { left, right } => {
            let value = match (number_of(left)?, number_of(right)?) {
                (Some(a), Some(b)) => Some(a.apply(op, b)?),
                _ => None,
            };
            Ok(Value::number(value))
        }
        ArithmeticPlan::Time { plan, left, right } => match plan {
            Plan::Shift {
                time_on_left,
                negate,
                ..
            } => {
                let (time, duration) = if time_on_left { (left, right) } else { (right, left) };
                let Value::Duration(by) = duration else {
                    return Err(conversion(duration.kind(), "Duration"));
                };
                match time {
                    Value::Interval { start, end } => Ok(Value::Interval {
                        start: shift(start, by, negate)?,
                        end: shift(end, by, negate)?,
                    }),
                    other => Ok(Value::instant(shift(instant_of(other)?, by, negate)?)),
                }
            }
            Plan::Elapsed => {
                let elapsed = match (instant_of(left)?, instant_of(right)?) {
                    (Some(a), Some(b)) => Some(a.signed_duration_since(b)),
                    _ => None,
                };
                Ok(Value::Duration(elapsed))
            }
            Plan::Combine { negate } => {
                let (Value::Duration(a), Value::Duration(b)) = (left, right) else {
                    return Err(QueryError::Unsupported("duration arithmetic".to_string()));
                };
                let combined = match (a, b) {
                    (Some(a), Some(b)) => {
                        let sum = if negate { a.checked_sub(&b) } else { a.checked_add(&b) };
                        Some(sum.ok_or_else(|| {
                            QueryError::InvalidArgument("interval out of range".to_string())
                        })?)
                    }
                    _ => None,
                };
                Ok(Value::Duration(combined))
            }
            Plan::Scale {
                duration_on_left,
                divide,
            } => {
                let (duration, factor) = if duration_on_left { (left, right) } else { (right, left) };
                let Value::Duration(d) = duration else {
                    return Err(conversion(duration.kind(), "Duration"));
                };
                let scaled = match (d, number_of(factor)?) {
                    (Some(d), Some(f)) => Some(scale_duration(d, f, divide)?),
                    _ => None,
                };
                Ok(Value::Duration(scaled))
            }
        },
    }
}

fn compare(relation: Relation, left: &Compiled<Value>, right: &Compiled<Value>) -> Result<Option<bool>> {
    match plan_comparison(relation, left, right)? {
        ComparisonPlan::Time {
            relation,
            left,
            right,
        } => relate_values(relation, left, right),
        ComparisonPlan::Ordered {
            relation,
            left,
            right,
            ..
        } => Ok(left.compare(&right)?.map(|ordering| match relation {
            Relation::Ne => ordering.is_ne(),
            Relation::Gt => ordering.is_gt(),
            Relation::Ge => ordering.is_ge(),
            Relation::Lt => ordering.is_lt(),
            Relation::Le => ordering.is_le(),
            _ => ordering.is_eq(),
        })),
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Boolean(b) => Value::Boolean(Some(*b)),
        Constant::Integer(v) => Value::number(Some(Number::Int(*v))),
        Constant::Double(v) => Value::number(Some(Number::Float(*v))),
        Constant::Decimal(v) => Value::number(Some(Number::Decimal(*v))),
        Constant::String(s) => Value::String(Some(s.clone())),
        Constant::DateTime(t) => Value::Instant {
            at: Some(t.with_timezone(&Utc)),
            offset_minutes: Some(t.offset().local_minus_utc() / 60),
        },
        Constant::Date(d) => Value::Date(Some(*d)),
        Constant::TimeOfDay(t) => Value::TimeOfDay(Some(*t)),
        Constant::Duration(d) => Value::Duration(Some(*d)),
        Constant::Interval(a, b) => Value::Interval {
            start: Some(a.with_timezone(&Utc)),
            end: Some(b.with_timezone(&Utc)),
        },
        Constant::Geometry(g) => Value::Geometry(Some(g.clone())),
    }
}

/// Related entities reached through one navigation property.
fn related(value: FieldValue) -> Vec<Entity> {
    match value {
        FieldValue::Entity(entity) => vec![*entity],
        FieldValue::EntitySet(entities) => entities,
        _ => Vec::new(),
    }
}

/// Navigation prefixes a path binds, excluding a to-one navigation read
/// only for its id.
fn collect_prefixes(expression: &Expression, out: &mut BTreeSet<Prefix>) {
    match expression {
        Expression::Constant(_) => {}
        Expression::Function(function) => {
            for arg in function.args() {
                collect_prefixes(arg, out);
            }
        }
        Expression::Path(properties) => {
            let mut prefix = Vec::new();
            for (i, property) in properties.iter().enumerate() {
                let Property::Navigation(navigation) = property else {
                    break;
                };
                if reads_foreign_key(*navigation, &properties[i + 1..]) {
                    break;
                }
                prefix.push(*navigation);
                out.insert(prefix.clone());
            }
        }
    }
}

fn reads_foreign_key(navigation: NavigationProperty, rest: &[Property]) -> bool {
    !navigation.is_set() && matches!(rest, [Property::Entity(EntityProperty::Id)])
}

/// One combination of related entities, keyed by navigation prefix.
struct Binding<'a> {
    root: &'a dyn EntityAccess,
    related: HashMap<Prefix, Entity>,
}

impl Binding<'_> {
    fn entity(&self, prefix: &[NavigationProperty]) -> Option<&dyn EntityAccess> {
        if prefix.is_empty() {
            Some(self.root)
        } else {
            self.related.get(prefix).map(|e| e as &dyn EntityAccess)
        }
    }
}

/// Evaluates expressions against entity snapshots with the same typing
/// as the relational compiler.
pub struct Evaluator<'a> {
    ids: &'a dyn IdManager,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ids: &'a dyn IdManager) -> Self {
        Self::at(ids, Utc::now())
    }

    /// An evaluator whose `now()` is fixed.
    pub fn at(ids: &'a dyn IdManager, now: DateTime<Utc>) -> Self {
        Self { ids, now }
    }

    /// Whether `filter` holds for `entity`.
    ///
    /// Every navigation prefix used by the filter binds one related entity;
    /// the entity matches when any combination of bindings evaluates to
    /// true. NULL counts as false.
    pub fn matches(&self, filter: &Expression, entity: &dyn EntityAccess) -> Result<bool> {
        let mut prefixes = BTreeSet::new();
        collect_prefixes(filter, &mut prefixes);
        let bindings = self.bindings(entity, &prefixes);
        if bindings.is_empty() {
            // Type the filter even when no combination exists.
            let unbound = Binding {
                root: entity,
                related: HashMap::new(),
            };
            self.truth(filter, &unbound)?;
            return Ok(false);
        }
        for binding in &bindings {
            if self.truth(filter, binding)? == Some(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Evaluate an expression against `entity` alone; navigation paths
    /// read their first related entity.
    pub fn evaluate(&self, expression: &Expression, entity: &dyn EntityAccess) -> Result<Compiled<Value>> {
        let mut prefixes = BTreeSet::new();
        collect_prefixes(expression, &mut prefixes);
        let binding = self
            .bindings(entity, &prefixes)
            .into_iter()
            .next()
            .unwrap_or(Binding {
                root: entity,
                related: HashMap::new(),
            });
        self.eval(expression, &binding)
    }

    fn truth(&self, filter: &Expression, binding: &Binding<'_>) -> Result<Option<bool>> {
        truth_of(self.eval(filter, binding)?.resolve_as(Category::Boolean)?)
    }

    fn bindings<'e>(&self, root: &'e dyn EntityAccess, prefixes: &BTreeSet<Prefix>) -> Vec<Binding<'e>> {
        let mut partial: Vec<HashMap<Prefix, Entity>> = vec![HashMap::new()];
        for prefix in prefixes {
            let Some((navigation, parent)) = prefix.split_last() else {
                continue;
            };
            let mut next = Vec::new();
            for bound in partial {
                let from: Option<&dyn EntityAccess> = if parent.is_empty() {
                    Some(root)
                } else {
                    bound.get(parent).map(|e| e as &dyn EntityAccess)
                };
                let targets = from
                    .map(|e| related(e.get(&Property::Navigation(*navigation))))
                    .unwrap_or_default();
                for target in targets {
                    let mut extended = bound.clone();
                    extended.insert(prefix.clone(), target);
                    next.push(extended);
                }
            }
            partial = next;
        }
        partial
            .into_iter()
            .map(|related| Binding { root, related })
            .collect()
    }

    fn eval(&self, expression: &Expression, binding: &Binding<'_>) -> Result<Compiled<Value>> {
        match expression {
            Expression::Constant(c) => Ok(Compiled::Scalar(constant_value(c))),
            Expression::Path(properties) => self.eval_path(properties, binding),
            Expression::Function(function) => self.eval_function(function, binding).map(Compiled::Scalar),
        }
    }

    fn id_value(&self, id: Option<Id>) -> Result<Value> {
        match (self.ids.kind(), id) {
            (Kind::Number, Some(Id::Long(v))) => Ok(Value::Number {
                value: Some(Number::Int(v)),
                column: true,
            }),
            (Kind::Number, None) => Ok(Value::Number {
                value: None,
                column: true,
            }),
            (_, Some(Id::String(s))) => Ok(Value::String(Some(s))),
            (_, None) => Ok(Value::String(None)),
            (kind, Some(id)) => Err(QueryError::InvalidId(format!("{:?} is not a {} id", id, kind))),
        }
    }

    /// Read one stored column.
    fn stored(&self, value: FieldValue, storage: Storage) -> Result<Value> {
        let mismatch = |value: &FieldValue| {
            QueryError::InvalidArgument(format!("{:?} can not be stored as {:?}", value, storage))
        };
        Ok(match (storage, value) {
            (Storage::Id, FieldValue::Id(id)) => self.id_value(Some(id))?,
            (Storage::Id, FieldValue::Long(v)) => self.id_value(Some(Id::Long(v)))?,
            (Storage::Id, FieldValue::String(s)) => self.id_value(Some(Id::String(s)))?,
            (Storage::Id, FieldValue::Null) => self.id_value(None)?,
            // Number columns hold double precision values.
            (Storage::Number, FieldValue::Long(v)) => stored_number(v as f64),
            (Storage::Number, FieldValue::Double(v)) => stored_number(v),
            (Storage::Number, FieldValue::Decimal(d)) => stored_number(Number::Decimal(d).to_f64()),
            (Storage::Number, FieldValue::Null) => Value::Number {
                value: None,
                column: true,
            },
            (Storage::String, FieldValue::String(s)) => Value::String(Some(s)),
            (Storage::String, FieldValue::Null) => Value::String(None),
            (Storage::Boolean, FieldValue::Bool(b)) => Value::Boolean(Some(b)),
            (Storage::Boolean, FieldValue::Null) => Value::Boolean(None),
            (Storage::Json, FieldValue::Null) => Value::Json(None),
            (Storage::Json, other) => Value::Json(Some(other.to_json())),
            (Storage::Geometry, FieldValue::Geometry(g)) => Value::Geometry(Some(g)),
            (Storage::Geometry, FieldValue::Json(JsonValue::Null)) => Value::Geometry(None),
            (Storage::Geometry, FieldValue::Json(v)) => {
                let geometry = Geometry::from_geojson(&v).map_err(|e| {
                    trace!(error = %e, "location is not a GeoJSON geometry");
                    conversion(Kind::Json, Kind::Geometry)
                })?;
                Value::Geometry(Some(geometry))
            }
            (Storage::Geometry, FieldValue::Null) => Value::Geometry(None),
            (Storage::Instant, FieldValue::Instant(t)) => Value::instant(Some(t)),
            (Storage::Instant, FieldValue::Null) => Value::instant(None),
            (_, other) => return Err(mismatch(&other)),
        })
    }

    /// Split a property value into its sub-field columns.
    fn columns(&self, entity_type: EntityType, property: EntityProperty, value: FieldValue) -> Result<Composite<Value>> {
        let subs = property.sub_fields(entity_type);
        let mut columns = Composite::new();
        if let [only] = subs {
            columns.insert(only.key, self.stored(value, only.storage)?);
            return Ok(columns);
        }
        for sub in subs {
            let part = match (sub.key, &value) {
                (KEY_START, FieldValue::Interval { start, .. }) => FieldValue::Instant(*start),
                (KEY_END, FieldValue::Interval { end, .. }) => FieldValue::Instant(*end),
                (KEY_START | KEY_END, FieldValue::Instant(t)) => FieldValue::Instant(*t),
                (KEY_NUMBER, FieldValue::Long(_) | FieldValue::Double(_) | FieldValue::Decimal(_)) => {
                    value.clone()
                }
                (KEY_NUMBER, FieldValue::Json(JsonValue::Number(n))) => n
                    .as_f64()
                    .map(FieldValue::Double)
                    .unwrap_or(FieldValue::Null),
                (KEY_BOOLEAN, FieldValue::Bool(_)) => value.clone(),
                (KEY_BOOLEAN, FieldValue::Json(JsonValue::Bool(b))) => FieldValue::Bool(*b),
                (KEY_STRING, FieldValue::String(_)) => value.clone(),
                (KEY_STRING, FieldValue::Json(JsonValue::String(s))) => FieldValue::String(s.clone()),
                (KEY_JSON, FieldValue::Json(v)) if property == EntityProperty::Result => match v {
                    JsonValue::Object(_) | JsonValue::Array(_) => value.clone(),
                    _ => FieldValue::Null,
                },
                (KEY_JSON, FieldValue::Json(_)) => value.clone(),
                (KEY_JSON, FieldValue::Geometry(g)) => FieldValue::Json(g.to_geojson()),
                (KEY_GEOMETRY, FieldValue::Geometry(_) | FieldValue::Json(_)) => value.clone(),
                (
                    key @ (KEY_UOM_NAME | KEY_UOM_SYMBOL | KEY_UOM_DEFINITION),
                    FieldValue::Json(JsonValue::Object(map)),
                ) => map
                    .get(key)
                    .and_then(JsonValue::as_str)
                    .map(|s| FieldValue::String(s.to_string()))
                    .unwrap_or(FieldValue::Null),
                _ => FieldValue::Null,
            };
            columns.insert(sub.key, self.stored(part, sub.storage)?);
        }
        Ok(columns)
    }

    fn eval_path(&self, properties: &[Property], binding: &Binding<'_>) -> Result<Compiled<Value>> {
        let mut entity_type = binding.root.entity_type();
        let mut prefix: Prefix = Vec::new();
        for (i, property) in properties.iter().enumerate() {
            match property {
                Property::Navigation(navigation) => {
                    if !entity_type.has_navigation(*navigation) {
                        return Err(QueryError::InvalidPropertyPath(format!(
                            "{} has no navigation property {}",
                            entity_type, navigation
                        )));
                    }
                    if reads_foreign_key(*navigation, &properties[i + 1..]) {
                        let id = binding
                            .entity(&prefix)
                            .and_then(|e| match e.get(property) {
                                FieldValue::Entity(target) => target.id(),
                                _ => None,
                            });
                        return self.id_value(id).map(Compiled::Scalar);
                    }
                    prefix.push(*navigation);
                    entity_type = navigation.target();
                }
                Property::Entity(p) => {
                    return self.eval_property(binding.entity(&prefix), entity_type, *p, &properties[i + 1..])
                }
                Property::Custom(name) => {
                    return Err(QueryError::InvalidPropertyPath(format!(
                        "'{}' must follow an entity property",
                        name
                    )))
                }
            }
        }
        Err(QueryError::InvalidPropertyPath(
            "path must end in an entity property".to_string(),
        ))
    }

    fn eval_property(
        &self,
        entity: Option<&dyn EntityAccess>,
        entity_type: EntityType,
        property: EntityProperty,
        rest: &[Property],
    ) -> Result<Compiled<Value>> {
        if !entity_type.has_property(property) {
            return Err(QueryError::InvalidPropertyPath(format!(
                "{} has no property {}",
                entity_type, property
            )));
        }
        let keys = document_keys(rest)?;
        let value = entity
            .map(|e| e.get(&Property::Entity(property)))
            .unwrap_or(FieldValue::Null);
        shape_property(self.columns(entity_type, property, value)?, &keys)
    }

    fn eval_function(&self, function: &Function, binding: &Binding<'_>) -> Result<Value> {
        use FunctionKind as K;
        let kind = function.kind();
        let args = function.args();
        match kind {
            K::Now => return Ok(Value::instant(Some(self.now))),
            K::MinDateTime => return Ok(Value::instant(Some(min_datetime()))),
            K::MaxDateTime => return Ok(Value::instant(Some(max_datetime()))),
            _ => {}
        }
        let pattern = if kind == K::StRelate {
            match &args[2] {
                Expression::Constant(Constant::String(p)) => Some(p.clone()),
                _ => {
                    return Err(QueryError::InvalidArgument(
                        "st_relate pattern must be a string literal".to_string(),
                    ))
                }
            }
        } else {
            None
        };
        let compiled = args
            .iter()
            .map(|a| self.eval(a, binding))
            .collect::<Result<Vec<_>>>()?;
        let arg = |i: usize, category: Category| compiled[i].resolve_as(category);
        let number = |i: usize| -> Result<Option<Number>> { number_of(arg(i, Category::Number)?) };
        let string = |i: usize| -> Result<Option<String>> { string_of(arg(i, Category::String)?) };
        let geometry = |i: usize| -> Result<Option<Geometry>> { geometry_of(arg(i, Category::Geometry)?) };
        let strings = |f: fn(&str, &str) -> bool| -> Result<Value> {
            let (a, b) = (string(0)?, string(1)?);
            Ok(Value::Boolean(a.zip(b).map(|(a, b)| f(&a, &b))))
        };
        let spatial = |f: fn(&Geometry, &Geometry) -> bool| -> Result<Value> {
            let (a, b) = (geometry(0)?, geometry(1)?);
            Ok(Value::Boolean(a.zip(b).map(|(a, b)| f(&a, &b))))
        };
        let part = |p: DatePart| -> Result<Value> {
            let at = instant_of(arg(0, Category::Time)?)?;
            Ok(Value::number(at.map(|t| date_part(t, p))))
        };
        let round = |mode: Rounding| -> Result<Value> {
            Ok(Value::number(number(0)?.map(|n| n.rounded(mode))))
        };
        let text = |f: fn(&str) -> String| -> Result<Value> {
            Ok(Value::String(string(0)?.map(|s| f(&s))))
        };

        match kind {
            K::Eq | K::Ne | K::Gt | K::Ge | K::Lt | K::Le => {
                let relation = kind.relation().unwrap_or(Relation::Eq);
                Ok(Value::Boolean(compare(relation, &compiled[0], &compiled[1])?))
            }
            K::Before | K::After | K::Meets | K::During | K::Overlaps | K::Starts | K::Finishes => {
                let relation = kind.relation().unwrap_or(Relation::Eq);
                let left = arg(0, Category::Time)?;
                let right = arg(1, Category::Time)?;
                Ok(Value::Boolean(relate_values(relation, left, right)?))
            }
            K::And | K::Or => {
                let a = truth_of(arg(0, Category::Boolean)?)?;
                let b = truth_of(arg(1, Category::Boolean)?)?;
                Ok(Value::Boolean(if kind == K::And { and3(a, b) } else { or3(a, b) }))
            }
            K::Not => Ok(Value::Boolean(truth_of(arg(0, Category::Boolean)?)?.map(|b| !b))),
            K::Add | K::Sub | K::Mul | K::Div => {
                let op = kind.arithmetic().ok_or_else(|| {
                    QueryError::Unsupported(format!("{} is not arithmetic", kind))
                })?;
                let numeric = match kind {
                    K::Add => NumericOp::Add,
                    K::Sub => NumericOp::Sub,
                    K::Mul => NumericOp::Mul,
                    _ => NumericOp::Div,
                };
                arithmetic(plan_arithmetic_operands(op, &compiled[0], &compiled[1])?, numeric)
            }
            K::Mod => {
                let (left, right) = plan_modulo(&compiled[0], &compiled[1])?;
                let value = match (number_of(left)?, number_of(right)?) {
                    (Some(a), Some(b)) => Some(a.modulo(b)?),
                    _ => None,
                };
                Ok(Value::number(value))
            }
            K::Concat => {
                let (a, b) = (string(0)?, string(1)?);
                Ok(Value::String(a.zip(b).map(|(a, b)| a + &b)))
            }
            K::Length => Ok(Value::number(
                string(0)?.map(|s| Number::Int(s.chars().count() as i64)),
            )),
            K::Substring => {
                let s = string(0)?;
                let from = match number(1)? {
                    Some(n) => Some(
                        n.to_int4()?
                            .checked_add(1)
                            .ok_or_else(|| QueryError::InvalidArgument("integer out of range".to_string()))?,
                    ),
                    None => None,
                };
                let count = if compiled.len() == 3 {
                    match number(2)? {
                        Some(n) => Some(Some(n.to_int4()?)),
                        None => None,
                    }
                } else {
                    Some(None)
                };
                let value = match (s, from, count) {
                    (Some(s), Some(from), Some(count)) => {
                        Some(substr(&s, i64::from(from), count.map(i64::from))?)
                    }
                    _ => None,
                };
                Ok(Value::String(value))
            }
            K::IndexOf => {
                let (a, b) = (string(0)?, string(1)?);
                Ok(Value::number(a.zip(b).map(|(a, b)| Number::Int(strpos(&a, &b) - 1))))
            }
            K::StartsWith => strings(|a, b| a.starts_with(b)),
            K::EndsWith => strings(|a, b| a.ends_with(b)),
            K::Contains => strings(|a, b| a.contains(b)),
            K::SubstringOf => strings(|a, b| b.contains(a)),
            K::Trim => text(|s| s.trim_matches(' ').to_string()),
            K::ToLower => text(str::to_lowercase),
            K::ToUpper => text(str::to_uppercase),
            K::Floor => round(Rounding::Floor),
            K::Ceiling => round(Rounding::Ceiling),
            K::Round => round(Rounding::Round),
            K::Year => part(DatePart::Year),
            K::Month => part(DatePart::Month),
            K::Day => part(DatePart::Day),
            K::Hour => part(DatePart::Hour),
            K::Minute => part(DatePart::Minute),
            K::Second => part(DatePart::Second),
            K::FractionalSeconds => part(DatePart::FractionalSeconds),
            K::Date => {
                let at = instant_of(arg(0, Category::Time)?)?;
                Ok(Value::Date(at.map(|t| t.date_naive())))
            }
            K::Time => {
                let at = instant_of(arg(0, Category::Time)?)?;
                Ok(Value::TimeOfDay(at.map(|t| t.time())))
            }
            K::TotalOffsetMinutes => match arg(0, Category::Time)? {
                Value::Instant { offset_minutes, .. } => Ok(Value::number(Some(Number::Int(
                    i64::from(offset_minutes.unwrap_or(0)),
                )))),
                Value::Interval { .. } => Ok(Value::number(Some(Number::Int(0)))),
                other => Err(conversion(other.kind(), "Instant")),
            },
            K::GeoDistance => {
                let (a, b) = (geometry(0)?, geometry(1)?);
                Ok(Value::number(a.zip(b).map(|(a, b)| Number::Float(a.distance(&b)))))
            }
            K::GeoLength => Ok(Value::number(geometry(0)?.map(|g| Number::Float(g.length())))),
            K::GeoIntersects | K::StIntersects => spatial(Geometry::intersects),
            K::StContains => spatial(Geometry::contains),
            K::StCrosses => spatial(Geometry::crosses),
            K::StDisjoint => spatial(Geometry::disjoint),
            K::StEquals => spatial(Geometry::equals),
            K::StOverlaps => spatial(Geometry::overlaps),
            K::StTouches => spatial(Geometry::touches),
            K::StWithin => spatial(Geometry::within),
            K::StRelate => {
                let (a, b) = (geometry(0)?, geometry(1)?);
                let pattern = pattern.unwrap_or_default();
                let value = match a.zip(b) {
                    Some((a, b)) => Some(a.relate(&b, &pattern)?),
                    None => None,
                };
                Ok(Value::Boolean(value))
            }
            K::Now | K::MinDateTime | K::MaxDateTime => {
                Err(QueryError::Unsupported(format!("{} takes no arguments", kind)))
            }
        }
    }
}

fn stored_number(v: f64) -> Value {
    Value::Number {
        value: Some(Number::Float(v)),
        column: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_filter;
    use crate::types::LongIdManager;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, h, 0, 0).single().unwrap()
    }

    fn check(filter: &str, entity: &Entity) -> Result<bool> {
        Evaluator::at(&LongIdManager, at(12)).matches(&parse_filter(filter)?, entity)
    }

    fn observation(result: impl Into<FieldValue>) -> Entity {
        Entity::reference(EntityType::Observation, Id::Long(1))
            .with(EntityProperty::Result, result)
            .with(
                EntityProperty::PhenomenonTime,
                FieldValue::Interval {
                    start: at(1),
                    end: at(3),
                },
            )
            .with(EntityProperty::ResultTime, at(4))
            .with_link(
                NavigationProperty::Datastream,
                Entity::reference(EntityType::Datastream, Id::Long(9)).with(EntityProperty::Name, "temp"),
            )
    }

    #[test]
    fn test_result_sub_field_follows_literal_kind() {
        assert!(check("result gt 5", &observation(7i64)).unwrap());
        assert!(!check("result gt 5", &observation("7")).unwrap());
        assert!(check("result gt '5'", &observation("7")).unwrap());
        assert!(!check("result gt '5'", &observation(7i64)).unwrap());
    }

    #[test]
    fn test_number_column_compares_as_text() {
        let thing = Entity::reference(EntityType::Thing, Id::Long(5));
        assert!(check("id eq '5'", &thing).unwrap());
        assert!(check("id eq 5", &thing).unwrap());
        assert!(!check("id eq '05'", &thing).unwrap());
    }

    #[test]
    fn test_navigation_binds_related_entities() {
        let obs = observation(1i64);
        assert!(check("Datastream/id eq 9", &obs).unwrap());
        assert!(check("Datastream/name eq 'temp'", &obs).unwrap());
        assert!(!check("Datastream/Thing/name eq 'x'", &obs).unwrap());

        let thing = Entity::reference(EntityType::Thing, Id::Long(1)).with_links(
            NavigationProperty::Datastreams,
            vec![
                Entity::reference(EntityType::Datastream, Id::Long(1)).with(EntityProperty::Name, "a"),
                Entity::reference(EntityType::Datastream, Id::Long(2)).with(EntityProperty::Name, "b"),
            ],
        );
        assert!(check("Datastreams/name eq 'b'", &thing).unwrap());
        assert!(!check("Datastreams/name eq 'a' and Datastreams/name eq 'b'", &thing).unwrap());
        assert!(check("not (Datastreams/name eq 'a')", &thing).unwrap());
    }

    #[test]
    fn test_missing_relation_still_types_the_filter() {
        let thing = Entity::reference(EntityType::Thing, Id::Long(1));
        assert!(!check("Datastreams/name eq 'a'", &thing).unwrap());
        assert!(matches!(
            check("Datastreams/name eq geography'POINT (1 2)'", &thing),
            Err(QueryError::Conversion { .. })
        ));
    }

    #[test]
    fn test_three_valued_logic() {
        let thing = Entity::reference(EntityType::Thing, Id::Long(1)).with(EntityProperty::Name, "n");
        assert!(!check("description eq 'x'", &thing).unwrap());
        assert!(!check("not (description eq 'x')", &thing).unwrap());
        assert!(check("description eq 'x' or name eq 'n'", &thing).unwrap());
        assert!(!check("description eq 'x' and name eq 'n'", &thing).unwrap());
    }

    #[test]
    fn test_time_relations() {
        let obs = observation(1i64);
        assert!(check("phenomenonTime lt 2020-01-01T03:00:00Z", &obs).unwrap());
        assert!(check("during(2020-01-01T02:00:00Z, phenomenonTime)", &obs).unwrap());
        assert!(check("resultTime sub phenomenonTime/end eq duration'PT1H'", &obs).unwrap());
        assert!(check("resultTime add duration'PT8H' eq now()", &obs).unwrap());
        assert!(check("hour(phenomenonTime) eq 1", &obs).unwrap());
        assert!(check("totaloffsetminutes(2020-01-01T00:00:00+02:00) eq 120", &obs).unwrap());
        assert!(matches!(
            check("5 div resultTime eq 1", &obs),
            Err(QueryError::Unsupported(_))
        ));
    }

    #[test]
    fn test_string_functions() {
        let thing = Entity::reference(EntityType::Thing, Id::Long(1)).with(EntityProperty::Name, "Kitchen lamp");
        for filter in [
            "substring(name, 8) eq 'lamp'",
            "substring(name, 0, 3) eq 'Kit'",
            "substring(name, -1, 3) eq 'Ki'",
            "indexof(name, 'lamp') eq 8",
            "startswith(name, 'Kit')",
            "endswith(name, 'amp')",
            "contains(name, 'n l')",
            "substringof('lamp', name)",
            "tolower(name) eq 'kitchen lamp'",
            "length(concat(name, '!')) eq 13",
            "trim(' x ') eq 'x'",
        ] {
            assert!(check(filter, &thing).unwrap(), "{}", filter);
        }
        assert!(check("substring(name, 1, -1) eq ''", &thing).is_err());
    }

    #[test]
    fn test_numeric_functions() {
        let obs = observation(2.5f64);
        assert!(check("round(result) eq 2", &obs).unwrap());
        assert!(check("floor(result) eq 2", &obs).unwrap());
        assert!(check("ceiling(result) eq 3", &obs).unwrap());
        assert!(check("result mod 2 eq 0.5", &obs).unwrap());
        assert!(check("result div 0 eq 1", &obs).is_err());
        assert!(check("7 div 2 eq 3", &obs).unwrap());
    }

    #[test]
    fn test_document_paths() {
        let thing = Entity::reference(EntityType::Thing, Id::Long(1))
            .with(EntityProperty::Properties, json!({"floor": 3, "room": "kitchen", "on": true}));
        assert!(check("properties/floor eq 3", &thing).unwrap());
        assert!(check("properties/floor gt 2.5", &thing).unwrap());
        assert!(check("properties/room eq 'kitchen'", &thing).unwrap());
        assert!(check("properties/on eq true", &thing).unwrap());
        assert!(!check("properties/missing eq 1", &thing).unwrap());
        let obs = observation(json!({"depth": 4}));
        assert!(check("result/depth eq 4", &obs).unwrap());

        let huge = Entity::reference(EntityType::Thing, Id::Long(2))
            .with(EntityProperty::Properties, json!({"x": 1e30}));
        assert!(check("properties/x gt 5", &huge).unwrap());
        assert!(!check("properties/x lt 5", &huge).unwrap());
    }

    #[test]
    fn test_spatial_functions() {
        let location = Entity::reference(EntityType::Location, Id::Long(1)).with(
            EntityProperty::Location,
            json!({"type": "Point", "coordinates": [1.0, 1.0]}),
        );
        assert!(check(
            "st_within(location, geography'POLYGON ((0 0, 2 0, 2 2, 0 2, 0 0))')",
            &location
        )
        .unwrap());
        assert!(check("geo.distance(location, geography'POINT (4 5)') eq 5", &location).unwrap());
        assert!(check(
            "st_relate(location, geography'POINT (1 1)', 'T********')",
            &location
        )
        .unwrap());
    }

    #[test]
    fn test_spatial_functions_on_multi_geometries() {
        let located = |geometry: JsonValue| {
            Entity::reference(EntityType::Location, Id::Long(1)).with(EntityProperty::Location, geometry)
        };
        let points = located(json!({"type": "MultiPoint", "coordinates": [[1, 1], [5, 5]]}));
        let square = "geography'POLYGON ((0 0, 2 0, 2 2, 0 2, 0 0))'";
        assert!(check(&format!("st_intersects(location, {})", square), &points).unwrap());
        assert!(!check(&format!("st_within(location, {})", square), &points).unwrap());

        let collection = located(json!({
            "type": "GeometryCollection",
            "geometries": [
                {"type": "Point", "coordinates": [9, 9]},
                {"type": "LineString", "coordinates": [[1, 1], [3, 3]]}
            ]
        }));
        assert!(check(&format!("st_crosses(location, {})", square), &collection).unwrap());

        let broken = located(json!({"type": "Blob", "coordinates": [1, 1]}));
        assert!(matches!(
            check(&format!("st_intersects(location, {})", square), &broken),
            Err(QueryError::Conversion { .. })
        ));
    }

    #[test]
    fn test_relate_pattern_must_be_literal() {
        let location = Entity::reference(EntityType::Location, Id::Long(1));
        assert!(matches!(
            check("st_relate(location, location, name)", &location),
            Err(QueryError::InvalidArgument(_))
        ));
    }
}
