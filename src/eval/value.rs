//! Runtime values of the in-memory evaluator.
//!
//! Every value keeps its kind when it is NULL, so typing never depends on
//! whether a field happens to be set. Numbers follow the store's promotion
//! rules: integers stay integers, anything touching a float is a float,
//! and integers meeting decimals become decimals.

use crate::error::{QueryError, Result};
use crate::geo::Geometry;
use crate::model::{KEY_BOOLEAN, KEY_JSON, KEY_NUMBER, KEY_STRING};
use crate::resolve::{Composite, Operand};
use crate::time::Shape;
use crate::types::Kind;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NumericOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn out_of_range() -> QueryError {
    QueryError::InvalidArgument("numeric value out of range".to_string())
}

fn division_by_zero() -> QueryError {
    QueryError::InvalidArgument("division by zero".to_string())
}

/// Parse decimal text, with or without an exponent.
pub(crate) fn decimal_from_text(text: &str) -> Result<Decimal> {
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(text)
    } else {
        Decimal::from_str(text)
    };
    parsed.map_err(|_| out_of_range())
}

/// Total order on floats with NaN above every other value.
fn float_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
            Number::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    /// Exact decimal form; floats keep 15 significant digits.
    pub fn to_decimal(self) -> Result<Decimal> {
        match self {
            Number::Int(v) => Ok(Decimal::from(v)),
            Number::Decimal(d) => Ok(d),
            Number::Float(v) if v.is_finite() => decimal_from_text(&format!("{:.14e}", v)),
            Number::Float(_) => Err(QueryError::Conversion {
                from: "Float".to_string(),
                to: "Decimal".to_string(),
            }),
        }
    }

    pub fn compare(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (Number::Float(_), _) | (_, Number::Float(_)) => float_cmp(self.to_f64(), other.to_f64()),
            (a, b) => match (a.to_decimal(), b.to_decimal()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => float_cmp(self.to_f64(), other.to_f64()),
            },
        }
    }

    pub(crate) fn apply(self, op: NumericOp, other: Number) -> Result<Number> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => {
                let result = match op {
                    NumericOp::Add => a.checked_add(b),
                    NumericOp::Sub => a.checked_sub(b),
                    NumericOp::Mul => a.checked_mul(b),
                    NumericOp::Div if b == 0 => return Err(division_by_zero()),
                    NumericOp::Div => a.checked_div(b),
                };
                result.map(Number::Int).ok_or_else(out_of_range)
            }
            (Number::Float(_), _) | (_, Number::Float(_)) => {
                let (a, b) = (self.to_f64(), other.to_f64());
                let result = match op {
                    NumericOp::Add => a + b,
                    NumericOp::Sub => a - b,
                    NumericOp::Mul => a * b,
                    NumericOp::Div if b == 0.0 => return Err(division_by_zero()),
                    NumericOp::Div => a / b,
                };
                if result.is_infinite() && a.is_finite() && b.is_finite() {
                    return Err(out_of_range());
                }
                Ok(Number::Float(result))
            }
            _ => {
                let (a, b) = (self.to_decimal()?, other.to_decimal()?);
                let result = match op {
                    NumericOp::Add => a.checked_add(b),
                    NumericOp::Sub => a.checked_sub(b),
                    NumericOp::Mul => a.checked_mul(b),
                    NumericOp::Div if b.is_zero() => return Err(division_by_zero()),
                    NumericOp::Div => a.checked_div(b),
                };
                result.map(Number::Decimal).ok_or_else(out_of_range)
            }
        }
    }

    /// Remainder computed on decimals; the sign follows the dividend.
    pub fn modulo(self, other: Number) -> Result<Number> {
        let (a, b) = (self.to_decimal()?, other.to_decimal()?);
        if b.is_zero() {
            return Err(division_by_zero());
        }
        a.checked_rem(b).map(Number::Decimal).ok_or_else(out_of_range)
    }

    /// Conversion to a 32-bit integer: floats round half to even, decimals
    /// half away from zero.
    pub fn to_int4(self) -> Result<i32> {
        let wide = match self {
            Number::Int(v) => v,
            Number::Float(v) => {
                let rounded = v.round_ties_even();
                if !rounded.is_finite() || rounded.abs() > i64::MAX as f64 {
                    return Err(out_of_range());
                }
                rounded as i64
            }
            Number::Decimal(d) => d
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .ok_or_else(out_of_range)?,
        };
        i32::try_from(wide).map_err(|_| out_of_range())
    }

    /// `floor`, `ceiling` and `round`; integers are widened to floats first.
    pub fn rounded(self, mode: Rounding) -> Number {
        match self {
            Number::Int(v) => Number::Float(v as f64).rounded(mode),
            Number::Float(v) => Number::Float(match mode {
                Rounding::Floor => v.floor(),
                Rounding::Ceiling => v.ceil(),
                Rounding::Round => v.round_ties_even(),
            }),
            Number::Decimal(d) => Number::Decimal(match mode {
                Rounding::Floor => d.floor(),
                Rounding::Ceiling => d.ceil(),
                Rounding::Round => d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            }),
        }
    }

    /// Text the store produces when casting the number to text.
    pub fn text(self) -> String {
        match self {
            Number::Int(v) => v.to_string(),
            Number::Decimal(d) => d.to_string(),
            Number::Float(v) => float_text(v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceiling,
    Round,
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e15).contains(&magnitude) {
        let scientific = format!("{:e}", v);
        if let Some((mantissa, exponent)) = scientific.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
            }
        }
        return scientific;
    }
    v.to_string()
}

/// Text form of a JSON document: keys ordered by length then bytes.
pub(crate) fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| {
                a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
            });
            let rendered: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", JsonValue::String(k.clone()), json_text(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        JsonValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(json_text).collect();
            format!("[{}]", rendered.join(", "))
        }
        other => other.to_string(),
    }
}

/// A value flowing through the in-memory evaluator. `None` is NULL.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `column` marks numbers read straight from a stored column.
    Number {
        value: Option<Number>,
        column: bool,
    },
    String(Option<String>),
    Boolean(Option<bool>),
    Geometry(Option<Geometry>),
    Json(Option<JsonValue>),
    Date(Option<NaiveDate>),
    TimeOfDay(Option<NaiveTime>),
    Instant {
        at: Option<DateTime<Utc>>,
        offset_minutes: Option<i32>,
    },
    Interval {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    Duration(Option<Duration>),
}

impl Value {
    pub fn number(value: Option<Number>) -> Self {
        Value::Number {
            value,
            column: false,
        }
    }

    pub fn instant(at: Option<DateTime<Utc>>) -> Self {
        Value::Instant {
            at,
            offset_minutes: None,
        }
    }

    pub fn as_truth(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => *b,
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Number { value, .. } => value.is_none(),
            Value::String(v) => v.is_none(),
            Value::Boolean(v) => v.is_none(),
            Value::Geometry(v) => v.is_none(),
            Value::Json(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
            Value::TimeOfDay(v) => v.is_none(),
            Value::Instant { at, .. } => at.is_none(),
            Value::Interval { start, end } => start.is_none() || end.is_none(),
            Value::Duration(v) => v.is_none(),
        }
    }

    /// Ordering between two values of the same comparable kind; `None`
    /// when either side is NULL.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        let ordering = match (self, other) {
            (Value::Number { value: a, .. }, Value::Number { value: b, .. }) => {
                a.zip(*b).map(|(a, b)| a.compare(b))
            }
            (Value::String(a), Value::String(b)) => zip_ref(a, b).map(|(a, b)| a.as_bytes().cmp(b.as_bytes())),
            (Value::Boolean(a), Value::Boolean(b)) => a.zip(*b).map(|(a, b)| a.cmp(&b)),
            (Value::Date(a), Value::Date(b)) => a.zip(*b).map(|(a, b)| a.cmp(&b)),
            (Value::TimeOfDay(a), Value::TimeOfDay(b)) => a.zip(*b).map(|(a, b)| a.cmp(&b)),
            (a, b) => {
                return Err(QueryError::IncompatibleOperands(format!(
                    "{} and {}",
                    a.kind(),
                    b.kind()
                )))
            }
        };
        Ok(ordering)
    }
}

fn zip_ref<'a, T>(a: &'a Option<T>, b: &'a Option<T>) -> Option<(&'a T, &'a T)> {
    a.as_ref().zip(b.as_ref())
}

/// Value at `keys` inside a document: object keys by name, array items by
/// index.
fn descend<'a>(mut value: &'a JsonValue, keys: &[String]) -> Option<&'a JsonValue> {
    for key in keys {
        value = match value {
            JsonValue::Object(map) => map.get(key)?,
            JsonValue::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

impl Operand for Value {
    fn kind(&self) -> Kind {
        match self {
            Value::Number { .. } => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Boolean(_) => Kind::Boolean,
            Value::Geometry(_) => Kind::Geometry,
            Value::Json(_) => Kind::Json,
            Value::Date(_) => Kind::Date,
            Value::TimeOfDay(_) => Kind::TimeOfDay,
            Value::Instant { .. } | Value::Interval { .. } | Value::Duration(_) => Kind::Time,
        }
    }

    fn time_shape(&self) -> Option<Shape> {
        match self {
            Value::Instant { .. } => Some(Shape::Instant),
            Value::Interval { .. } => Some(Shape::Interval),
            Value::Duration(_) => Some(Shape::Duration),
            _ => None,
        }
    }

    fn coerce_to_string(&self) -> Option<Self> {
        match self {
            Value::Number {
                value,
                column: true,
            } => Some(Value::String(value.map(Number::text))),
            _ => None,
        }
    }

    fn cast_to_string(&self) -> Result<Self> {
        match self {
            Value::String(_) => Ok(self.clone()),
            Value::Number { value, .. } => Ok(Value::String(value.map(Number::text))),
            Value::Boolean(b) => Ok(Value::String(b.map(|b| b.to_string()))),
            Value::Json(v) => Ok(Value::String(v.as_ref().map(json_text))),
            other => Err(QueryError::Conversion {
                from: other.kind().to_string(),
                to: Kind::String.to_string(),
            }),
        }
    }

    fn interval(start: Self, end: Self) -> Result<Self> {
        match (start, end) {
            (Value::Instant { at: start, .. }, Value::Instant { at: end, .. }) => {
                Ok(Value::Interval { start, end })
            }
            (other, _) => Err(QueryError::Conversion {
                from: other.kind().to_string(),
                to: "Interval".to_string(),
            }),
        }
    }

    fn document_path(&self, keys: &[String]) -> Result<Composite<Self>> {
        let Value::Json(base) = self else {
            return Err(QueryError::Conversion {
                from: self.kind().to_string(),
                to: Kind::Json.to_string(),
            });
        };
        let node = base.as_ref().and_then(|v| descend(v, keys));
        let number = match node {
            // Past the decimal range the number compares as float8.
            Some(JsonValue::Number(n)) => decimal_from_text(&n.to_string())
                .ok()
                .map(Number::Decimal)
                .or_else(|| n.as_f64().map(Number::Float)),
            _ => None,
        };
        let boolean = node.and_then(JsonValue::as_bool);
        let string = node.and_then(JsonValue::as_str).map(str::to_string);
        Ok(Composite::document()
            .with(KEY_NUMBER, Value::number(number))
            .with(KEY_BOOLEAN, Value::Boolean(boolean))
            .with(KEY_STRING, Value::String(string))
            .with(KEY_JSON, Value::Json(node.cloned())))
    }
}
