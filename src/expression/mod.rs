//! Filter and order-by expressions.
//!
//! An [`Expression`] is an immutable tree of constants, property paths and
//! function applications. Function arity is checked when a node is built,
//! so both evaluators can index arguments without re-validating.

mod lexer;
mod parser;
mod query;

pub use lexer::{lexer, Span, Token};
pub use parser::{parse_filter, parse_order_by};
pub use query::{Direction, Expand, OrderBy, Query};

use crate::error::{QueryError, Result};
use crate::geo::Geometry;
use crate::model::Property;
use crate::time::{format_duration, ArithmeticOp, Relation};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use rust_decimal::Decimal;
use std::fmt;

/// A typed literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    Duration(Duration),
    Interval(DateTime<FixedOffset>, DateTime<FixedOffset>),
    Geometry(Geometry),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = |t: &DateTime<FixedOffset>| t.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        match self {
            Constant::Boolean(b) => write!(f, "{}", b),
            Constant::Integer(v) => write!(f, "{}", v),
            Constant::Double(v) => write!(f, "{:?}", v),
            Constant::Decimal(v) => write!(f, "{}M", v),
            Constant::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Constant::DateTime(t) => f.write_str(&stamp(t)),
            Constant::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Constant::TimeOfDay(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Constant::Duration(d) => write!(f, "duration'{}'", format_duration(*d)),
            Constant::Interval(a, b) => write!(f, "{}/{}", stamp(a), stamp(b)),
            Constant::Geometry(g) => write!(f, "geography'{}'", g.to_wkt()),
        }
    }
}

/// Every function and operator the filter language knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    // --- Arithmetic ---
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // --- Comparison ---
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    // --- Logical ---
    And,
    Or,
    Not,
    // --- String ---
    Concat,
    Length,
    Substring,
    IndexOf,
    StartsWith,
    EndsWith,
    Contains,
    SubstringOf,
    Trim,
    ToLower,
    ToUpper,
    // --- Math ---
    Floor,
    Ceiling,
    Round,
    // --- Date parts ---
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    FractionalSeconds,
    Date,
    Time,
    TotalOffsetMinutes,
    // --- Temporal relations ---
    Before,
    After,
    Meets,
    During,
    Overlaps,
    Starts,
    Finishes,
    // --- Spatial ---
    GeoDistance,
    GeoIntersects,
    GeoLength,
    StContains,
    StCrosses,
    StDisjoint,
    StEquals,
    StIntersects,
    StOverlaps,
    StRelate,
    StTouches,
    StWithin,
    // --- Sentinels ---
    Now,
    MinDateTime,
    MaxDateTime,
}

impl FunctionKind {
    const ALL: [FunctionKind; 60] = [
        FunctionKind::Add,
        FunctionKind::Sub,
        FunctionKind::Mul,
        FunctionKind::Div,
        FunctionKind::Mod,
        FunctionKind::Eq,
        FunctionKind::Ne,
        FunctionKind::Gt,
        FunctionKind::Ge,
        FunctionKind::Lt,
        FunctionKind::Le,
        FunctionKind::And,
        FunctionKind::Or,
        FunctionKind::Not,
        FunctionKind::Concat,
        FunctionKind::Length,
        FunctionKind::Substring,
        FunctionKind::IndexOf,
        FunctionKind::StartsWith,
        FunctionKind::EndsWith,
        FunctionKind::Contains,
        FunctionKind::SubstringOf,
        FunctionKind::Trim,
        FunctionKind::ToLower,
        FunctionKind::ToUpper,
        FunctionKind::Floor,
        FunctionKind::Ceiling,
        FunctionKind::Round,
        FunctionKind::Year,
        FunctionKind::Month,
        FunctionKind::Day,
        FunctionKind::Hour,
        FunctionKind::Minute,
        FunctionKind::Second,
        FunctionKind::FractionalSeconds,
        FunctionKind::Date,
        FunctionKind::Time,
        FunctionKind::TotalOffsetMinutes,
        FunctionKind::Before,
        FunctionKind::After,
        FunctionKind::Meets,
        FunctionKind::During,
        FunctionKind::Overlaps,
        FunctionKind::Starts,
        FunctionKind::Finishes,
        FunctionKind::GeoDistance,
        FunctionKind::GeoIntersects,
        FunctionKind::GeoLength,
        FunctionKind::StContains,
        FunctionKind::StCrosses,
        FunctionKind::StDisjoint,
        FunctionKind::StEquals,
        FunctionKind::StIntersects,
        FunctionKind::StOverlaps,
        FunctionKind::StRelate,
        FunctionKind::StTouches,
        FunctionKind::StWithin,
        FunctionKind::Now,
        FunctionKind::MinDateTime,
        FunctionKind::MaxDateTime,
    ];

    /// Name in filter text. Operators use their keyword.
    pub fn name(self) -> &'static str {
        use FunctionKind::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Eq => "eq",
            Ne => "ne",
            Gt => "gt",
            Ge => "ge",
            Lt => "lt",
            Le => "le",
            And => "and",
            Or => "or",
            Not => "not",
            Concat => "concat",
            Length => "length",
            Substring => "substring",
            IndexOf => "indexof",
            StartsWith => "startswith",
            EndsWith => "endswith",
            Contains => "contains",
            SubstringOf => "substringof",
            Trim => "trim",
            ToLower => "tolower",
            ToUpper => "toupper",
            Floor => "floor",
            Ceiling => "ceiling",
            Round => "round",
            Year => "year",
            Month => "month",
            Day => "day",
            Hour => "hour",
            Minute => "minute",
            Second => "second",
            FractionalSeconds => "fractionalseconds",
            Date => "date",
            Time => "time",
            TotalOffsetMinutes => "totaloffsetminutes",
            Before => "before",
            After => "after",
            Meets => "meets",
            During => "during",
            Overlaps => "overlaps",
            Starts => "starts",
            Finishes => "finishes",
            GeoDistance => "geo.distance",
            GeoIntersects => "geo.intersects",
            GeoLength => "geo.length",
            StContains => "st_contains",
            StCrosses => "st_crosses",
            StDisjoint => "st_disjoint",
            StEquals => "st_equals",
            StIntersects => "st_intersects",
            StOverlaps => "st_overlaps",
            StRelate => "st_relate",
            StTouches => "st_touches",
            StWithin => "st_within",
            Now => "now",
            MinDateTime => "mindatetime",
            MaxDateTime => "maxdatetime",
        }
    }

    /// Look up a function called by name, e.g. `startswith(...)`.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .filter(|k| !k.is_operator())
            .find(|k| k.name() == lower)
    }

    /// Operators are written infix (or prefix for `not`).
    pub fn is_operator(self) -> bool {
        use FunctionKind::*;
        matches!(
            self,
            Add | Sub | Mul | Div | Mod | Eq | Ne | Gt | Ge | Lt | Le | And | Or | Not
        )
    }

    /// The time relation a comparison or interval function stands for.
    pub fn relation(self) -> Option<Relation> {
        use FunctionKind::*;
        Some(match self {
            Eq => Relation::Eq,
            Ne => Relation::Ne,
            Gt => Relation::Gt,
            Ge => Relation::Ge,
            Lt => Relation::Lt,
            Le => Relation::Le,
            Before => Relation::Before,
            After => Relation::After,
            Meets => Relation::Meets,
            During => Relation::During,
            Overlaps => Relation::Overlaps,
            Starts => Relation::Starts,
            Finishes => Relation::Finishes,
            _ => return None,
        })
    }

    pub fn arithmetic(self) -> Option<ArithmeticOp> {
        match self {
            FunctionKind::Add => Some(ArithmeticOp::Add),
            FunctionKind::Sub => Some(ArithmeticOp::Sub),
            FunctionKind::Mul => Some(ArithmeticOp::Mul),
            FunctionKind::Div => Some(ArithmeticOp::Div),
            _ => None,
        }
    }

    /// Accepted argument counts (inclusive).
    pub fn arity(self) -> (usize, usize) {
        use FunctionKind::*;
        match self {
            Now | MinDateTime | MaxDateTime => (0, 0),
            Not | Length | Trim | ToLower | ToUpper | Floor | Ceiling | Round | Year | Month
            | Day | Hour | Minute | Second | FractionalSeconds | Date | Time
            | TotalOffsetMinutes | GeoLength => (1, 1),
            Substring => (2, 3),
            StRelate => (3, 3),
            _ => (2, 2),
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A function applied to arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    kind: FunctionKind,
    args: Vec<Expression>,
}

impl Function {
    pub fn new(kind: FunctionKind, args: Vec<Expression>) -> Result<Self> {
        let (min, max) = kind.arity();
        if args.len() < min || args.len() > max {
            return Err(QueryError::InvalidArgument(format!(
                "{} takes {} argument(s), got {}",
                kind,
                if min == max {
                    min.to_string()
                } else {
                    format!("{} to {}", min, max)
                },
                args.len()
            )));
        }
        Ok(Self { kind, args })
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn args(&self) -> &[Expression] {
        &self.args
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Constant(Constant),
    /// Property path, e.g. `Datastream/Thing/name` or `properties/a/b`.
    Path(Vec<Property>),
    Function(Function),
}

impl Expression {
    pub fn function(kind: FunctionKind, args: Vec<Expression>) -> Result<Self> {
        Function::new(kind, args).map(Expression::Function)
    }

    /// A two-argument node; only valid for kinds of arity two.
    pub(crate) fn binary(kind: FunctionKind, left: Expression, right: Expression) -> Self {
        Expression::Function(Function {
            kind,
            args: vec![left, right],
        })
    }

    pub(crate) fn negate(inner: Expression) -> Self {
        Expression::Function(Function {
            kind: FunctionKind::Not,
            args: vec![inner],
        })
    }

    pub fn path(properties: Vec<Property>) -> Self {
        Expression::Path(properties)
    }

    pub fn constant(constant: Constant) -> Self {
        Expression::Constant(constant)
    }

    /// `left and right`, or the single side that is present.
    pub fn and_opt(left: Option<Expression>, right: Option<Expression>) -> Option<Expression> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Expression::binary(FunctionKind::And, l, r)),
            (l, r) => l.or(r),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(c) => write!(f, "{}", c),
            Expression::Path(properties) => {
                let names: Vec<&str> = properties.iter().map(Property::name).collect();
                f.write_str(&names.join("/"))
            }
            Expression::Function(func) => {
                let args = func.args();
                match func.kind() {
                    FunctionKind::Not => write!(f, "not ({})", args[0]),
                    k if k.is_operator() => write!(f, "({} {} {})", args[0], k, args[1]),
                    k => {
                        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                        write!(f, "{}({})", k, rendered.join(", "))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityProperty;

    #[test]
    fn test_arity_is_checked_on_construction() {
        let name = Expression::path(vec![Property::Entity(EntityProperty::Name)]);
        assert!(Expression::function(FunctionKind::Length, vec![name.clone()]).is_ok());
        assert!(matches!(
            Expression::function(FunctionKind::Length, vec![]),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(Expression::function(
            FunctionKind::Substring,
            vec![name.clone(), Expression::constant(Constant::Integer(1))]
        )
        .is_ok());
        assert!(Expression::function(FunctionKind::Now, vec![name]).is_err());
    }

    #[test]
    fn test_function_names() {
        assert_eq!(FunctionKind::from_name("geo.distance"), Some(FunctionKind::GeoDistance));
        assert_eq!(FunctionKind::from_name("StartsWith"), Some(FunctionKind::StartsWith));
        assert_eq!(FunctionKind::from_name("eq"), None);
        assert_eq!(FunctionKind::from_name("unknown"), None);
    }

    #[test]
    fn test_display() {
        let e = Expression::binary(
            FunctionKind::Gt,
            Expression::path(vec![Property::Entity(EntityProperty::Result)]),
            Expression::constant(Constant::String("it's".into())),
        );
        assert_eq!(e.to_string(), "(result gt 'it''s')");
    }
}
