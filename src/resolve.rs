//! Operand typing shared by the relational compiler and the in-memory
//! evaluator.
//!
//! Both evaluators produce [`Compiled`] values over their own scalar type and
//! hand every typing decision to this module: which sub-field of a composite
//! is used, when a number is read as text, and how comparison and arithmetic
//! operands are paired. Decisions depend only on operand kinds, never on
//! row values, so a filter types identically in both evaluators.

use crate::error::{QueryError, Result};
use crate::model::{Property, KEY_BOOLEAN, KEY_END, KEY_JSON, KEY_NUMBER, KEY_START, KEY_STRING};
use crate::time::{plan_arithmetic, ArithmeticOp, Plan, Relation, Shape};
use crate::types::Kind;
use indexmap::IndexMap;
use std::fmt;
use tracing::trace;

/// Expected operand category of a function parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Number,
    String,
    Boolean,
    /// Values with a total order that are not numbers.
    Comparable,
    Geometry,
    Time,
}

impl Category {
    pub fn accepts(self, kind: Kind) -> bool {
        match self {
            Category::Number => kind == Kind::Number,
            Category::String => kind == Kind::String,
            Category::Boolean => kind == Kind::Boolean,
            Category::Comparable => matches!(
                kind,
                Kind::String | Kind::Boolean | Kind::Date | Kind::TimeOfDay
            ),
            Category::Geometry => kind == Kind::Geometry,
            Category::Time => kind == Kind::Time,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A scalar produced by one of the evaluators.
pub trait Operand: Clone + fmt::Debug {
    fn kind(&self) -> Kind;

    /// Shape of a time-kind operand.
    fn time_shape(&self) -> Option<Shape>;

    /// Implicit text view of a stored number; `None` for anything else.
    fn coerce_to_string(&self) -> Option<Self>;

    /// Explicit text cast, used when the other side of a comparison is text.
    fn cast_to_string(&self) -> Result<Self>;

    /// Fold `{start, end}` instants into one interval operand.
    fn interval(start: Self, end: Self) -> Result<Self>;

    /// The `{n, b, s, j}` views of the value at `keys` inside this JSON
    /// operand.
    fn document_path(&self, keys: &[String]) -> Result<Composite<Self>>;
}

/// Several physical columns standing for one logical property, keyed by
/// sub-field name in a fixed order.
#[derive(Clone, Debug)]
pub struct Composite<F> {
    fields: IndexMap<&'static str, F>,
    document: bool,
}

impl<F> Composite<F> {
    pub fn new() -> Self {
        Self {
            fields: IndexMap::new(),
            document: false,
        }
    }

    /// A composite over a path inside a JSON document.
    pub fn document() -> Self {
        Self {
            fields: IndexMap::new(),
            document: true,
        }
    }

    pub fn insert(&mut self, key: &'static str, field: F) {
        self.fields.insert(key, field);
    }

    pub fn with(mut self, key: &'static str, field: F) -> Self {
        self.insert(key, field);
        self
    }

    pub fn get(&self, key: &str) -> Option<&F> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_document(&self) -> bool {
        self.document
    }

    pub fn is_interval(&self) -> bool {
        self.contains_key(KEY_START) && self.contains_key(KEY_END)
    }

    pub fn first(&self) -> Option<&F> {
        self.fields.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &F)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn into_values(self) -> impl Iterator<Item = F> {
        self.fields.into_values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<F> Default for Composite<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of compiling one expression node.
#[derive(Clone, Debug)]
pub enum Compiled<F> {
    Scalar(F),
    Composite(Composite<F>),
}

impl<F: Operand> Compiled<F> {
    /// The scalar, if this is one.
    pub fn as_scalar(&self) -> Option<&F> {
        match self {
            Compiled::Scalar(f) => Some(f),
            Compiled::Composite(_) => None,
        }
    }

    fn is_time(&self) -> bool {
        matches!(self, Compiled::Scalar(f) if f.kind() == Kind::Time)
    }

    fn document(&self) -> Option<&Composite<F>> {
        match self {
            Compiled::Composite(c) if c.is_document() => Some(c),
            _ => None,
        }
    }

    /// Resolve to a single scalar of the expected category.
    ///
    /// A composite is tried sub-field by sub-field in order, first without
    /// and then with coercion.
    pub fn resolve_as(&self, expected: Category) -> Result<F> {
        match self {
            Compiled::Scalar(field) => check(expected, field, true),
            Compiled::Composite(composite) => {
                for (key, field) in composite.iter() {
                    match check(expected, field, false) {
                        Ok(found) => return Ok(found),
                        Err(_) => trace!(sub_field = key, %expected, "exact match failed"),
                    }
                }
                for (key, field) in composite.iter() {
                    match check(expected, field, true) {
                        Ok(found) => return Ok(found),
                        Err(_) => trace!(sub_field = key, %expected, "coerced match failed"),
                    }
                }
                Err(QueryError::NoCompatibleSubField(expected.to_string()))
            }
        }
    }

    /// Explicit text cast; a composite casts its first sub-field.
    pub fn cast_to_string(&self) -> Result<F> {
        match self {
            Compiled::Scalar(field) => field.cast_to_string(),
            Compiled::Composite(composite) => composite
                .first()
                .ok_or_else(|| QueryError::NoCompatibleSubField(Category::String.to_string()))?
                .cast_to_string(),
        }
    }
}

fn check<F: Operand>(expected: Category, field: &F, can_cast: bool) -> Result<F> {
    if expected.accepts(field.kind()) {
        return Ok(field.clone());
    }
    if can_cast && expected == Category::String {
        if let Some(cast) = field.coerce_to_string() {
            return Ok(cast);
        }
    }
    Err(QueryError::Conversion {
        from: field.kind().to_string(),
        to: expected.to_string(),
    })
}

/// Document keys following an entity property in a path.
///
/// Only custom segments may follow an entity property.
pub fn document_keys(rest: &[Property]) -> Result<Vec<String>> {
    rest.iter()
        .map(|p| match p {
            Property::Custom(name) => Ok(name.clone()),
            other => Err(QueryError::InvalidPropertyPath(format!(
                "{} can not follow an entity property",
                other
            ))),
        })
        .collect()
}

/// Shape the columns of one entity property.
///
/// A single column is returned as is. With several columns the first
/// following key selects a sub-field when one has that name; otherwise the
/// keys descend into the `j` sub-field when there is one. Without keys an
/// interval folds into one time operand and anything else stays composite.
pub fn shape_property<F: Operand>(columns: Composite<F>, keys: &[String]) -> Result<Compiled<F>> {
    let descend = |field: &F, keys: &[String]| -> Result<Compiled<F>> {
        if keys.is_empty() {
            return Ok(Compiled::Scalar(field.clone()));
        }
        if field.kind() != Kind::Json {
            return Err(QueryError::InvalidPropertyPath(format!(
                "a {} value has no sub-property '{}'",
                field.kind(),
                keys[0]
            )));
        }
        Ok(Compiled::Composite(field.document_path(keys)?))
    };
    if columns.len() == 1 {
        let field = columns
            .first()
            .ok_or_else(|| QueryError::InvalidPropertyPath("property without columns".to_string()))?;
        return descend(field, keys);
    }
    let Some((head, tail)) = keys.split_first() else {
        if columns.is_interval() {
            if let (Some(start), Some(end)) = (columns.get(KEY_START), columns.get(KEY_END)) {
                return Ok(Compiled::Scalar(F::interval(start.clone(), end.clone())?));
            }
        }
        return Ok(Compiled::Composite(columns));
    };
    if let Some(field) = columns.get(head) {
        return descend(field, tail);
    }
    if let Some(json) = columns.get(KEY_JSON) {
        return descend(json, keys);
    }
    Err(QueryError::InvalidPropertyPath(format!(
        "unknown sub-property '{}'",
        head
    )))
}

/// Check the shapes of two time operands related by `relation`.
///
/// Durations only compare with durations, and never take part in the
/// interval relations.
pub fn check_time_operands<F: Operand>(relation: Relation, left: &F, right: &F) -> Result<()> {
    let is_duration = |f: &F| f.time_shape() == Some(Shape::Duration);
    let ordering = matches!(
        relation,
        Relation::Eq | Relation::Ne | Relation::Gt | Relation::Ge | Relation::Lt | Relation::Le
    );
    match (is_duration(left), is_duration(right)) {
        (false, false) => Ok(()),
        (true, true) if ordering => Ok(()),
        _ => Err(QueryError::IncompatibleOperands(format!(
            "{:?} between {:?} and {:?}",
            relation,
            left.time_shape(),
            right.time_shape()
        ))),
    }
}

/// Type `a mod b`: both numeric, never time values.
pub fn plan_modulo<F: Operand>(a: &Compiled<F>, b: &Compiled<F>) -> Result<(F, F)> {
    if a.is_time() || b.is_time() {
        return Err(QueryError::Unsupported(
            "modulo is not defined for time values".to_string(),
        ));
    }
    Ok((a.resolve_as(Category::Number)?, b.resolve_as(Category::Number)?))
}

/// Two operands resolved to a common category.
#[derive(Clone, Debug)]
pub struct Pair<F> {
    pub category: Category,
    pub left: F,
    pub right: F,
}

/// Pair two operands for a binary comparison.
///
/// Tried in order: both numbers, both booleans, both strings, one string
/// with the other cast to text, both comparable.
pub fn resolve_pair<F: Operand>(a: &Compiled<F>, b: &Compiled<F>) -> Result<Pair<F>> {
    let pair = |category, left, right| Pair {
        category,
        left,
        right,
    };
    for category in [Category::Number, Category::Boolean] {
        if let (Ok(left), Ok(right)) = (a.resolve_as(category), b.resolve_as(category)) {
            return Ok(pair(category, left, right));
        }
    }
    match (a.resolve_as(Category::String), b.resolve_as(Category::String)) {
        (Ok(left), Ok(right)) => return Ok(pair(Category::String, left, right)),
        (Ok(left), Err(_)) => return Ok(pair(Category::String, left, b.cast_to_string()?)),
        (Err(_), Ok(right)) => return Ok(pair(Category::String, a.cast_to_string()?, right)),
        (Err(_), Err(_)) => {}
    }
    let left = a.resolve_as(Category::Comparable)?;
    let right = b.resolve_as(Category::Comparable)?;
    if left.kind() != right.kind() {
        return Err(QueryError::IncompatibleOperands(format!(
            "{} and {}",
            left.kind(),
            right.kind()
        )));
    }
    Ok(pair(Category::Comparable, left, right))
}

/// How a comparison is evaluated.
#[derive(Clone, Debug)]
pub enum ComparisonPlan<F> {
    /// Temporal relation between two time values.
    Time { relation: Relation, left: F, right: F },
    /// Plain ordering; `numeric` selects numeric comparison.
    Ordered {
        relation: Relation,
        numeric: bool,
        left: F,
        right: F,
    },
}

/// Type a comparison (`eq`, `ne`, `gt`, `ge`, `lt`, `le`).
pub fn plan_comparison<F: Operand>(
    relation: Relation,
    a: &Compiled<F>,
    b: &Compiled<F>,
) -> Result<ComparisonPlan<F>> {
    if let Compiled::Scalar(left) = a {
        if a.is_time() {
            let right = b.resolve_as(Category::Time)?;
            return Ok(ComparisonPlan::Time {
                relation,
                left: left.clone(),
                right,
            });
        }
    }
    if let Compiled::Scalar(right) = b {
        if b.is_time() {
            let left = a.resolve_as(Category::Time)?;
            return Ok(ComparisonPlan::Time {
                relation: relation.mirrored(),
                left: right.clone(),
                right: left,
            });
        }
    }
    if let Some(document) = a.document() {
        if let Some(plan) = document_comparison(relation, document, b) {
            return Ok(plan);
        }
    }
    if let Some(document) = b.document() {
        if let Some(plan) = document_comparison(relation.mirrored(), document, a) {
            return Ok(plan);
        }
    }
    let pair = resolve_pair(a, b)?;
    Ok(ComparisonPlan::Ordered {
        relation,
        numeric: pair.category == Category::Number,
        left: pair.left,
        right: pair.right,
    })
}

/// A document value compares through the sub-field matching the kind of
/// the other operand.
fn document_comparison<F: Operand>(
    relation: Relation,
    document: &Composite<F>,
    other: &Compiled<F>,
) -> Option<ComparisonPlan<F>> {
    let other = other.as_scalar()?;
    let key = match other.kind() {
        Kind::Number => KEY_NUMBER,
        Kind::String => KEY_STRING,
        Kind::Boolean => KEY_BOOLEAN,
        _ => return None,
    };
    let left = document.get(key)?.clone();
    Some(ComparisonPlan::Ordered {
        relation,
        numeric: other.kind() == Kind::Number,
        left,
        right: other.clone(),
    })
}

/// How an arithmetic expression is evaluated.
#[derive(Clone, Debug)]
pub enum ArithmeticPlan<F> {
    Time { plan: Plan, left: F, right: F },
    Numeric { left: F, right: F },
}

/// Type `a op b` for add, sub, mul and div.
pub fn plan_arithmetic_operands<F: Operand>(
    op: ArithmeticOp,
    a: &Compiled<F>,
    b: &Compiled<F>,
) -> Result<ArithmeticPlan<F>> {
    let (a_time, b_time) = (a.is_time(), b.is_time());
    if !a_time && !b_time {
        return Ok(ArithmeticPlan::Numeric {
            left: a.resolve_as(Category::Number)?,
            right: b.resolve_as(Category::Number)?,
        });
    }
    if !a_time && matches!(op, ArithmeticOp::Sub | ArithmeticOp::Div) {
        return Err(QueryError::Unsupported(format!(
            "{:?} with a time value on the right-hand side",
            op
        )));
    }
    let operand = |c: &Compiled<F>, is_time: bool| -> Result<(F, Shape)> {
        if is_time {
            let f = c.resolve_as(Category::Time)?;
            let shape = f.time_shape().ok_or_else(|| QueryError::Conversion {
                from: f.kind().to_string(),
                to: Category::Time.to_string(),
            })?;
            Ok((f, shape))
        } else {
            Ok((c.resolve_as(Category::Number)?, Shape::Number))
        }
    };
    let (left, left_shape) = operand(a, a_time)?;
    let (right, right_shape) = operand(b, b_time)?;
    let plan = plan_arithmetic(op, left_shape, right_shape)?;
    Ok(ArithmeticPlan::Time { plan, left, right })
}
