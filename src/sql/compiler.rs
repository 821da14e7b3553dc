//! Expression compiler producing SQL conditions and fields.
//!
//! Paths are resolved against the base table, adding one join per distinct
//! navigation prefix. Every typing decision goes through [`crate::resolve`],
//! which the in-memory evaluator shares.

use super::expr::{BinaryOp, SqlExpr, SqlType, SqlValue};
use super::schema::{self, Link, ID_COLUMN};
use crate::error::{QueryError, Result};
use crate::expression::{Constant, Expression, Function, FunctionKind};
use crate::model::{
    EntityProperty, EntityType, NavigationProperty, Property, Storage, KEY_BOOLEAN, KEY_JSON,
    KEY_NUMBER, KEY_STRING,
};
use crate::resolve::{
    check_time_operands, document_keys, plan_arithmetic_operands, plan_comparison, plan_modulo,
    shape_property, ArithmeticPlan, Category, Compiled, ComparisonPlan, Composite, Operand,
};
use crate::time::{max_datetime, min_datetime, relate, Plan, Relation, Shape, Span, TimeAlgebra};
use crate::types::{IdManager, Kind};
use chrono::Utc;
use std::collections::HashMap;

/// A typed SQL value expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlField {
    Number(SqlExpr),
    String(SqlExpr),
    Boolean(SqlExpr),
    Geometry(SqlExpr),
    Json(SqlExpr),
    Date(SqlExpr),
    TimeOfDay(SqlExpr),
    /// `offset_minutes` is only known for literals.
    Instant {
        expr: SqlExpr,
        offset_minutes: Option<i32>,
    },
    Interval {
        start: SqlExpr,
        end: SqlExpr,
    },
    Duration(SqlExpr),
}

impl SqlField {
    fn instant(expr: SqlExpr) -> Self {
        SqlField::Instant {
            expr,
            offset_minutes: None,
        }
    }

    /// The expressions making up this value, start before end.
    pub fn exprs(&self) -> Vec<&SqlExpr> {
        match self {
            SqlField::Interval { start, end } => vec![start, end],
            SqlField::Number(e)
            | SqlField::String(e)
            | SqlField::Boolean(e)
            | SqlField::Geometry(e)
            | SqlField::Json(e)
            | SqlField::Date(e)
            | SqlField::TimeOfDay(e)
            | SqlField::Duration(e)
            | SqlField::Instant { expr: e, .. } => vec![e],
        }
    }

    /// The single expression of a non-interval value; an interval yields
    /// its start.
    pub fn into_expr(self) -> SqlExpr {
        match self {
            SqlField::Interval { start, .. } => start,
            SqlField::Number(e)
            | SqlField::String(e)
            | SqlField::Boolean(e)
            | SqlField::Geometry(e)
            | SqlField::Json(e)
            | SqlField::Date(e)
            | SqlField::TimeOfDay(e)
            | SqlField::Duration(e)
            | SqlField::Instant { expr: e, .. } => e,
        }
    }
}

fn conversion(from: Kind, to: impl ToString) -> QueryError {
    QueryError::Conversion {
        from: from.to_string(),
        to: to.to_string(),
    }
}

impl Operand for SqlField {
    fn kind(&self) -> Kind {
        match self {
            SqlField::Number(_) => Kind::Number,
            SqlField::String(_) => Kind::String,
            SqlField::Boolean(_) => Kind::Boolean,
            SqlField::Geometry(_) => Kind::Geometry,
            SqlField::Json(_) => Kind::Json,
            SqlField::Date(_) => Kind::Date,
            SqlField::TimeOfDay(_) => Kind::TimeOfDay,
            SqlField::Instant { .. } | SqlField::Interval { .. } | SqlField::Duration(_) => {
                Kind::Time
            }
        }
    }

    fn time_shape(&self) -> Option<Shape> {
        match self {
            SqlField::Instant { .. } => Some(Shape::Instant),
            SqlField::Interval { .. } => Some(Shape::Interval),
            SqlField::Duration(_) => Some(Shape::Duration),
            _ => None,
        }
    }

    fn coerce_to_string(&self) -> Option<Self> {
        match self {
            SqlField::Number(e) if e.is_column() => {
                Some(SqlField::String(SqlExpr::cast(e.clone(), SqlType::Text)))
            }
            _ => None,
        }
    }

    fn cast_to_string(&self) -> Result<Self> {
        match self {
            SqlField::String(_) => Ok(self.clone()),
            SqlField::Number(e) | SqlField::Boolean(e) | SqlField::Json(e) => {
                Ok(SqlField::String(SqlExpr::cast(e.clone(), SqlType::Text)))
            }
            other => Err(conversion(other.kind(), Kind::String)),
        }
    }

    fn interval(start: Self, end: Self) -> Result<Self> {
        match (start, end) {
            (SqlField::Instant { expr: start, .. }, SqlField::Instant { expr: end, .. }) => {
                Ok(SqlField::Interval { start, end })
            }
            (other, _) => Err(conversion(other.kind(), "Interval")),
        }
    }

    fn document_path(&self, keys: &[String]) -> Result<Composite<Self>> {
        let SqlField::Json(base) = self else {
            return Err(conversion(self.kind(), Kind::Json));
        };
        let node = |text| SqlExpr::JsonPath {
            base: Box::new(base.clone()),
            path: keys.to_vec(),
            text,
        };
        let typed = |json_type: &str, then: SqlExpr| SqlExpr::Case {
            when: Box::new(SqlExpr::binary(
                BinaryOp::Eq,
                SqlExpr::func("jsonb_typeof", vec![node(false)]),
                SqlExpr::Literal(SqlValue::Text(json_type.to_string())),
            )),
            then: Box::new(then),
        };
        Ok(Composite::document()
            .with(
                KEY_NUMBER,
                SqlField::Number(typed("number", SqlExpr::cast(node(true), SqlType::Numeric))),
            )
            .with(
                KEY_BOOLEAN,
                SqlField::Boolean(typed("boolean", SqlExpr::cast(node(true), SqlType::Boolean))),
            )
            .with(KEY_STRING, SqlField::String(typed("string", node(true))))
            .with(KEY_JSON, SqlField::Json(node(false))))
    }
}

struct SqlAlgebra;

impl TimeAlgebra for SqlAlgebra {
    type Instant = SqlExpr;
    type Truth = SqlExpr;

    fn lt(&self, a: &SqlExpr, b: &SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Lt, a.clone(), b.clone())
    }

    fn le(&self, a: &SqlExpr, b: &SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Le, a.clone(), b.clone())
    }

    fn eq(&self, a: &SqlExpr, b: &SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Eq, a.clone(), b.clone())
    }

    fn and(&self, a: SqlExpr, b: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::And, a, b)
    }

    fn or(&self, a: SqlExpr, b: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Or, a, b)
    }

    fn not(&self, a: SqlExpr) -> SqlExpr {
        SqlExpr::negate(a)
    }
}

fn span(field: SqlField) -> Result<Span<SqlExpr>> {
    match field {
        SqlField::Instant { expr, .. } | SqlField::Duration(expr) => Ok(Span::instant(expr)),
        SqlField::Interval { start, end } => Ok(Span::interval(start, end)),
        other => Err(conversion(other.kind(), Category::Time)),
    }
}

/// An instant, or the start of an interval.
fn instant_of(field: SqlField) -> Result<SqlExpr> {
    match field {
        SqlField::Instant { expr, .. } => Ok(expr),
        SqlField::Interval { start, .. } => Ok(start),
        other => Err(conversion(other.kind(), "Instant")),
    }
}

fn comparison_op(relation: Relation) -> BinaryOp {
    match relation {
        Relation::Ne => BinaryOp::Ne,
        Relation::Gt => BinaryOp::Gt,
        Relation::Ge => BinaryOp::Ge,
        Relation::Lt => BinaryOp::Lt,
        Relation::Le => BinaryOp::Le,
        _ => BinaryOp::Eq,
    }
}

fn constant_field(constant: &Constant) -> SqlField {
    let lit = SqlExpr::Literal;
    match constant {
        Constant::Boolean(b) => SqlField::Boolean(lit(SqlValue::Bool(*b))),
        Constant::Integer(v) => SqlField::Number(lit(SqlValue::Long(*v))),
        Constant::Double(v) => SqlField::Number(lit(SqlValue::Double(*v))),
        Constant::Decimal(v) => SqlField::Number(lit(SqlValue::Decimal(*v))),
        Constant::String(s) => SqlField::String(lit(SqlValue::Text(s.clone()))),
        Constant::DateTime(t) => SqlField::Instant {
            expr: lit(SqlValue::Timestamp(t.with_timezone(&Utc))),
            offset_minutes: Some(t.offset().local_minus_utc() / 60),
        },
        Constant::Date(d) => SqlField::Date(lit(SqlValue::Date(*d))),
        Constant::TimeOfDay(t) => SqlField::TimeOfDay(lit(SqlValue::Time(*t))),
        Constant::Duration(d) => SqlField::Duration(lit(SqlValue::Interval(*d))),
        Constant::Interval(a, b) => SqlField::Interval {
            start: lit(SqlValue::Timestamp(a.with_timezone(&Utc))),
            end: lit(SqlValue::Timestamp(b.with_timezone(&Utc))),
        },
        Constant::Geometry(g) => {
            SqlField::Geometry(lit(SqlValue::Geometry(format!("SRID=4326;{}", g.to_wkt()))))
        }
    }
}

/// An inner join added while resolving a navigation.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub table: &'static str,
    pub alias: String,
    pub on: SqlExpr,
}

/// Tables reachable from the base table, one alias per navigation prefix.
#[derive(Debug)]
pub struct Scope {
    base: EntityType,
    joins: Vec<Join>,
    aliases: HashMap<Vec<NavigationProperty>, (String, EntityType)>,
    next_alias: usize,
    to_many: bool,
}

impl Scope {
    pub const BASE_ALIAS: &'static str = "e0";

    fn new(base: EntityType) -> Self {
        Self {
            base,
            joins: Vec::new(),
            aliases: HashMap::new(),
            next_alias: 1,
            to_many: false,
        }
    }

    fn fresh_alias(&mut self) -> String {
        let alias = format!("e{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn join(&mut self, prefix: &[NavigationProperty], from: &str, link: Link) -> (String, EntityType) {
        if let Some(found) = self.aliases.get(prefix) {
            return found.clone();
        }
        let target = prefix.last().map_or(self.base, |n| n.target());
        let table = schema::table(target);
        let (alias, on) = match link {
            Link::Forward { foreign_key } => {
                let alias = self.fresh_alias();
                let on = SqlExpr::binary(
                    BinaryOp::Eq,
                    SqlExpr::column(alias.clone(), ID_COLUMN),
                    SqlExpr::column(from, foreign_key),
                );
                (alias, on)
            }
            Link::Reverse { foreign_key } => {
                let alias = self.fresh_alias();
                let on = SqlExpr::binary(
                    BinaryOp::Eq,
                    SqlExpr::column(alias.clone(), foreign_key),
                    SqlExpr::column(from, ID_COLUMN),
                );
                (alias, on)
            }
            Link::Junction {
                table: junction,
                source_key,
                target_key,
            } => {
                let via = self.fresh_alias();
                self.joins.push(Join {
                    table: junction,
                    alias: via.clone(),
                    on: SqlExpr::binary(
                        BinaryOp::Eq,
                        SqlExpr::column(via.clone(), source_key),
                        SqlExpr::column(from, ID_COLUMN),
                    ),
                });
                let alias = self.fresh_alias();
                let on = SqlExpr::binary(
                    BinaryOp::Eq,
                    SqlExpr::column(alias.clone(), ID_COLUMN),
                    SqlExpr::column(via, target_key),
                );
                (alias, on)
            }
        };
        self.joins.push(Join {
            table,
            alias: alias.clone(),
            on,
        });
        self.to_many |= link.is_to_many();
        self.aliases.insert(prefix.to_vec(), (alias.clone(), target));
        (alias, target)
    }

    pub fn base(&self) -> EntityType {
        self.base
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Whether a join may multiply base rows.
    pub fn is_to_many(&self) -> bool {
        self.to_many
    }
}

/// Compiles expressions over one base entity type.
pub struct Compiler<'a> {
    ids: &'a dyn IdManager,
    scope: Scope,
}

impl<'a> Compiler<'a> {
    pub fn new(ids: &'a dyn IdManager, base: EntityType) -> Self {
        Self {
            ids,
            scope: Scope::new(base),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn into_scope(self) -> Scope {
        self.scope
    }

    /// Compile a boolean condition.
    pub fn compile_filter(&mut self, expression: &Expression) -> Result<SqlExpr> {
        Ok(self
            .compile(expression)?
            .resolve_as(Category::Boolean)?
            .into_expr())
    }

    /// Sort keys for one order-by expression, in sub-field order.
    pub fn compile_order(&mut self, expression: &Expression) -> Result<Vec<SqlExpr>> {
        let fields = match self.compile(expression)? {
            Compiled::Scalar(field) => vec![field],
            Compiled::Composite(composite) => composite.into_values().collect(),
        };
        Ok(fields
            .iter()
            .flat_map(|f| f.exprs().into_iter().cloned())
            .collect())
    }

    pub fn compile(&mut self, expression: &Expression) -> Result<Compiled<SqlField>> {
        match expression {
            Expression::Constant(c) => Ok(Compiled::Scalar(constant_field(c))),
            Expression::Path(properties) => self.compile_path(properties),
            Expression::Function(function) => self.compile_function(function).map(Compiled::Scalar),
        }
    }

    fn stored(&self, expr: SqlExpr, storage: Storage) -> SqlField {
        match storage {
            Storage::Id if self.ids.kind() == Kind::Number => SqlField::Number(expr),
            Storage::Id | Storage::String => SqlField::String(expr),
            Storage::Number => SqlField::Number(expr),
            Storage::Boolean => SqlField::Boolean(expr),
            Storage::Json => SqlField::Json(expr),
            Storage::Geometry => SqlField::Geometry(expr),
            Storage::Instant => SqlField::instant(expr),
        }
    }

    fn compile_path(&mut self, properties: &[Property]) -> Result<Compiled<SqlField>> {
        let mut alias = Scope::BASE_ALIAS.to_string();
        let mut entity_type = self.scope.base;
        let mut prefix = Vec::new();
        for (i, property) in properties.iter().enumerate() {
            match property {
                Property::Navigation(navigation) => {
                    let link = schema::link(entity_type, *navigation).ok_or_else(|| {
                        QueryError::InvalidPropertyPath(format!(
                            "{} has no navigation property {}",
                            entity_type, navigation
                        ))
                    })?;
                    // The id of a to-one target is the foreign key itself.
                    if let (Link::Forward { foreign_key }, [Property::Entity(EntityProperty::Id)]) =
                        (link, &properties[i + 1..])
                    {
                        let column = SqlExpr::column(alias, foreign_key);
                        return Ok(Compiled::Scalar(self.stored(column, Storage::Id)));
                    }
                    prefix.push(*navigation);
                    let (next, target) = self.scope.join(&prefix, &alias, link);
                    alias = next;
                    entity_type = target;
                }
                Property::Entity(p) => {
                    return self.compile_property(&alias, entity_type, *p, &properties[i + 1..])
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

    fn compile_property(
        &self,
        alias: &str,
        entity_type: EntityType,
        property: EntityProperty,
        rest: &[Property],
    ) -> Result<Compiled<SqlField>> {
        if !entity_type.has_property(property) {
            return Err(QueryError::InvalidPropertyPath(format!(
                "{} has no property {}",
                entity_type, property
            )));
        }
        let keys = document_keys(rest)?;
        let mut columns = Composite::new();
        for sub in property.sub_fields(entity_type) {
            let column = schema::column(entity_type, property, sub.key).ok_or_else(|| {
                QueryError::InvalidPropertyPath(format!("{}/{} is not stored", property, sub.key))
            })?;
            columns.insert(sub.key, self.stored(SqlExpr::column(alias, column), sub.storage));
        }
        shape_property(columns, &keys)
    }

    fn compile_function(&mut self, function: &Function) -> Result<SqlField> {
        use FunctionKind as K;
        let kind = function.kind();
        let args = function.args();
        match kind {
            K::Now => return Ok(SqlField::instant(SqlExpr::Now)),
            K::MinDateTime => {
                return Ok(SqlField::instant(SqlExpr::Literal(SqlValue::Timestamp(
                    min_datetime(),
                ))))
            }
            K::MaxDateTime => {
                return Ok(SqlField::instant(SqlExpr::Literal(SqlValue::Timestamp(
                    max_datetime(),
                ))))
            }
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
            .map(|a| self.compile(a))
            .collect::<Result<Vec<_>>>()?;
        let arg = |i: usize, category: Category| -> Result<SqlExpr> {
            Ok(compiled[i].resolve_as(category)?.into_expr())
        };
        let boolean = |name: &'static str| -> Result<SqlField> {
            Ok(SqlField::Boolean(SqlExpr::func(
                name,
                vec![arg(0, Category::Geometry)?, arg(1, Category::Geometry)?],
            )))
        };
        let date_part = |part: &'static str| -> Result<SqlExpr> {
            let at = instant_of(compiled[0].resolve_as(Category::Time)?)?;
            Ok(SqlExpr::Extract {
                part,
                expr: Box::new(SqlExpr::AtUtc(Box::new(at))),
            })
        };
        let string_pos = |haystack: usize, needle: usize| -> Result<SqlExpr> {
            Ok(SqlExpr::func(
                "STRPOS",
                vec![arg(haystack, Category::String)?, arg(needle, Category::String)?],
            ))
        };
        let literal = |v: i64| SqlExpr::Literal(SqlValue::Long(v));

        let field = match kind {
            K::Eq | K::Ne | K::Gt | K::Ge | K::Lt | K::Le => {
                let relation = kind.relation().unwrap_or(Relation::Eq);
                SqlField::Boolean(compare(relation, &compiled[0], &compiled[1])?)
            }
            K::Before | K::After | K::Meets | K::During | K::Overlaps | K::Starts | K::Finishes => {
                let relation = kind.relation().unwrap_or(Relation::Eq);
                let left = compiled[0].resolve_as(Category::Time)?;
                let right = compiled[1].resolve_as(Category::Time)?;
                check_time_operands(relation, &left, &right)?;
                SqlField::Boolean(relate(&SqlAlgebra, relation, &span(left)?, &span(right)?)?)
            }
            K::And | K::Or => {
                let op = if kind == K::And { BinaryOp::And } else { BinaryOp::Or };
                SqlField::Boolean(SqlExpr::binary(
                    op,
                    arg(0, Category::Boolean)?,
                    arg(1, Category::Boolean)?,
                ))
            }
            K::Not => SqlField::Boolean(SqlExpr::negate(arg(0, Category::Boolean)?)),
            K::Add | K::Sub | K::Mul | K::Div => {
                let op = kind.arithmetic().ok_or_else(|| {
                    QueryError::Unsupported(format!("{} is not arithmetic", kind))
                })?;
                arithmetic(plan_arithmetic_operands(op, &compiled[0], &compiled[1])?, kind)?
            }
            K::Mod => {
                let (left, right) = plan_modulo(&compiled[0], &compiled[1])?;
                SqlField::Number(SqlExpr::binary(
                    BinaryOp::Mod,
                    SqlExpr::cast(left.into_expr(), SqlType::Numeric),
                    SqlExpr::cast(right.into_expr(), SqlType::Numeric),
                ))
            }
            K::Concat => SqlField::String(SqlExpr::binary(
                BinaryOp::Concat,
                arg(0, Category::String)?,
                arg(1, Category::String)?,
            )),
            K::Length => SqlField::Number(SqlExpr::func("LENGTH", vec![arg(0, Category::String)?])),
            K::Substring => {
                let from = SqlExpr::cast(
                    SqlExpr::binary(
                        BinaryOp::Add,
                        SqlExpr::cast(arg(1, Category::Number)?, SqlType::Integer),
                        literal(1),
                    ),
                    SqlType::Integer,
                );
                let mut call = vec![arg(0, Category::String)?, from];
                if compiled.len() == 3 {
                    call.push(SqlExpr::cast(arg(2, Category::Number)?, SqlType::Integer));
                }
                SqlField::String(SqlExpr::func("SUBSTR", call))
            }
            K::IndexOf => {
                SqlField::Number(SqlExpr::binary(BinaryOp::Sub, string_pos(0, 1)?, literal(1)))
            }
            K::StartsWith => {
                SqlField::Boolean(SqlExpr::binary(BinaryOp::Eq, string_pos(0, 1)?, literal(1)))
            }
            K::EndsWith => {
                let needle = arg(1, Category::String)?;
                SqlField::Boolean(SqlExpr::binary(
                    BinaryOp::Eq,
                    SqlExpr::func(
                        "RIGHT",
                        vec![
                            arg(0, Category::String)?,
                            SqlExpr::func("LENGTH", vec![needle.clone()]),
                        ],
                    ),
                    needle,
                ))
            }
            K::Contains => {
                SqlField::Boolean(SqlExpr::binary(BinaryOp::Gt, string_pos(0, 1)?, literal(0)))
            }
            K::SubstringOf => {
                SqlField::Boolean(SqlExpr::binary(BinaryOp::Gt, string_pos(1, 0)?, literal(0)))
            }
            K::Trim => SqlField::String(SqlExpr::func("TRIM", vec![arg(0, Category::String)?])),
            K::ToLower => SqlField::String(SqlExpr::func("LOWER", vec![arg(0, Category::String)?])),
            K::ToUpper => SqlField::String(SqlExpr::func("UPPER", vec![arg(0, Category::String)?])),
            K::Floor => SqlField::Number(SqlExpr::func("FLOOR", vec![arg(0, Category::Number)?])),
            K::Ceiling => SqlField::Number(SqlExpr::func("CEIL", vec![arg(0, Category::Number)?])),
            K::Round => SqlField::Number(SqlExpr::func("ROUND", vec![arg(0, Category::Number)?])),
            K::Year => SqlField::Number(date_part("YEAR")?),
            K::Month => SqlField::Number(date_part("MONTH")?),
            K::Day => SqlField::Number(date_part("DAY")?),
            K::Hour => SqlField::Number(date_part("HOUR")?),
            K::Minute => SqlField::Number(date_part("MINUTE")?),
            K::Second => SqlField::Number(SqlExpr::func("FLOOR", vec![date_part("SECOND")?])),
            K::FractionalSeconds => {
                let seconds = date_part("SECOND")?;
                SqlField::Number(SqlExpr::binary(
                    BinaryOp::Sub,
                    seconds.clone(),
                    SqlExpr::func("FLOOR", vec![seconds]),
                ))
            }
            K::Date | K::Time => {
                let at = instant_of(compiled[0].resolve_as(Category::Time)?)?;
                let utc = SqlExpr::AtUtc(Box::new(at));
                if kind == K::Date {
                    SqlField::Date(SqlExpr::cast(utc, SqlType::Date))
                } else {
                    SqlField::TimeOfDay(SqlExpr::cast(utc, SqlType::Time))
                }
            }
            K::TotalOffsetMinutes => match compiled[0].resolve_as(Category::Time)? {
                SqlField::Instant { offset_minutes, .. } => {
                    SqlField::Number(literal(i64::from(offset_minutes.unwrap_or(0))))
                }
                SqlField::Interval { .. } => SqlField::Number(literal(0)),
                other => return Err(conversion(other.kind(), "Instant")),
            },
            K::GeoDistance => SqlField::Number(SqlExpr::func(
                "ST_Distance",
                vec![arg(0, Category::Geometry)?, arg(1, Category::Geometry)?],
            )),
            K::GeoLength => {
                SqlField::Number(SqlExpr::func("ST_Length", vec![arg(0, Category::Geometry)?]))
            }
            K::GeoIntersects | K::StIntersects => boolean("ST_Intersects")?,
            K::StContains => boolean("ST_Contains")?,
            K::StCrosses => boolean("ST_Crosses")?,
            K::StDisjoint => boolean("ST_Disjoint")?,
            K::StEquals => boolean("ST_Equals")?,
            K::StOverlaps => boolean("ST_Overlaps")?,
            K::StTouches => boolean("ST_Touches")?,
            K::StWithin => boolean("ST_Within")?,
            K::StRelate => SqlField::Boolean(SqlExpr::func(
                "ST_Relate",
                vec![
                    arg(0, Category::Geometry)?,
                    arg(1, Category::Geometry)?,
                    SqlExpr::Literal(SqlValue::Text(pattern.unwrap_or_default())),
                ],
            )),
            K::Now | K::MinDateTime | K::MaxDateTime => {
                return Err(QueryError::Unsupported(format!("{} takes no arguments", kind)))
            }
        };
        Ok(field)
    }
}

fn compare(
    relation: Relation,
    left: &Compiled<SqlField>,
    right: &Compiled<SqlField>,
) -> Result<SqlExpr> {
    match plan_comparison(relation, left, right)? {
        ComparisonPlan::Time {
            relation,
            left,
            right,
        } => {
            check_time_operands(relation, &left, &right)?;
            relate(&SqlAlgebra, relation, &span(left)?, &span(right)?)
        }
        ComparisonPlan::Ordered {
            relation,
            numeric,
            left,
            right,
        } => {
            let textual = !numeric && left.kind() == Kind::String;
            let ordering = !matches!(relation, Relation::Eq | Relation::Ne);
            let mut l = left.into_expr();
            if textual && ordering {
                l = SqlExpr::Collate(Box::new(l));
            }
            Ok(SqlExpr::binary(comparison_op(relation), l, right.into_expr()))
        }
    }
}

fn arithmetic(plan: ArithmeticPlan<SqlField>, kind: FunctionKind) -> Result<SqlField> {
    let op = match kind {
        FunctionKind::Add => BinaryOp::Add,
        FunctionKind::Sub => BinaryOp::Sub,
        FunctionKind::Mul => BinaryOp::Mul,
        _ => BinaryOp::Div,
    };
    match plan {
        ArithmeticPlan::Numeric { left, right } => Ok(SqlField::Number(SqlExpr::binary(
            op,
            left.into_expr(),
            right.into_expr(),
        ))),
        ArithmeticPlan::Time { plan, left, right } => {
            let shift_op = |negate: bool| if negate { BinaryOp::Sub } else { BinaryOp::Add };
            match plan {
                Plan::Shift {
                    time_on_left,
                    negate,
                    ..
                } => {
                    let (time, duration) = if time_on_left { (left, right) } else { (right, left) };
                    let duration = duration.into_expr();
                    let shift = |e: SqlExpr| SqlExpr::binary(shift_op(negate), e, duration.clone());
                    Ok(match time {
                        SqlField::Interval { start, end } => SqlField::Interval {
                            start: shift(start),
                            end: shift(end),
                        },
                        other => SqlField::instant(shift(other.into_expr())),
                    })
                }
                Plan::Elapsed => Ok(SqlField::Duration(SqlExpr::binary(
                    BinaryOp::Sub,
                    instant_of(left)?,
                    instant_of(right)?,
                ))),
                Plan::Combine { negate } => Ok(SqlField::Duration(SqlExpr::binary(
                    shift_op(negate),
                    left.into_expr(),
                    right.into_expr(),
                ))),
                Plan::Scale {
                    duration_on_left,
                    divide,
                } => {
                    let (duration, factor) = if duration_on_left { (left, right) } else { (right, left) };
                    let op = if divide { BinaryOp::Div } else { BinaryOp::Mul };
                    Ok(SqlField::Duration(SqlExpr::binary(
                        op,
                        duration.into_expr(),
                        factor.into_expr(),
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_filter;
    use crate::types::{LongIdManager, StringIdManager};

    fn sql(base: EntityType, filter: &str) -> Result<(String, Vec<SqlValue>, Scope)> {
        let expression = parse_filter(filter)?;
        let mut compiler = Compiler::new(&LongIdManager, base);
        let condition = compiler.compile_filter(&expression)?;
        let mut params = Vec::new();
        let text = condition.render(&mut params);
        Ok((text, params, compiler.into_scope()))
    }

    #[test]
    fn test_numeric_literal_selects_number_sub_field() {
        let (text, params, _) = sql(EntityType::Observation, "result gt 5").unwrap();
        assert_eq!(text, r#"("e0"."RESULT_NUMBER" > $1::bigint)"#);
        assert_eq!(params, vec![SqlValue::Long(5)]);
    }

    #[test]
    fn test_string_literal_selects_string_sub_field() {
        let (text, _, _) = sql(EntityType::Observation, "result gt '5'").unwrap();
        assert_eq!(text, r#"(("e0"."RESULT_STRING" COLLATE "C") > $1::text)"#);
    }

    #[test]
    fn test_number_column_against_string_is_cast() {
        let (text, _, _) = sql(EntityType::Thing, "id eq '5'").unwrap();
        assert_eq!(text, r#"(CAST("e0"."ID" AS text) = $1::text)"#);
        assert!(matches!(
            sql(EntityType::Thing, "name eq geography'POINT (1 2)'"),
            Err(QueryError::Conversion { .. })
        ));
    }

    #[test]
    fn test_to_one_id_uses_foreign_key() {
        let (text, _, scope) = sql(EntityType::Observation, "Datastream/id eq 9").unwrap();
        assert_eq!(text, r#"("e0"."DATASTREAM_ID" = $1::bigint)"#);
        assert!(scope.joins().is_empty());
    }

    #[test]
    fn test_navigation_joins_are_shared_per_prefix() {
        let (text, _, scope) = sql(
            EntityType::Observation,
            "Datastream/name eq 'a' and Datastream/Thing/name eq 'b' and Datastream/description eq 'c'",
        )
        .unwrap();
        assert_eq!(scope.joins().len(), 2);
        assert!(!scope.is_to_many());
        assert!(text.contains(r#""e1"."NAME""#));
        assert!(text.contains(r#""e2"."NAME""#));
        assert_eq!(scope.joins()[1].table, "THINGS");

        let (_, _, scope) = sql(EntityType::Thing, "Locations/name eq 'x'").unwrap();
        assert_eq!(scope.joins().len(), 2);
        assert_eq!(scope.joins()[0].table, "THINGS_LOCATIONS");
        assert!(scope.is_to_many());
    }

    #[test]
    fn test_interval_comparison() {
        let (text, _, _) = sql(
            EntityType::Observation,
            "phenomenonTime lt 2020-01-01T00:00:00Z",
        )
        .unwrap();
        assert_eq!(text, r#"("e0"."PHENOMENON_TIME_END" <= $1::timestamptz)"#);

        // Literal on the left.
        let (text, _, _) =
            sql(EntityType::Observation, "2020-01-01T00:00:00Z gt resultTime").unwrap();
        assert_eq!(text, r#"("e0"."RESULT_TIME" < $1::timestamptz)"#);
    }

    #[test]
    fn test_document_paths() {
        let (text, params, _) =
            sql(EntityType::Thing, "properties/building/floor eq 3").unwrap();
        assert_eq!(
            text,
            "(CASE WHEN (jsonb_typeof((\"e0\".\"PROPERTIES\" #> $1::text[])) = $2::text) \
             THEN CAST((\"e0\".\"PROPERTIES\" #>> $3::text[]) AS numeric) END = $4::bigint)"
        );
        assert_eq!(params[1], SqlValue::Text("number".into()));

        let (text, _, _) = sql(EntityType::Observation, "result/depth gt 2").unwrap();
        assert!(text.contains(r#""e0"."RESULT_JSON""#));
    }

    #[test]
    fn test_time_errors() {
        assert!(matches!(
            sql(EntityType::Observation, "5 div phenomenonTime eq 1"),
            Err(QueryError::Unsupported(_))
        ));
        assert!(matches!(
            sql(EntityType::Observation, "resultTime mod 2 eq 1"),
            Err(QueryError::Unsupported(_))
        ));
        assert!(matches!(
            sql(EntityType::Observation, "during(resultTime, 2020-01-01T00:00:00Z)"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_relate_pattern_must_be_literal() {
        assert!(sql(
            EntityType::Location,
            "st_relate(location, geography'POINT (1 2)', 'T********')"
        )
        .is_ok());
        assert!(matches!(
            sql(EntityType::Location, "st_relate(location, location, name)"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_path_shape_errors() {
        for bad in [
            "Datastream/name/first eq 'a'",
            "Datastream/Thing eq 1",
            "Sensor/name eq 'a'",
            "unitOfMeasurement eq 'x'",
        ] {
            assert!(
                matches!(
                    sql(EntityType::Observation, bad),
                    Err(QueryError::InvalidPropertyPath(_))
                ),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_string_ids_compare_as_text() {
        let expression = parse_filter("id eq 'abc'").unwrap();
        let mut compiler = Compiler::new(&StringIdManager, EntityType::Thing);
        let condition = compiler.compile_filter(&expression).unwrap();
        let mut params = Vec::new();
        assert_eq!(condition.render(&mut params), r#"("e0"."ID" = $1::text)"#);
    }

    #[test]
    fn test_order_by_interval_emits_start_then_end() {
        let expression = parse_filter("phenomenonTime").unwrap();
        let mut compiler = Compiler::new(&LongIdManager, EntityType::Observation);
        let keys = compiler.compile_order(&expression).unwrap();
        assert_eq!(
            keys,
            vec![
                SqlExpr::column("e0", "PHENOMENON_TIME_START"),
                SqlExpr::column("e0", "PHENOMENON_TIME_END"),
            ]
        );
    }
}
