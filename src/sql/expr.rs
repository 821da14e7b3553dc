//! SQL expression tree and PostgreSQL rendering with `$n` placeholders.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::fmt::Write;

/// A bound parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    Interval(Duration),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Extended WKT, e.g. `SRID=4326;POINT (1 2)`.
    Geometry(String),
    /// Key path for the `#>` operators.
    TextArray(Vec<String>),
}

impl SqlValue {
    /// Text form handed to the database driver.
    pub fn to_param_text(&self) -> String {
        match self {
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Long(v) => v.to_string(),
            SqlValue::Double(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(s) | SqlValue::Geometry(s) => s.clone(),
            SqlValue::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            SqlValue::Interval(d) => match d.num_microseconds() {
                Some(us) => format!("{} microseconds", us),
                None => format!("{} milliseconds", d.num_milliseconds()),
            },
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            SqlValue::TextArray(items) => {
                let quoted: Vec<String> = items
                    .iter()
                    .map(|s| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
                    .collect();
                format!("{{{}}}", quoted.join(","))
            }
        }
    }

    fn placeholder(&self, n: usize) -> String {
        match self {
            SqlValue::Geometry(_) => format!("ST_GeomFromEWKT(${})", n),
            other => format!("${}::{}", n, other.type_name()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Bool(_) => "boolean",
            SqlValue::Long(_) => "bigint",
            SqlValue::Double(_) => "float8",
            SqlValue::Decimal(_) => "numeric",
            SqlValue::Text(_) => "text",
            SqlValue::Timestamp(_) => "timestamptz",
            SqlValue::Interval(_) => "interval",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Geometry(_) => "geometry",
            SqlValue::TextArray(_) => "text[]",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Concat => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Numeric,
    Integer,
    Boolean,
    Date,
    Time,
}

impl SqlType {
    fn name(self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::Numeric => "numeric",
            SqlType::Integer => "integer",
            SqlType::Boolean => "boolean",
            SqlType::Date => "date",
            SqlType::Time => "time",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SqlExpr {
    Column {
        alias: String,
        column: &'static str,
    },
    Literal(SqlValue),
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    Func {
        name: &'static str,
        args: Vec<SqlExpr>,
    },
    Cast {
        expr: Box<SqlExpr>,
        ty: SqlType,
    },
    /// `EXTRACT(part FROM expr)`.
    Extract {
        part: &'static str,
        expr: Box<SqlExpr>,
    },
    /// `base #> path`, or `#>>` when `text` is set.
    JsonPath {
        base: Box<SqlExpr>,
        path: Vec<String>,
        text: bool,
    },
    /// `CASE WHEN when THEN then END`.
    Case {
        when: Box<SqlExpr>,
        then: Box<SqlExpr>,
    },
    /// Wall-clock view of a timestamp in UTC.
    AtUtc(Box<SqlExpr>),
    /// Byte-wise text ordering.
    Collate(Box<SqlExpr>),
    Now,
}

impl SqlExpr {
    pub fn column(alias: impl Into<String>, column: &'static str) -> Self {
        SqlExpr::Column {
            alias: alias.into(),
            column,
        }
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn func(name: &'static str, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Func { name, args }
    }

    pub fn cast(expr: SqlExpr, ty: SqlType) -> Self {
        SqlExpr::Cast {
            expr: Box::new(expr),
            ty,
        }
    }

    pub fn negate(expr: SqlExpr) -> Self {
        SqlExpr::Not(Box::new(expr))
    }

    pub fn is_column(&self) -> bool {
        matches!(self, SqlExpr::Column { .. })
    }

    /// Render as SQL text, appending bound values to `params`.
    pub fn render(&self, params: &mut Vec<SqlValue>) -> String {
        let mut out = String::new();
        self.write(&mut out, params);
        out
    }

    fn write(&self, out: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            SqlExpr::Column { alias, column } => {
                let _ = write!(out, "\"{}\".\"{}\"", alias, column);
            }
            SqlExpr::Literal(value) => {
                params.push(value.clone());
                out.push_str(&value.placeholder(params.len()));
            }
            SqlExpr::Binary { op, left, right } => {
                out.push('(');
                left.write(out, params);
                let _ = write!(out, " {} ", op.symbol());
                right.write(out, params);
                out.push(')');
            }
            SqlExpr::Not(inner) => {
                out.push_str("NOT ");
                inner.write(out, params);
            }
            SqlExpr::IsNull(inner) => {
                out.push('(');
                inner.write(out, params);
                out.push_str(" IS NULL)");
            }
            SqlExpr::Func { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write(out, params);
                }
                out.push(')');
            }
            SqlExpr::Cast { expr, ty } => {
                out.push_str("CAST(");
                expr.write(out, params);
                let _ = write!(out, " AS {})", ty.name());
            }
            SqlExpr::Extract { part, expr } => {
                let _ = write!(out, "EXTRACT({} FROM ", part);
                expr.write(out, params);
                out.push(')');
            }
            SqlExpr::JsonPath { base, path, text } => {
                out.push('(');
                base.write(out, params);
                out.push_str(if *text { " #>> " } else { " #> " });
                SqlExpr::Literal(SqlValue::TextArray(path.clone())).write(out, params);
                out.push(')');
            }
            SqlExpr::Case { when, then } => {
                out.push_str("CASE WHEN ");
                when.write(out, params);
                out.push_str(" THEN ");
                then.write(out, params);
                out.push_str(" END");
            }
            SqlExpr::AtUtc(inner) => {
                out.push('(');
                inner.write(out, params);
                out.push_str(" AT TIME ZONE 'UTC')");
            }
            SqlExpr::Collate(inner) => {
                out.push('(');
                inner.write(out, params);
                out.push_str(" COLLATE \"C\")");
            }
            SqlExpr::Now => out.push_str("NOW()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_numbers_params_in_order() {
        let expr = SqlExpr::binary(
            BinaryOp::And,
            SqlExpr::binary(
                BinaryOp::Gt,
                SqlExpr::column("e0", "RESULT_NUMBER"),
                SqlExpr::Literal(SqlValue::Long(5)),
            ),
            SqlExpr::binary(
                BinaryOp::Eq,
                SqlExpr::column("e1", "NAME"),
                SqlExpr::Literal(SqlValue::Text("x".into())),
            ),
        );
        let mut params = Vec::new();
        assert_eq!(
            expr.render(&mut params),
            r#"(("e0"."RESULT_NUMBER" > $1::bigint) AND ("e1"."NAME" = $2::text))"#
        );
        assert_eq!(params, vec![SqlValue::Long(5), SqlValue::Text("x".into())]);
    }

    #[test]
    fn test_render_json_path_and_geometry() {
        let expr = SqlExpr::func(
            "ST_Intersects",
            vec![
                SqlExpr::column("e0", "GEOM"),
                SqlExpr::Literal(SqlValue::Geometry("SRID=4326;POINT (1 2)".into())),
            ],
        );
        let mut params = Vec::new();
        assert_eq!(
            expr.render(&mut params),
            r#"ST_Intersects("e0"."GEOM", ST_GeomFromEWKT($1))"#
        );

        let path = SqlExpr::JsonPath {
            base: Box::new(SqlExpr::column("e0", "PROPERTIES")),
            path: vec!["a".into(), "b\"c".into()],
            text: true,
        };
        let mut params = Vec::new();
        assert_eq!(path.render(&mut params), r#"("e0"."PROPERTIES" #>> $1::text[])"#);
        assert_eq!(params[0].to_param_text(), r#"{"a","b\"c"}"#);
    }
}
