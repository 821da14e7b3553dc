//! Select statements for a resource path plus query options.

use super::compiler::{Compiler, Join, Scope};
use super::expr::{SqlExpr, SqlValue};
use super::schema::{self, ID_COLUMN};
use crate::error::{QueryError, Result};
use crate::expression::{Direction, Expression, Query};
use crate::model::{EntityProperty, EntityType, Property};
use crate::path::{PathElement, ResourcePath};
use crate::types::IdManager;
use std::fmt::Write;
use tracing::debug;

/// SQL text with its bound parameters, in placeholder order.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedSql {
    pub text: String,
    pub params: Vec<SqlValue>,
}

/// A compiled select over one entity table.
///
/// `$expand` is not part of the statement; expanded collections are
/// fetched by the caller with one query per navigation.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    pub entity_type: EntityType,
    /// Select every column of the base table.
    pub all_columns: bool,
    pub columns: Vec<SqlExpr>,
    pub joins: Vec<Join>,
    pub condition: Option<SqlExpr>,
    pub order: Vec<(SqlExpr, Direction)>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Whether the caller asked for `$count`.
    pub count: bool,
}

impl SelectQuery {
    pub fn to_sql(&self) -> RenderedSql {
        let mut params = Vec::new();
        let mut text = String::from("SELECT ");
        if self.distinct {
            text.push_str("DISTINCT ");
        }
        let mut projection = Vec::new();
        if self.all_columns {
            projection.push(format!("\"{}\".*", Scope::BASE_ALIAS));
        }
        for column in &self.columns {
            projection.push(column.render(&mut params));
        }
        text.push_str(&projection.join(", "));
        self.write_from(&mut text, &mut params);
        if !self.order.is_empty() {
            let keys: Vec<String> = self
                .order
                .iter()
                .map(|(key, direction)| {
                    let suffix = match direction {
                        Direction::Ascending => "ASC",
                        Direction::Descending => "DESC",
                    };
                    format!("{} {}", key.render(&mut params), suffix)
                })
                .collect();
            let _ = write!(text, " ORDER BY {}", keys.join(", "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(text, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(text, " OFFSET {}", offset);
        }
        RenderedSql { text, params }
    }

    /// Number of matching entities, ignoring paging and ordering.
    pub fn count_sql(&self) -> RenderedSql {
        let mut params = Vec::new();
        let mut text = format!(
            "SELECT COUNT(DISTINCT \"{}\".\"{}\")",
            Scope::BASE_ALIAS,
            ID_COLUMN
        );
        self.write_from(&mut text, &mut params);
        RenderedSql { text, params }
    }

    fn write_from(&self, text: &mut String, params: &mut Vec<SqlValue>) {
        let _ = write!(
            text,
            " FROM \"{}\" AS \"{}\"",
            schema::table(self.entity_type),
            Scope::BASE_ALIAS
        );
        for join in &self.joins {
            let _ = write!(
                text,
                " INNER JOIN \"{}\" AS \"{}\" ON {}",
                join.table,
                join.alias,
                join.on.render(params)
            );
        }
        if let Some(condition) = &self.condition {
            let _ = write!(text, " WHERE {}", condition.render(params));
        }
    }
}

/// Builds [`SelectQuery`]s for one id strategy.
pub struct QueryBuilder<'a> {
    ids: &'a dyn IdManager,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(ids: &'a dyn IdManager) -> Self {
        Self { ids }
    }

    pub fn build(&self, path: &ResourcePath, query: &Query) -> Result<SelectQuery> {
        let entity_type = path
            .main_entity_type()
            .ok_or_else(|| QueryError::InvalidPath("path addresses no entity".to_string()))?;
        let mut compiler = Compiler::new(self.ids, entity_type);

        let filter = Expression::and_opt(path.identity_filter()?, query.filter.clone());
        let condition = filter
            .as_ref()
            .map(|f| compiler.compile_filter(f))
            .transpose()?;

        let property = path
            .main_index()
            .and_then(|main| path.elements().get(main + 1))
            .and_then(|element| match element {
                PathElement::Property(Property::Entity(p)) => Some(*p),
                _ => None,
            });
        let mut selected: Vec<EntityProperty> = match property {
            Some(p) => vec![p],
            None => query
                .select
                .iter()
                .filter_map(|p| match p {
                    Property::Entity(p) => Some(*p),
                    _ => None,
                })
                .collect(),
        };
        let all_columns = selected.is_empty();
        let mut columns = Vec::new();
        if !all_columns {
            if !selected.contains(&EntityProperty::Id) {
                selected.insert(0, EntityProperty::Id);
            }
            for p in selected {
                for sub in p.sub_fields(entity_type) {
                    let column = schema::column(entity_type, p, sub.key).ok_or_else(|| {
                        QueryError::InvalidPropertyPath(format!("{} has no property {}", entity_type, p))
                    })?;
                    columns.push(SqlExpr::column(Scope::BASE_ALIAS, column));
                }
            }
        }

        let mut order = Vec::new();
        for order_by in &query.order_by {
            for key in compiler.compile_order(&order_by.expression)? {
                if !columns.contains(&key) {
                    columns.push(key.clone());
                }
                order.push((key, order_by.direction));
            }
        }

        let scope = compiler.into_scope();
        let select = SelectQuery {
            entity_type,
            all_columns,
            columns,
            joins: scope.joins().to_vec(),
            condition,
            order,
            distinct: scope.is_to_many(),
            limit: query.top,
            offset: query.skip,
            count: query.count.unwrap_or(false),
        };
        debug!(
            entity_type = %entity_type,
            joins = select.joins.len(),
            distinct = select.distinct,
            "built select query"
        );
        Ok(select)
    }
}
