//! Relational compilation.
//!
//! [`Compiler`] turns expressions into [`SqlExpr`] conditions and sort keys
//! over a base table, adding inner joins for navigation paths.
//! [`QueryBuilder`] combines a resource path with query options into a
//! [`SelectQuery`] that renders as PostgreSQL text with `$n` placeholders.

mod compiler;
mod expr;
mod query;
pub mod schema;

pub use compiler::{Compiler, Join, Scope, SqlField};
pub use expr::{BinaryOp, SqlExpr, SqlType, SqlValue};
pub use query::{QueryBuilder, RenderedSql, SelectQuery};
