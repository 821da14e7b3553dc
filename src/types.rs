//! Core value types shared by every component.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier.
///
/// Opaque to the query core: it is compared, parsed and rendered only
/// through an [`IdManager`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Long(i64),
    String(String),
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Long(v) => write!(f, "Id({})", v),
            Id::String(v) => write!(f, "Id({:?})", v),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Long(v) => write!(f, "{}", v),
            Id::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Long(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::String(v.to_string())
    }
}

/// Kind of a scalar operand, as seen by type resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Number,
    String,
    Boolean,
    Geometry,
    /// Instant, interval or duration.
    Time,
    Date,
    TimeOfDay,
    /// A raw document value.
    Json,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Number => "Number",
            Kind::String => "String",
            Kind::Boolean => "Boolean",
            Kind::Geometry => "Geometry",
            Kind::Time => "Time",
            Kind::Date => "Date",
            Kind::TimeOfDay => "TimeOfDay",
            Kind::Json => "Json",
        };
        f.write_str(name)
    }
}

/// Strategy for the persistence layer's primary-key scheme.
pub trait IdManager: Send + Sync {
    /// Parse the id as written inside `Type(...)` in a path or filter.
    fn parse(&self, text: &str) -> Result<Id>;

    /// Render the id the way it appears inside `Type(...)`.
    fn url_text(&self, id: &Id) -> String;

    /// Kind of the id column.
    fn kind(&self) -> Kind;
}

/// Numeric (`bigint`) ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct LongIdManager;

impl IdManager for LongIdManager {
    fn parse(&self, text: &str) -> Result<Id> {
        text.trim()
            .parse::<i64>()
            .map(Id::Long)
            .map_err(|_| QueryError::InvalidId(format!("'{}' is not a numeric id", text)))
    }

    fn url_text(&self, id: &Id) -> String {
        id.to_string()
    }

    fn kind(&self) -> Kind {
        Kind::Number
    }
}

/// Free-text ids, written single-quoted with `''` escaping a quote.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringIdManager;

impl IdManager for StringIdManager {
    fn parse(&self, text: &str) -> Result<Id> {
        let text = text.trim();
        let inner = text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .filter(|_| text.len() >= 2)
            .ok_or_else(|| QueryError::InvalidId(format!("'{}' is not a quoted id", text)))?;
        Ok(Id::String(inner.replace("''", "'")))
    }

    fn url_text(&self, id: &Id) -> String {
        match id {
            Id::String(s) => format!("'{}'", s.replace('\'', "''")),
            Id::Long(v) => format!("'{}'", v),
        }
    }

    fn kind(&self) -> Kind {
        Kind::String
    }
}

/// Which id strategy a deployment uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    #[default]
    Long,
    String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_ids() {
        let manager = LongIdManager;
        assert_eq!(manager.parse("42").unwrap(), Id::Long(42));
        assert_eq!(manager.url_text(&Id::Long(42)), "42");
        assert!(matches!(manager.parse("'a'"), Err(QueryError::InvalidId(_))));
    }

    #[test]
    fn test_string_ids_escape_quotes() {
        let manager = StringIdManager;
        let id = manager.parse("'it''s'").unwrap();
        assert_eq!(id, Id::String("it's".into()));
        assert_eq!(manager.url_text(&id), "'it''s'");
        assert!(manager.parse("abc").is_err());
        assert!(manager.parse("'").is_err());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{:?}", Id::Long(3)), "Id(3)");
        assert_eq!(Id::from("x").to_string(), "x");
    }
}
