//! Request query options (`$filter`, `$orderby`, `$select`, ...).

use super::parser::{parse_filter, parse_order_by};
use super::Expression;
use crate::error::{QueryError, Result};
use crate::model::{NavigationProperty, Property};
use crate::path::percent_decode;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub expression: Expression,
    pub direction: Direction,
}

/// One `$expand` item with its nested options.
#[derive(Clone, Debug, PartialEq)]
pub struct Expand {
    pub path: Vec<NavigationProperty>,
    pub query: Query,
}

/// Parsed query options. Empty fields mean the option was absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub select: Vec<Property>,
    pub filter: Option<Expression>,
    pub order_by: Vec<OrderBy>,
    pub expand: Vec<Expand>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: Option<bool>,
}

impl Query {
    /// Parse a raw (still percent-encoded) query string, without the `?`.
    ///
    /// Options are split on `&` before decoding, so an encoded `%26` inside
    /// a filter literal stays part of the literal.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_options(text, '&', true)
    }

    fn parse_options(text: &str, separator: char, decode: bool) -> Result<Self> {
        let mut query = Query::default();
        let mut seen: Vec<String> = Vec::new();
        for option in split_top_level(text, separator) {
            if option.is_empty() {
                continue;
            }
            let (key, value) = option.split_once('=').unwrap_or((option, ""));
            let key = if decode { percent_decode(key)? } else { key.to_string() };
            if !key.starts_with('$') {
                continue;
            }
            let value = if decode { percent_decode(value)? } else { value.to_string() };
            if seen.contains(&key) {
                return Err(QueryError::parse(text, format!("duplicate option {}", key)));
            }
            seen.push(key.clone());
            query.apply(&key, value.trim())?;
        }
        Ok(query)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let number = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| QueryError::parse(v, format!("{} expects a non-negative integer", key)))
        };
        match key {
            "$filter" => self.filter = Some(parse_filter(value)?),
            "$orderby" => self.order_by = parse_order_by(value)?,
            "$select" => {
                self.select = split_top_level(value, ',')
                    .into_iter()
                    .map(|name| {
                        let name = name.trim();
                        Property::from_name(name).ok_or_else(|| {
                            QueryError::parse(value, format!("unknown property '{}'", name))
                        })
                    })
                    .collect::<Result<_>>()?
            }
            "$expand" => {
                self.expand = split_top_level(value, ',')
                    .into_iter()
                    .map(|item| parse_expand(item.trim()))
                    .collect::<Result<_>>()?
            }
            "$top" => self.top = Some(number(value)?),
            "$skip" => self.skip = Some(number(value)?),
            "$count" => {
                self.count = Some(match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(QueryError::parse(value, "$count expects true or false")),
                })
            }
            // Output formatting is left to the caller.
            "$format" | "$resultFormat" => {}
            other => return Err(QueryError::parse(other, "unknown query option")),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Query::default()
    }
}

fn parse_expand(item: &str) -> Result<Expand> {
    let (path_text, options) = match item.find('(') {
        Some(open) => {
            let inner = item[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| QueryError::parse(item, "unbalanced parentheses in $expand"))?;
            (&item[..open], Query::parse_options(inner, ';', false)?)
        }
        None => (item, Query::default()),
    };
    let path = path_text
        .split('/')
        .map(|name| {
            NavigationProperty::from_name(name.trim())
                .ok_or_else(|| QueryError::parse(item, format!("cannot expand '{}'", name)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Expand {
        path,
        query: options,
    })
}

/// Split on `separator`, ignoring separators inside quotes or parentheses.
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            c if c == separator && !quoted && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
