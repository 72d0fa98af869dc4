//! Table names, identifier quoting, and glob-style table selection.
//!
//! SQL identifiers (schema, table, and column names) cannot be passed as
//! parameters in prepared statements, so every statement we assemble quotes
//! identifiers through this module. Quoting escapes embedded double quotes
//! and validates against null bytes and excessive length.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

/// Maximum identifier length (Redshift/PostgreSQL allow 127/63 bytes; we
/// validate against the larger limit and let the warehouse enforce its own).
const MAX_IDENTIFIER_LENGTH: usize = 127;

/// A qualified table name: `schema.table`.
///
/// The string form `schema.table` is the relation identifier used throughout
/// dependency declarations, selectors, and error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// The `schema.table` identifier.
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Fully quoted form suitable for embedding in SQL text.
    pub fn quoted(&self) -> Result<String> {
        Ok(format!(
            "{}.{}",
            quote_identifier(&self.schema)?,
            quote_identifier(&self.table)?
        ))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl TryFrom<String> for TableName {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self> {
        match value.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                Ok(TableName::new(schema, table))
            }
            _ => Err(EtlError::Config(format!(
                "Expected 'schema.table', got: {:?}",
                value
            ))),
        }
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> String {
        name.identifier()
    }
}

/// Validate an identifier before quoting.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EtlError::Config("Identifier cannot be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(EtlError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EtlError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }
    Ok(())
}

/// Quote an identifier for the warehouse.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a string literal for embedding in SQL text.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Join column names into a quoted, comma-separated list: `"a", "b"`.
pub fn join_column_list<I, S>(columns: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Result<Vec<String>> = columns
        .into_iter()
        .map(|c| quote_identifier(c.as_ref()))
        .collect();
    Ok(quoted?.join(", "))
}

/// Join values into a single-quoted, comma-separated list for log messages.
pub fn join_with_quotes<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| format!("'{}'", v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A stateless predicate over `(schema, table)` pairs supporting glob-style
/// matching and multi-pattern lists.
///
/// Patterns take the form `schema.table`, `schema` (whole schema), or may use
/// `*` and `?` wildcards in either part. An empty pattern list matches
/// everything.
#[derive(Debug, Clone)]
pub struct TableSelector {
    patterns: Vec<(glob::Pattern, glob::Pattern)>,
    source: Vec<String>,
}

impl TableSelector {
    /// Build a selector from raw pattern strings.
    ///
    /// Malformed patterns are a configuration error, never silently ignored.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let (schema_part, table_part) = match raw.split_once('.') {
                Some((schema, table)) => (schema, table),
                None => (raw.as_str(), "*"),
            };
            if schema_part.is_empty() || table_part.is_empty() {
                return Err(EtlError::InvalidArgument(format!(
                    "Bad table selector pattern: {:?}",
                    raw
                )));
            }
            let schema = glob::Pattern::new(schema_part).map_err(|e| {
                EtlError::InvalidArgument(format!("Bad pattern {:?}: {}", raw, e))
            })?;
            let table = glob::Pattern::new(table_part).map_err(|e| {
                EtlError::InvalidArgument(format!("Bad pattern {:?}: {}", raw, e))
            })?;
            compiled.push((schema, table));
        }
        Ok(Self {
            patterns: compiled,
            source: patterns.to_vec(),
        })
    }

    /// Selector that matches every relation.
    pub fn match_all() -> Self {
        Self {
            patterns: Vec::new(),
            source: Vec::new(),
        }
    }

    /// Test whether the given table name matches this selector.
    pub fn matches(&self, name: &TableName) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns
            .iter()
            .any(|(schema, table)| schema.matches(&name.schema) && table.matches(&name.table))
    }
}

impl fmt::Display for TableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "*.*")
        } else {
            write!(f, "{}", self.source.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_identifier() {
        let name = TableName::new("www", "orders");
        assert_eq!(name.identifier(), "www.orders");
        assert_eq!(name.to_string(), "www.orders");
    }

    #[test]
    fn test_table_name_from_string() {
        let name = TableName::try_from("www.orders".to_string()).unwrap();
        assert_eq!(name.schema, "www");
        assert_eq!(name.table, "orders");
        assert!(TableName::try_from("no_dot".to_string()).is_err());
        assert!(TableName::try_from(".orders".to_string()).is_err());
        assert!(TableName::try_from("www.".to_string()).is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orders").unwrap(), "\"orders\"");
        assert_eq!(quote_identifier("or\"ders").unwrap(), "\"or\"\"ders\"");
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("bad\0name").is_err());
        assert!(quote_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_join_column_list() {
        assert_eq!(
            join_column_list(["id", "email"]).unwrap(),
            "\"id\", \"email\""
        );
    }

    #[test]
    fn test_join_with_quotes() {
        assert_eq!(join_with_quotes(["a", "b"]), "'a', 'b'");
    }

    #[test]
    fn test_selector_exact_and_glob() {
        let selector =
            TableSelector::new(&["www.orders".to_string(), "analytics.*".to_string()]).unwrap();
        assert!(selector.matches(&TableName::new("www", "orders")));
        assert!(!selector.matches(&TableName::new("www", "customers")));
        assert!(selector.matches(&TableName::new("analytics", "anything")));
    }

    #[test]
    fn test_selector_whole_schema_shorthand() {
        let selector = TableSelector::new(&["www".to_string()]).unwrap();
        assert!(selector.matches(&TableName::new("www", "orders")));
        assert!(!selector.matches(&TableName::new("erp", "orders")));
    }

    #[test]
    fn test_selector_empty_matches_all() {
        let selector = TableSelector::match_all();
        assert!(selector.matches(&TableName::new("any", "thing")));
    }

    #[test]
    fn test_selector_question_mark() {
        let selector = TableSelector::new(&["www.order?".to_string()]).unwrap();
        assert!(selector.matches(&TableName::new("www", "orders")));
        assert!(!selector.matches(&TableName::new("www", "order_items")));
    }

    #[test]
    fn test_selector_rejects_malformed() {
        assert!(TableSelector::new(&[".orders".to_string()]).is_err());
        assert!(TableSelector::new(&["www.[".to_string()]).is_err());
    }
}
