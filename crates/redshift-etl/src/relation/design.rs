//! Table designs: columns, constraints, and storage attributes.
//!
//! A design describes the warehouse shape of one relation. Designs are
//! authored as YAML files next to the relation's SQL (for CTAS/views) and are
//! consumed by the DDL generator; the orchestrators only inspect the
//! constraint and column lists.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One column in a table design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,

    /// Generic type family ("string", "int", "boolean", "timestamp", ...),
    /// used when synthesizing placeholder values.
    #[serde(rename = "type", default)]
    pub generic_type: String,

    /// Warehouse type, used verbatim in DDL.
    pub sql_type: String,

    #[serde(default)]
    pub not_null: bool,

    /// Identity columns are generated by the warehouse, never copied.
    #[serde(default)]
    pub identity: bool,

    /// Skipped columns exist upstream but are excluded from the warehouse.
    #[serde(default)]
    pub skipped: bool,

    /// Compression encoding.
    #[serde(default)]
    pub encoding: Option<String>,

    /// Foreign key reference: (table, columns).
    #[serde(default)]
    pub references: Option<(String, Vec<String>)>,
}

/// A declared table constraint.
///
/// Key constraints (primary/surrogate) become PRIMARY KEY in DDL; unique and
/// natural keys become UNIQUE. All of them are audited after load by the
/// duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConstraint {
    PrimaryKey(Vec<String>),
    SurrogateKey(Vec<String>),
    Unique(Vec<String>),
    NaturalKey(Vec<String>),
}

const CONSTRAINT_KINDS: &[&str] = &["primary_key", "surrogate_key", "unique", "natural_key"];

// Design files write constraints as single-entry maps
// (`- primary_key: [order_id]`); the derived externally-tagged form would
// demand YAML tags instead, so (de)serialization is spelled out.
impl Serialize for TableConstraint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.kind(), self.columns())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableConstraint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ConstraintVisitor;

        impl<'de> Visitor<'de> for ConstraintVisitor {
            type Value = TableConstraint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry map from constraint kind to a column list")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let (kind, columns): (String, Vec<String>) = map
                    .next_entry()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom(
                        "constraint entries must declare exactly one kind",
                    ));
                }
                match kind.as_str() {
                    "primary_key" => Ok(TableConstraint::PrimaryKey(columns)),
                    "surrogate_key" => Ok(TableConstraint::SurrogateKey(columns)),
                    "unique" => Ok(TableConstraint::Unique(columns)),
                    "natural_key" => Ok(TableConstraint::NaturalKey(columns)),
                    other => Err(de::Error::unknown_variant(other, CONSTRAINT_KINDS)),
                }
            }
        }

        deserializer.deserialize_map(ConstraintVisitor)
    }
}

impl TableConstraint {
    pub fn kind(&self) -> &'static str {
        match self {
            TableConstraint::PrimaryKey(_) => "primary_key",
            TableConstraint::SurrogateKey(_) => "surrogate_key",
            TableConstraint::Unique(_) => "unique",
            TableConstraint::NaturalKey(_) => "natural_key",
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            TableConstraint::PrimaryKey(columns)
            | TableConstraint::SurrogateKey(columns)
            | TableConstraint::Unique(columns)
            | TableConstraint::NaturalKey(columns) => columns,
        }
    }

    /// Whether this constraint becomes a PRIMARY KEY clause in DDL.
    pub fn is_key(&self) -> bool {
        matches!(
            self,
            TableConstraint::PrimaryKey(_) | TableConstraint::SurrogateKey(_)
        )
    }

    /// NULL is never equal to another value, so rows with a null column do
    /// not violate a unique constraint and are excluded from the duplicate
    /// check. Key columns are not null by definition.
    pub fn excludes_nulls(&self) -> bool {
        matches!(self, TableConstraint::Unique(_))
    }
}

/// Distribution attribute: either a distribution key or a style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Distribution {
    Keys(Vec<String>),
    Style(String),
}

/// Table-level storage attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableAttributes {
    #[serde(default)]
    pub distribution: Option<Distribution>,

    #[serde(default)]
    pub compound_sort: Option<Vec<String>>,

    #[serde(default)]
    pub interleaved_sort: Option<Vec<String>>,
}

/// Full design of one relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDesign {
    pub columns: Vec<ColumnDef>,

    #[serde(default)]
    pub constraints: Vec<TableConstraint>,

    #[serde(default)]
    pub attributes: TableAttributes,
}

impl TableDesign {
    /// Columns that exist in the warehouse table.
    pub fn active_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.skipped)
    }

    /// Columns that are filled from upstream data or a query (active and not
    /// warehouse-generated).
    pub fn insertable_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.active_columns().filter(|c| !c.identity)
    }

    pub fn has_identity_column(&self) -> bool {
        self.columns.iter().any(|c| c.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_design_yaml() {
        let yaml = r#"
columns:
  - name: order_id
    type: int
    sql_type: bigint
    not_null: true
  - name: email
    type: string
    sql_type: varchar(255)
  - name: legacy_flag
    sql_type: char(1)
    skipped: true
constraints:
  - primary_key: [order_id]
  - unique: [email]
attributes:
  distribution: [order_id]
  compound_sort: [order_id]
"#;
        let design: TableDesign = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(design.columns.len(), 3);
        assert_eq!(design.active_columns().count(), 2);
        assert_eq!(design.constraints.len(), 2);
        assert_eq!(design.constraints[0].kind(), "primary_key");
        assert!(design.constraints[0].is_key());
        assert!(design.constraints[1].excludes_nulls());
        assert_eq!(
            design.attributes.distribution,
            Some(Distribution::Keys(vec!["order_id".to_string()]))
        );
    }

    #[test]
    fn test_constraint_parses_standalone() {
        let constraint: TableConstraint = serde_yaml::from_str("unique: [email]").unwrap();
        assert_eq!(constraint, TableConstraint::Unique(vec!["email".to_string()]));
        // Round-trips through the same single-entry map shape.
        let yaml = serde_yaml::to_string(&constraint).unwrap();
        let back: TableConstraint = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, constraint);
    }

    #[test]
    fn test_constraint_rejects_unknown_kind() {
        let result: std::result::Result<TableConstraint, _> =
            serde_yaml::from_str("foreign_key: [order_id]");
        assert!(result.is_err());
    }

    #[test]
    fn test_constraint_rejects_multiple_kinds_per_entry() {
        let result: std::result::Result<TableConstraint, _> =
            serde_yaml::from_str("unique: [email]\nprimary_key: [id]");
        assert!(result.is_err());
    }

    #[test]
    fn test_distribution_style_parses_as_string() {
        let yaml = "distribution: all\n";
        let attributes: TableAttributes = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            attributes.distribution,
            Some(Distribution::Style("all".to_string()))
        );
    }

    #[test]
    fn test_identity_columns_are_not_insertable() {
        let yaml = r#"
columns:
  - name: key
    type: int
    sql_type: int
    identity: true
  - name: name
    type: string
    sql_type: varchar(10)
"#;
        let design: TableDesign = serde_yaml::from_str(yaml).unwrap();
        assert!(design.has_identity_column());
        let insertable: Vec<_> = design.insertable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(insertable, vec!["name"]);
    }
}
