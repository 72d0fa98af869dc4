//! SQL assembly for table DDL, bulk copies, and constraint checks.
//!
//! Identifiers cannot be bound as statement parameters, so everything here
//! builds SQL text from validated, quoted identifiers (see [`crate::names`]).
//! Values that originate from configuration (role ARN, object keys) are
//! embedded as escaped literals.

use crate::error::{EtlError, Result};
use crate::names::{join_column_list, quote_identifier, quote_literal};
use crate::relation::design::{ColumnDef, Distribution, TableConstraint};
use crate::relation::Relation;

/// Name of the session-local temp table used to stage a CTAS relation.
pub fn temp_table_name(relation: &Relation) -> String {
    format!("etl_temp${}", relation.target_table_name.table)
}

fn column_ddl(column: &ColumnDef, is_temp: bool) -> Result<String> {
    let mut ddl = format!("{} {}", quote_identifier(&column.name)?, column.sql_type);
    if column.identity && !is_temp {
        ddl.push_str(" IDENTITY(1, 1)");
    }
    if let Some(encoding) = &column.encoding {
        ddl.push_str(&format!(" ENCODE {}", encoding));
    }
    if column.not_null {
        ddl.push_str(" NOT NULL");
    }
    if !is_temp {
        if let Some((table, columns)) = &column.references {
            ddl.push_str(&format!(
                " REFERENCES {} ({})",
                quoted_qualified(table)?,
                join_column_list(columns)?
            ));
        }
    }
    Ok(ddl)
}

/// Quote a possibly qualified name ("schema.table" or "table").
fn quoted_qualified(name: &str) -> Result<String> {
    match name.split_once('.') {
        Some((schema, table)) => Ok(format!(
            "{}.{}",
            quote_identifier(schema)?,
            quote_identifier(table)?
        )),
        None => quote_identifier(name),
    }
}

fn constraint_ddl(constraint: &TableConstraint) -> Result<String> {
    let columns = join_column_list(constraint.columns())?;
    if constraint.is_key() {
        Ok(format!("PRIMARY KEY ({})", columns))
    } else {
        Ok(format!("UNIQUE ({})", columns))
    }
}

fn attribute_ddl(relation: &Relation) -> Result<String> {
    let attributes = &relation.design.attributes;
    let mut ddl = String::new();
    match &attributes.distribution {
        Some(Distribution::Keys(keys)) => {
            let key = keys.first().ok_or_else(|| {
                EtlError::Config(format!(
                    "Empty distribution key list for '{}'",
                    relation.identifier()
                ))
            })?;
            ddl.push_str(&format!(
                "\nDISTSTYLE KEY\nDISTKEY ({})",
                quote_identifier(key)?
            ));
        }
        Some(Distribution::Style(style)) => {
            ddl.push_str(&format!("\nDISTSTYLE {}", style.to_uppercase()));
        }
        None => {}
    }
    if let Some(columns) = &attributes.compound_sort {
        ddl.push_str(&format!(
            "\nCOMPOUND SORTKEY ({})",
            join_column_list(columns)?
        ));
    } else if let Some(columns) = &attributes.interleaved_sort {
        ddl.push_str(&format!(
            "\nINTERLEAVED SORTKEY ({})",
            join_column_list(columns)?
        ));
    }
    Ok(ddl)
}

/// DDL for the target table of a DATA or CTAS relation.
pub fn create_table_ddl(relation: &Relation) -> Result<String> {
    let mut parts = Vec::new();
    for column in relation.design.active_columns() {
        parts.push(column_ddl(column, false)?);
    }
    for constraint in &relation.design.constraints {
        parts.push(constraint_ddl(constraint)?);
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n){}",
        relation.target_table_name.quoted()?,
        parts.join(",\n    "),
        attribute_ddl(relation)?
    ))
}

/// DDL for the staging temp table of a CTAS relation. Temp tables carry no
/// identity, foreign keys, or distribution; they only stage the query result.
pub fn create_temp_table_ddl(relation: &Relation) -> Result<String> {
    let mut parts = Vec::new();
    for column in relation.design.insertable_columns() {
        parts.push(column_ddl(column, true)?);
    }
    Ok(format!(
        "CREATE TEMP TABLE {} (\n    {}\n)",
        quote_identifier(&temp_table_name(relation))?,
        parts.join(",\n    ")
    ))
}

/// DML filling the staging temp table from the relation's query.
pub fn fill_temp_dml(relation: &Relation) -> Result<String> {
    let query = relation
        .query_stmt
        .as_deref()
        .ok_or_else(|| EtlError::MissingQuery(relation.identifier()))?;
    let columns: Vec<&str> = relation
        .design
        .insertable_columns()
        .map(|c| c.name.as_str())
        .collect();
    Ok(format!(
        "INSERT INTO {} ({})\n{}",
        quote_identifier(&temp_table_name(relation))?,
        join_column_list(columns)?,
        query
    ))
}

/// DML moving staged rows into the (emptied) target table. Identity columns
/// are omitted so the warehouse generates fresh values.
pub fn insert_from_temp_dml(relation: &Relation) -> Result<String> {
    let columns: Vec<&str> = relation
        .design
        .insertable_columns()
        .map(|c| c.name.as_str())
        .collect();
    Ok(format!(
        "INSERT INTO {} ({})\nSELECT {}\nFROM {}",
        relation.target_table_name.quoted()?,
        join_column_list(&columns)?,
        join_column_list(&columns)?,
        quote_identifier(&temp_table_name(relation))?
    ))
}

/// Placeholder value for one column of the synthetic n/a row.
fn na_value(column: &ColumnDef) -> String {
    if column.identity {
        return "0".to_string();
    }
    if !column.not_null {
        return format!("NULL::{}", column.sql_type);
    }
    match column.generic_type.as_str() {
        "string" => "'N/A'".to_string(),
        "boolean" => "FALSE".to_string(),
        "timestamp" | "date" => "'0000-01-01 00:00:00'".to_string(),
        _ => "0".to_string(),
    }
}

/// DML inserting the synthetic n/a row (key = 0) into a dimension table.
pub fn na_row_dml(relation: &Relation) -> Result<String> {
    let columns: Vec<&str> = relation
        .design
        .active_columns()
        .map(|c| c.name.as_str())
        .collect();
    let values: Vec<String> = relation.design.active_columns().map(na_value).collect();
    Ok(format!(
        "INSERT INTO {} ({})\nSELECT {}",
        relation.target_table_name.quoted()?,
        join_column_list(columns)?,
        values.join(", ")
    ))
}

pub fn drop_temp_table_stmt(relation: &Relation) -> Result<String> {
    Ok(format!(
        "DROP TABLE {}",
        quote_identifier(&temp_table_name(relation))?
    ))
}

pub fn delete_stmt(relation: &Relation) -> Result<String> {
    Ok(format!(
        "DELETE FROM {}",
        relation.target_table_name.quoted()?
    ))
}

pub fn drop_table_stmt(relation: &Relation) -> Result<String> {
    Ok(format!(
        "DROP TABLE IF EXISTS {} CASCADE",
        relation.target_table_name.quoted()?
    ))
}

pub fn analyze_stmt(relation: &Relation) -> Result<String> {
    Ok(format!("ANALYZE {}", relation.target_table_name.quoted()?))
}

pub fn vacuum_stmt(relation: &Relation) -> Result<String> {
    Ok(format!("VACUUM {}", relation.target_table_name.quoted()?))
}

/// DDL installing (or replacing) a VIEW relation.
pub fn create_view_ddl(relation: &Relation) -> Result<String> {
    let query = relation
        .query_stmt
        .as_deref()
        .ok_or_else(|| EtlError::MissingQuery(relation.identifier()))?;
    Ok(format!(
        "CREATE VIEW {} AS\n{}",
        relation.target_table_name.quoted()?,
        query
    ))
}

pub fn drop_view_stmt(relation: &Relation) -> Result<String> {
    Ok(format!(
        "DROP VIEW IF EXISTS {} CASCADE",
        relation.target_table_name.quoted()?
    ))
}

/// Bulk copy from the relation's manifest into the target table.
pub fn copy_stmt(relation: &Relation, iam_role: &str) -> Result<String> {
    let columns: Vec<&str> = relation
        .design
        .insertable_columns()
        .map(|c| c.name.as_str())
        .collect();
    let manifest_url = format!("s3://{}/{}", relation.bucket_name, relation.manifest_file_name);
    Ok(format!(
        "COPY {} ({})\nFROM {}\nCREDENTIALS {}\nMANIFEST\nDELIMITER ',' ESCAPE REMOVEQUOTES GZIP\nTIMEFORMAT AS 'auto' DATEFORMAT AS 'auto'\nTRUNCATECOLUMNS",
        relation.target_table_name.quoted()?,
        join_column_list(columns)?,
        quote_literal(&manifest_url),
        quote_literal(&format!("aws_iam_role={}", iam_role))
    ))
}

/// Query planning only, used in place of the actual copy during validation.
pub fn explain_stmt(query: &str) -> String {
    format!("EXPLAIN\n{}", query)
}

/// Query finding (up to five) constraint-violating value combinations.
///
/// Rows with NULLs never violate a plain unique constraint and are excluded;
/// key constraints check every row. Cells are cast to text so the result can
/// be rendered in an error message.
pub fn duplicate_check_stmt(relation: &Relation, constraint: &TableConstraint) -> Result<String> {
    let mut selected = Vec::with_capacity(constraint.columns().len());
    for column in constraint.columns() {
        selected.push(format!("{}::text", quote_identifier(column)?));
    }
    let where_clause = if constraint.excludes_nulls() {
        let conditions: Result<Vec<String>> = constraint
            .columns()
            .iter()
            .map(|c| Ok(format!("{} IS NOT NULL", quote_identifier(c)?)))
            .collect();
        format!("\nWHERE {}", conditions?.join(" AND "))
    } else {
        String::new()
    };
    Ok(format!(
        "SELECT {}\nFROM {}{}\nGROUP BY {}\nHAVING COUNT(*) > 1\nLIMIT 5",
        selected.join(", "),
        relation.target_table_name.quoted()?,
        where_clause,
        join_column_list(constraint.columns())?
    ))
}

/// Grant full access on a relation to its owner.
pub fn grant_all_to_user(relation: &Relation, user: &str) -> Result<String> {
    Ok(format!(
        "GRANT ALL ON {} TO {}",
        relation.target_table_name.quoted()?,
        quote_identifier(user)?
    ))
}

pub fn grant_select(relation: &Relation, group: &str) -> Result<String> {
    Ok(format!(
        "GRANT SELECT ON {} TO GROUP {}",
        relation.target_table_name.quoted()?,
        quote_identifier(group)?
    ))
}

pub fn grant_select_and_write(relation: &Relation, group: &str) -> Result<String> {
    Ok(format!(
        "GRANT SELECT, INSERT, UPDATE, DELETE ON {} TO GROUP {}",
        relation.target_table_name.quoted()?,
        quote_identifier(group)?
    ))
}
