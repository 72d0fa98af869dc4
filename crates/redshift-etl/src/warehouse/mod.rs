//! Warehouse access: connections, schema management, and access grants.

pub mod postgres;
pub mod tls;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::SchemaConfig;
use crate::error::Result;
use crate::names::{quote_identifier, quote_literal};

pub use postgres::PgWarehouse;
pub use tls::SslMode;

/// Prefix for backup schemas created before a destructive rebuild.
const BACKUP_PREFIX: &str = "etl_backup$";

/// Factory for warehouse connections.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Open a new connection. With `autocommit` every statement commits on
    /// its own; otherwise a transaction is opened and must be finished with
    /// [`WarehouseConnection::commit`] or [`WarehouseConnection::rollback`].
    async fn connect(&self, autocommit: bool) -> Result<Box<dyn WarehouseConnection>>;
}

/// A single warehouse connection.
#[async_trait]
pub trait WarehouseConnection: Send {
    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and return rows of text-rendered cells.
    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Database this connection is attached to, for log messages.
    fn database(&self) -> &str;
}

/// Name of the backup schema for a given schema.
pub fn backup_schema_name(name: &str) -> String {
    format!("{}{}", BACKUP_PREFIX, name)
}

async fn schema_exists(conn: &mut dyn WarehouseConnection, name: &str) -> Result<bool> {
    let rows = conn
        .query(&format!(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = {}",
            quote_literal(name)
        ))
        .await?;
    Ok(!rows.is_empty())
}

/// Move the given schemas out of the way by renaming them to their backup
/// names. Schemas that do not exist yet are skipped; pre-existing backups are
/// dropped first.
pub async fn backup_schemas(
    conn: &mut dyn WarehouseConnection,
    schemas: &[SchemaConfig],
) -> Result<()> {
    for schema in schemas {
        if !schema_exists(conn, &schema.name).await? {
            warn!("Schema '{}' does not exist, skipping backup", schema.name);
            continue;
        }
        let backup = backup_schema_name(&schema.name);
        info!("Backing up schema '{}' as '{}'", schema.name, backup);
        conn.execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_identifier(&backup)?
        ))
        .await?;
        conn.execute(&format!(
            "ALTER SCHEMA {} RENAME TO {}",
            quote_identifier(&schema.name)?,
            quote_identifier(&backup)?
        ))
        .await?;
    }
    Ok(())
}

/// Create the given schemas from scratch and apply group grants.
pub async fn create_schemas(
    conn: &mut dyn WarehouseConnection,
    schemas: &[SchemaConfig],
) -> Result<()> {
    for schema in schemas {
        info!("Creating schema '{}'", schema.name);
        conn.execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_identifier(&schema.name)?
        ))
        .await?;
        conn.execute(&format!(
            "CREATE SCHEMA {} AUTHORIZATION {}",
            quote_identifier(&schema.name)?,
            quote_identifier(&schema.owner)?
        ))
        .await?;
        grant_schema_access(conn, schema).await?;
    }
    Ok(())
}

/// Bring back the backed-up schemas, replacing whatever the failed run left
/// behind.
pub async fn restore_schemas(
    conn: &mut dyn WarehouseConnection,
    schemas: &[SchemaConfig],
) -> Result<()> {
    for schema in schemas {
        let backup = backup_schema_name(&schema.name);
        if !schema_exists(conn, &backup).await? {
            warn!(
                "No backup '{}' found for schema '{}', leaving it as-is",
                backup, schema.name
            );
            continue;
        }
        info!("Restoring schema '{}' from '{}'", schema.name, backup);
        conn.execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_identifier(&schema.name)?
        ))
        .await?;
        conn.execute(&format!(
            "ALTER SCHEMA {} RENAME TO {}",
            quote_identifier(&backup)?,
            quote_identifier(&schema.name)?
        ))
        .await?;
        grant_schema_access(conn, schema).await?;
    }
    Ok(())
}

/// Grant schema usage to the configured reader and writer groups.
pub async fn grant_schema_access(
    conn: &mut dyn WarehouseConnection,
    schema: &SchemaConfig,
) -> Result<()> {
    let quoted = quote_identifier(&schema.name)?;
    for group in &schema.reader_groups {
        conn.execute(&format!(
            "GRANT USAGE ON SCHEMA {} TO GROUP {}",
            quoted,
            quote_identifier(group)?
        ))
        .await?;
    }
    for group in &schema.writer_groups {
        conn.execute(&format!(
            "GRANT USAGE, CREATE ON SCHEMA {} TO GROUP {}",
            quoted,
            quote_identifier(group)?
        ))
        .await?;
    }
    Ok(())
}
