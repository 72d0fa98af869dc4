//! Data warehouse configuration loaded from YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Warehouse connection configuration.
    pub warehouse: WarehouseConfig,

    /// IAM role the warehouse assumes for bulk copies from object storage.
    pub iam_role: String,

    /// Bucket holding extracted data, manifests, and design files.
    pub bucket_name: String,

    /// Key prefix within the bucket (usually an environment name).
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Warehouse schemas managed by the ETL, upstream-backed and derived.
    pub schemas: Vec<SchemaConfig>,

    /// Tuning knobs with sensible defaults.
    #[serde(default)]
    pub etl: EtlTuning,
}

impl EtlConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: EtlConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.schemas.is_empty() {
            return Err(EtlError::Config(
                "At least one schema must be configured".to_string(),
            ));
        }
        for schema in &self.schemas {
            if schema.is_static_source && schema.s3_bucket.is_none() {
                return Err(EtlError::Config(format!(
                    "Static source schema '{}' must configure s3_bucket",
                    schema.name
                )));
            }
        }
        Ok(())
    }

    /// Look up the configuration for a schema by name.
    pub fn schema(&self, name: &str) -> Result<&SchemaConfig> {
        self.schemas
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EtlError::Config(format!("Unknown schema: '{}'", name)))
    }
}

/// Warehouse connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse host.
    pub host: String,

    /// Warehouse port (default: 5439).
    #[serde(default = "default_warehouse_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// ETL user.
    pub user: String,

    /// Password.
    #[serde(skip_serializing)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl WarehouseConfig {
    /// Connection string for the warehouse driver.
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }
}

/// One warehouse schema, upstream-backed or purely derived.
///
/// Used for access grants and backup/restore decisions, never for dependency
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Schema name in the warehouse; upstream-backed schemas use this as the
    /// source name in relation descriptors.
    pub name: String,

    /// Owner of all relations in this schema.
    pub owner: String,

    /// Groups granted read-only access.
    #[serde(default)]
    pub reader_groups: Vec<String>,

    /// Groups granted read-write access.
    #[serde(default)]
    pub writer_groups: Vec<String>,

    /// Whether this schema is backed by an upstream database source.
    #[serde(default)]
    pub is_upstream_source: bool,

    /// Whether this schema's data lives as static files in its own bucket.
    #[serde(default)]
    pub is_static_source: bool,

    /// Bucket holding the static source's files (static sources only).
    #[serde(default)]
    pub s3_bucket: Option<String>,
}

/// Tuning knobs. All fields have defaults so the section may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlTuning {
    /// Additional attempts for transient extraction failures.
    #[serde(default = "default_extract_retries")]
    pub extract_retries: usize,

    /// Upper bound in seconds when polling for an upstream completion marker.
    #[serde(default = "default_marker_poll_timeout")]
    pub marker_poll_timeout_secs: u64,

    /// Interval in seconds between completion marker polls.
    #[serde(default = "default_marker_poll_interval")]
    pub marker_poll_interval_secs: u64,

    /// Target table name prefixes that receive a synthetic n/a placeholder
    /// row (key = 0) when the design carries an identity column.
    #[serde(default = "default_na_row_prefixes")]
    pub na_row_table_prefixes: Vec<String>,
}

impl Default for EtlTuning {
    fn default() -> Self {
        Self {
            extract_retries: default_extract_retries(),
            marker_poll_timeout_secs: default_marker_poll_timeout(),
            marker_poll_interval_secs: default_marker_poll_interval(),
            na_row_table_prefixes: default_na_row_prefixes(),
        }
    }
}

// Default value functions for serde
fn default_prefix() -> String {
    "production".to_string()
}

fn default_warehouse_port() -> u16 {
    5439
}

fn default_require() -> String {
    "require".to_string()
}

fn default_extract_retries() -> usize {
    2
}

fn default_marker_poll_timeout() -> u64 {
    300
}

fn default_marker_poll_interval() -> u64 {
    15
}

fn default_na_row_prefixes() -> Vec<String> {
    vec!["dim_".to_string()]
}
