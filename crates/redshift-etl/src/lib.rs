//! ETL orchestration for a Redshift-style warehouse.
//!
//! Moves relational data from upstream sources into a warehouse: relations
//! are extracted to object storage as gzipped partition files with a manifest
//! per relation, then loaded or rebuilt in the warehouse honoring declared
//! inter-relation dependencies.
//!
//! The pieces, leaves first:
//!
//! - [`retry`] — bounded retry with exponential backoff over transient errors
//! - [`relation`] — relations, designs, and the dependency/selection resolver
//! - [`extract`] — per-source concurrent extraction and manifest publication
//! - [`load`] — transactional load with whole-schema backup/restore and
//!   cascading failure propagation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use redshift_etl::{
//!     evaluate_execution_order, load_relations, EtlConfig, LoadOptions,
//!     LoadOrchestrator, LogMonitor, PgWarehouse, S3Store, TableSelector,
//! };
//!
//! # async fn run() -> redshift_etl::Result<()> {
//! let config = Arc::new(EtlConfig::load("etl.yaml")?);
//! let relations = load_relations("schemas", &config)?;
//! let selector = TableSelector::new(&["www.orders".to_string()])?;
//! let (worklist, schemas) = evaluate_execution_order(relations, &selector, false, false)?;
//!
//! let orchestrator = LoadOrchestrator::new(
//!     Arc::new(PgWarehouse::new(config.warehouse.clone())),
//!     Arc::new(S3Store::new()),
//!     Arc::new(LogMonitor),
//!     config,
//! );
//! orchestrator.run(worklist, &schemas, LoadOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ddl;
pub mod error;
pub mod extract;
pub mod load;
pub mod monitor;
pub mod names;
pub mod relation;
pub mod retry;
pub mod store;
pub mod warehouse;

pub use config::{EtlConfig, EtlTuning, SchemaConfig, WarehouseConfig};
pub use error::{EtlError, Result};
pub use extract::{ExtractOptions, ExtractOrchestrator, ExtractReport, Extractor, StaticSourceExtractor};
pub use load::{LoadOptions, LoadOrchestrator, LoadReport};
pub use monitor::{LogMonitor, Monitor, MonitorPayload, RecordingMonitor};
pub use names::{TableName, TableSelector};
pub use relation::{
    evaluate_execution_order, find_dependents, find_matches, load_relations,
    order_by_dependencies, show_dependents, Relation, RelationKind, TableDesign,
};
pub use retry::retry;
pub use store::{Manifest, ManifestEntry, MemoryStore, ObjectStore, S3Store};
pub use warehouse::{PgWarehouse, Warehouse, WarehouseConnection};
