//! Load orchestration: execute the resolved order against the warehouse.
//!
//! Two modes share one code path. A destructive rebuild ("whole-schema
//! mode", triggered by `drop` without a single-relation restriction) renames
//! every touched schema to a backup, recreates it empty, and loads on an
//! autocommitting connection; a fatal failure restores the backups. The
//! incremental mode runs the whole worklist inside one transaction and rolls
//! back on the first failure.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{EtlConfig, SchemaConfig};
use crate::ddl;
use crate::error::{EtlError, Result};
use crate::monitor::{Monitor, MonitorPayload};
use crate::names::join_with_quotes;
use crate::relation::{find_dependents, Relation, TableConstraint};
use crate::store::ObjectStore;
use crate::warehouse::{backup_schemas, create_schemas, restore_schemas, Warehouse, WarehouseConnection};

/// Options for one load invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Drop and rebuild instead of updating in place. Without
    /// `stop_after_first` this triggers whole-schema mode.
    pub drop: bool,

    /// The caller restricted the run to a single relation.
    pub stop_after_first: bool,

    /// Never restore schema backups, even on a fatal failure.
    pub no_rollback: bool,

    /// Create tables and grants but skip data movement; CTAS queries are
    /// checked with EXPLAIN.
    pub skip_copy: bool,

    /// Log the work without touching the warehouse.
    pub dry_run: bool,
}

impl LoadOptions {
    pub fn whole_schemas(&self) -> bool {
        self.drop && !self.stop_after_first
    }
}

/// Summary of one load run.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Runs the load worklist against the warehouse, one relation at a time.
pub struct LoadOrchestrator {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    monitor: Arc<dyn Monitor>,
    config: Arc<EtlConfig>,
}

impl LoadOrchestrator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn ObjectStore>,
        monitor: Arc<dyn Monitor>,
        config: Arc<EtlConfig>,
    ) -> Self {
        Self {
            warehouse,
            store,
            monitor,
            config,
        }
    }

    /// Load the worklist. `schemas` is the touched-schema set from the
    /// resolver; it drives backup/restore in whole-schema mode.
    pub async fn run(
        &self,
        worklist: Vec<Relation>,
        schemas: &BTreeSet<String>,
        options: LoadOptions,
    ) -> Result<LoadReport> {
        let schema_configs: Vec<SchemaConfig> = schemas
            .iter()
            .map(|name| self.config.schema(name).cloned())
            .collect::<Result<_>>()?;
        let whole_schemas = options.whole_schemas();
        info!(
            "Starting to load {} relation(s) into schema(s) {} (whole-schema mode: {})",
            worklist.len(),
            join_with_quotes(schemas),
            whole_schemas
        );

        if whole_schemas {
            if options.dry_run {
                info!(
                    "Dry-run: would back up and recreate schema(s) {}",
                    join_with_quotes(schemas)
                );
            } else {
                let mut admin = self.warehouse.connect(true).await?;
                backup_schemas(admin.as_mut(), &schema_configs).await?;
                create_schemas(admin.as_mut(), &schema_configs).await?;
            }
        }

        // A dry run walks the whole worklist with a connection stand-in so
        // every statement and monitor span is still produced.
        let mut conn: Box<dyn WarehouseConnection> = if options.dry_run {
            Box::new(DryRunConnection {
                database: self.config.warehouse.database.clone(),
            })
        } else {
            self.warehouse.connect(whole_schemas).await?
        };
        let mut report = LoadReport::default();
        let mut skip_set: HashSet<String> = HashSet::new();
        let total = worklist.len();

        for (index, relation) in worklist.iter().enumerate() {
            let identifier = relation.identifier();
            if skip_set.contains(&identifier) {
                warn!("Skipping load of '{}': an upstream relation failed", identifier);
                report.skipped.push(identifier);
                continue;
            }

            let payload = MonitorPayload::new(&identifier, "load")
                .with_source("bucket", &relation.bucket_name)
                .with_destination("table", &identifier)
                .with_index(index + 1, total)
                .with_dry_run(options.dry_run);
            self.monitor.started(&payload);

            match self.load_relation(conn.as_mut(), relation, &options).await {
                Ok(()) => {
                    self.monitor.succeeded(&payload);
                    report.loaded.push(identifier);
                }
                Err(error) => {
                    self.monitor.failed(&payload, &error.to_string());
                    if !whole_schemas {
                        conn.rollback().await?;
                        return Err(error);
                    }
                    let dependents = find_dependents(&worklist, std::slice::from_ref(relation));
                    let mut required: Vec<String> = dependents
                        .iter()
                        .filter(|r| r.is_required)
                        .map(|r| r.identifier())
                        .collect();
                    if relation.is_required {
                        required.insert(0, identifier.clone());
                    }
                    if !required.is_empty() {
                        self.restore_after_failure(&schema_configs, &options).await;
                        return Err(EtlError::RequiredRelationLoad {
                            relation: identifier,
                            required,
                            cause: Box::new(error),
                        });
                    }
                    warn!(
                        "Failed to load '{}' (skipping {} dependent(s)): {}",
                        identifier,
                        dependents.len(),
                        error
                    );
                    skip_set.extend(dependents.iter().map(|r| r.identifier()));
                }
            }
        }

        if !whole_schemas {
            conn.commit().await?;
        }
        if !report.skipped.is_empty() {
            warn!(
                "Skipped relation(s): {}",
                join_with_quotes(&report.skipped)
            );
        }

        // Reclaim space and re-sort updated tables. A destructive rebuild
        // starts from empty tables, so there is nothing to vacuum.
        if !options.drop && !options.skip_copy && !options.dry_run {
            self.vacuum_pass(&worklist, &report.loaded).await?;
        }
        Ok(report)
    }

    /// Best-effort restore of schema backups on a fresh connection, since the
    /// failing connection may be unusable.
    async fn restore_after_failure(&self, schemas: &[SchemaConfig], options: &LoadOptions) {
        if options.dry_run {
            return;
        }
        if options.no_rollback {
            warn!("Rollback suppressed, leaving schemas as they are");
            return;
        }
        match self.warehouse.connect(true).await {
            Ok(mut conn) => {
                if let Err(restore_error) = restore_schemas(conn.as_mut(), schemas).await {
                    warn!("Failed to restore schema backups: {}", restore_error);
                }
            }
            Err(connect_error) => {
                warn!(
                    "Could not connect to restore schema backups: {}",
                    connect_error
                );
            }
        }
    }

    async fn vacuum_pass(&self, worklist: &[Relation], loaded: &[String]) -> Result<()> {
        let modified: Vec<&Relation> = worklist
            .iter()
            .filter(|r| !r.is_view() && loaded.contains(&r.identifier()))
            .collect();
        if modified.is_empty() {
            return Ok(());
        }
        info!("Vacuuming {} relation(s)", modified.len());
        let mut conn = self.warehouse.connect(true).await?;
        for relation in modified {
            conn.execute(&ddl::vacuum_stmt(relation)?).await?;
        }
        Ok(())
    }

    async fn load_relation(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
        options: &LoadOptions,
    ) -> Result<()> {
        if relation.is_view() {
            self.load_view(conn, relation, options).await
        } else if relation.is_ctas() {
            self.load_ctas(conn, relation, options).await
        } else {
            self.load_data(conn, relation, options).await
        }
    }

    async fn load_view(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
        options: &LoadOptions,
    ) -> Result<()> {
        let view_ddl = ddl::create_view_ddl(relation)?;
        if !options.drop {
            info!(
                "Leaving view '{}' as-is; would have run: {}",
                relation.identifier(),
                view_ddl
            );
            return Ok(());
        }
        conn.execute(&ddl::drop_view_stmt(relation)?).await?;
        conn.execute(&view_ddl).await?;
        self.grant_access(conn, relation).await
    }

    async fn load_ctas(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
        options: &LoadOptions,
    ) -> Result<()> {
        if options.drop {
            conn.execute(&ddl::drop_table_stmt(relation)?).await?;
        }
        conn.execute(&ddl::create_table_ddl(relation)?).await?;

        if options.skip_copy {
            let query = relation
                .query_stmt
                .as_deref()
                .ok_or_else(|| EtlError::MissingQuery(relation.identifier()))?;
            info!("Skipping load of '{}', checking query plan", relation.identifier());
            conn.query(&ddl::explain_stmt(query)).await?;
            return self.grant_access(conn, relation).await;
        }

        conn.execute(&ddl::create_temp_table_ddl(relation)?).await?;
        conn.execute(&ddl::fill_temp_dml(relation)?).await?;
        conn.execute(&ddl::delete_stmt(relation)?).await?;
        if self.needs_na_row(relation) {
            conn.execute(&ddl::na_row_dml(relation)?).await?;
        }
        let rows = conn.execute(&ddl::insert_from_temp_dml(relation)?).await?;
        info!("Loaded {} row(s) into '{}'", rows, relation.identifier());
        conn.execute(&ddl::drop_temp_table_stmt(relation)?).await?;
        conn.execute(&ddl::analyze_stmt(relation)?).await?;
        // Derived data is granted only once its constraints check out;
        // upstream-backed tables are granted right after creation instead.
        self.verify_constraints(conn, relation).await?;
        self.grant_access(conn, relation).await
    }

    async fn load_data(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
        options: &LoadOptions,
    ) -> Result<()> {
        if options.drop {
            conn.execute(&ddl::drop_table_stmt(relation)?).await?;
        }
        conn.execute(&ddl::create_table_ddl(relation)?).await?;
        self.grant_access(conn, relation).await?;

        if options.skip_copy {
            info!("Skipping copy into '{}'", relation.identifier());
            return Ok(());
        }

        // The manifest existing is necessary but not sufficient; the copy
        // itself still validates the files it references.
        let manifest_found = self
            .store
            .last_modified(&relation.bucket_name, &relation.manifest_file_name)
            .await?;
        if manifest_found.is_none() {
            if options.dry_run {
                warn!(
                    "Manifest '{}' not found (ignored for dry-run)",
                    relation.manifest_file_name
                );
            } else {
                return Err(EtlError::MissingManifest(relation.identifier()));
            }
        }

        conn.execute(&ddl::delete_stmt(relation)?).await?;
        let rows = conn
            .execute(&ddl::copy_stmt(relation, &self.config.iam_role)?)
            .await?;
        info!("Copied {} row(s) into '{}'", rows, relation.identifier());
        conn.execute(&ddl::analyze_stmt(relation)?).await?;
        self.verify_constraints(conn, relation).await
    }

    /// Whether this relation gets the synthetic n/a placeholder row.
    fn needs_na_row(&self, relation: &Relation) -> bool {
        relation.design.has_identity_column()
            && self
                .config
                .etl
                .na_row_table_prefixes
                .iter()
                .any(|prefix| relation.target_table_name.table.starts_with(prefix.as_str()))
    }

    /// Post-hoc audit of declared constraints over the live target table.
    async fn verify_constraints(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
    ) -> Result<()> {
        for constraint in &relation.design.constraints {
            let rows = conn
                .query(&ddl::duplicate_check_stmt(relation, constraint)?)
                .await?;
            if !rows.is_empty() {
                return Err(failed_constraint(relation, constraint, rows));
            }
        }
        Ok(())
    }

    async fn grant_access(
        &self,
        conn: &mut dyn WarehouseConnection,
        relation: &Relation,
    ) -> Result<()> {
        let schema = self.config.schema(&relation.target_table_name.schema)?;
        conn.execute(&ddl::grant_all_to_user(relation, &schema.owner)?)
            .await?;
        for group in &schema.reader_groups {
            conn.execute(&ddl::grant_select(relation, group)?).await?;
        }
        for group in &schema.writer_groups {
            conn.execute(&ddl::grant_select_and_write(relation, group)?)
                .await?;
        }
        Ok(())
    }
}

/// Connection stand-in for dry runs: logs every statement instead of
/// executing it and reports empty results.
struct DryRunConnection {
    database: String,
}

#[async_trait]
impl WarehouseConnection for DryRunConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        info!("Dry-run: {}", sql);
        Ok(0)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        info!("Dry-run: {}", sql);
        Ok(Vec::new())
    }

    async fn commit(&mut self) -> Result<()> {
        info!("Dry-run: COMMIT");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        info!("Dry-run: ROLLBACK");
        Ok(())
    }

    fn database(&self) -> &str {
        &self.database
    }
}

fn failed_constraint(
    relation: &Relation,
    constraint: &TableConstraint,
    rows: Vec<Vec<Option<String>>>,
) -> EtlError {
    let examples = rows
        .into_iter()
        .map(|row| {
            let cells: Vec<String> = row
                .into_iter()
                .map(|cell| cell.unwrap_or_else(|| "null".to_string()))
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    EtlError::FailedConstraint {
        identifier: relation.identifier(),
        constraint: constraint.kind().to_string(),
        columns: constraint.columns().to_vec(),
        examples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::monitor::{MonitorEvent, RecordingMonitor};
    use crate::relation::testing::{relation, relation_with};
    use crate::relation::{RelationDescriptor, RelationKind};
    use crate::store::{Manifest, MemoryStore, ObjectStore};
    use crate::warehouse::testing::FakeWarehouse;

    fn config() -> Arc<EtlConfig> {
        Arc::new(
            serde_yaml::from_str(
                r#"
warehouse: {host: h, database: d, user: u, password: p}
iam_role: arn:aws:iam::1:role/etl
bucket_name: example-etl
schemas:
  - {name: www, owner: etl, is_upstream_source: true, reader_groups: [analysts]}
  - {name: analytics, owner: etl, writer_groups: [loaders]}
"#,
            )
            .unwrap(),
        )
    }

    fn orchestrator(
        warehouse: &FakeWarehouse,
        store: Arc<MemoryStore>,
    ) -> LoadOrchestrator {
        LoadOrchestrator::new(
            Arc::new(warehouse.clone()),
            store,
            Arc::new(RecordingMonitor::new()),
            config(),
        )
    }

    async fn put_manifest(store: &MemoryStore, rel: &Relation) {
        let manifest = Manifest::for_files(
            &rel.bucket_name,
            &[format!("{}/part-0000.gz", rel.csv_prefix())],
        );
        store
            .put(
                &rel.bucket_name,
                &rel.manifest_file_name,
                manifest.to_json().unwrap(),
            )
            .await
            .unwrap();
    }

    fn schemas(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_incremental_data_load_statement_sequence() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let rel = relation("www.orders", &[]);
        put_manifest(&store, &rel).await;

        let report = orchestrator(&warehouse, store)
            .run(vec![rel], &schemas(&["www"]), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(report.loaded, vec!["www.orders"]);

        let statements = warehouse.statements();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("no statement containing {:?}", needle))
        };
        assert!(position("CREATE TABLE IF NOT EXISTS \"www\".\"orders\"") < position("DELETE FROM"));
        assert!(position("DELETE FROM") < position("COPY \"www\".\"orders\""));
        assert!(position("COPY \"www\".\"orders\"") < position("ANALYZE"));
        assert!(position("ANALYZE") < position("COMMIT"));
        // Incremental loads vacuum on a fresh autocommit connection afterwards.
        assert!(position("COMMIT") < position("VACUUM \"www\".\"orders\""));
        assert!(statements
            .iter()
            .any(|s| s == "GRANT SELECT ON \"www\".\"orders\" TO GROUP \"analysts\""));
        // No schema backup outside whole-schema mode.
        assert!(warehouse.statements_matching("etl_backup$").is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest_rolls_back_transaction() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let rel = relation("www.orders", &[]);

        let result = orchestrator(&warehouse, store)
            .run(vec![rel], &schemas(&["www"]), LoadOptions::default())
            .await;
        assert!(matches!(result, Err(EtlError::MissingManifest(_))));
        assert!(!warehouse.statements_matching("ROLLBACK").is_empty());
        assert!(warehouse.statements_matching("COMMIT").is_empty());
    }

    #[tokio::test]
    async fn test_constraint_violation_carries_examples() {
        let warehouse = FakeWarehouse::new();
        warehouse.respond(
            "HAVING COUNT(*) > 1",
            vec![vec![Some("a@example.com".to_string())]],
        );
        let store = Arc::new(MemoryStore::new());
        let rel = relation("www.orders", &[]); // design declares no constraints
        let mut rel = rel;
        rel.design.constraints = vec![TableConstraint::Unique(vec!["id".to_string()])];
        put_manifest(&store, &rel).await;

        let result = orchestrator(&warehouse, store)
            .run(vec![rel], &schemas(&["www"]), LoadOptions::default())
            .await;
        match result {
            Err(EtlError::FailedConstraint {
                identifier,
                constraint,
                examples,
                ..
            }) => {
                assert_eq!(identifier, "www.orders");
                assert_eq!(constraint, "unique");
                assert_eq!(examples, vec!["(a@example.com)"]);
            }
            other => panic!("expected constraint violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whole_schema_optional_failure_skips_dependents() {
        let warehouse = FakeWarehouse::new();
        warehouse.respond("schema_name = 'www'", vec![vec![Some("1".to_string())]]);
        warehouse.fail_on("CREATE TABLE IF NOT EXISTS \"www\".\"a\"");
        let store = Arc::new(MemoryStore::new());
        let worklist = vec![
            relation("www.a", &[]),
            relation("www.b", &["www.a"]),
            relation("www.c", &["www.b"]),
        ];

        let options = LoadOptions {
            drop: true,
            ..Default::default()
        };
        let report = orchestrator(&warehouse, store)
            .run(worklist, &schemas(&["www"]), options)
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["www.b", "www.c"]);
        assert!(report.loaded.is_empty());
        // Backups were taken and retained (restoration never ran).
        assert!(warehouse
            .statements()
            .iter()
            .any(|s| s == "ALTER SCHEMA \"www\" RENAME TO \"etl_backup$www\""));
        assert!(!warehouse
            .statements()
            .iter()
            .any(|s| s == "ALTER SCHEMA \"etl_backup$www\" RENAME TO \"www\""));
    }

    #[tokio::test]
    async fn test_whole_schema_required_failure_restores_backups() {
        let warehouse = FakeWarehouse::new();
        warehouse.respond("schema_name = 'www'", vec![vec![Some("1".to_string())]]);
        warehouse.respond(
            "schema_name = 'etl_backup$www'",
            vec![vec![Some("1".to_string())]],
        );
        warehouse.fail_on("CREATE TABLE IF NOT EXISTS \"www\".\"users\"");
        let store = Arc::new(MemoryStore::new());
        let worklist = vec![
            relation_with("www.users", &[], RelationKind::Data, true),
            relation("www.orders", &["www.users"]),
        ];

        let options = LoadOptions {
            drop: true,
            ..Default::default()
        };
        let result = orchestrator(&warehouse, store)
            .run(worklist, &schemas(&["www"]), options)
            .await;
        match result {
            Err(EtlError::RequiredRelationLoad {
                relation, required, ..
            }) => {
                assert_eq!(relation, "www.users");
                assert_eq!(required, vec!["www.users"]);
            }
            other => panic!("expected required relation load error, got {:?}", other),
        }
        assert!(warehouse
            .statements()
            .iter()
            .any(|s| s == "ALTER SCHEMA \"etl_backup$www\" RENAME TO \"www\""));
    }

    #[tokio::test]
    async fn test_no_rollback_suppresses_restore() {
        let warehouse = FakeWarehouse::new();
        warehouse.respond("schema_name = 'www'", vec![vec![Some("1".to_string())]]);
        warehouse.fail_on("CREATE TABLE IF NOT EXISTS \"www\".\"users\"");
        let store = Arc::new(MemoryStore::new());
        let worklist = vec![relation_with("www.users", &[], RelationKind::Data, true)];

        let options = LoadOptions {
            drop: true,
            no_rollback: true,
            ..Default::default()
        };
        let result = orchestrator(&warehouse, store)
            .run(worklist, &schemas(&["www"]), options)
            .await;
        assert!(result.is_err());
        assert!(!warehouse
            .statements()
            .iter()
            .any(|s| s.contains("RENAME TO \"www\"")));
    }

    #[tokio::test]
    async fn test_view_without_drop_only_logs() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let worklist = vec![relation_with("analytics.v", &[], RelationKind::View, false)];

        let report = orchestrator(&warehouse, store)
            .run(worklist, &schemas(&["analytics"]), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(report.loaded, vec!["analytics.v"]);
        assert!(warehouse.statements_matching("CREATE VIEW").is_empty());
        // Views are never vacuumed.
        assert!(warehouse.statements_matching("VACUUM").is_empty());
    }

    #[tokio::test]
    async fn test_skip_copy_explains_ctas_query() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let worklist = vec![relation_with("analytics.t", &[], RelationKind::Ctas, false)];

        let options = LoadOptions {
            skip_copy: true,
            ..Default::default()
        };
        orchestrator(&warehouse, store)
            .run(worklist, &schemas(&["analytics"]), options)
            .await
            .unwrap();
        assert!(!warehouse.statements_matching("EXPLAIN").is_empty());
        assert!(warehouse.statements_matching("INSERT INTO").is_empty());
    }

    #[tokio::test]
    async fn test_ctas_with_identity_gets_na_row() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let descriptor: RelationDescriptor = serde_yaml::from_str(
            r#"
name: analytics.dim_date
source_name: analytics
kind: ctas
columns:
  - name: date_key
    type: int
    sql_type: int
    identity: true
    not_null: true
  - name: full_date
    type: date
    sql_type: date
    not_null: true
"#,
        )
        .unwrap();
        let rel = Relation::from_descriptor(
            descriptor,
            Some("SELECT full_date FROM analytics.calendar".to_string()),
            &config(),
        )
        .unwrap();

        orchestrator(&warehouse, store)
            .run(vec![rel], &schemas(&["analytics"]), LoadOptions::default())
            .await
            .unwrap();
        let statements = warehouse.statements();
        let na = statements
            .iter()
            .position(|s| s.contains("SELECT 0, '0000-01-01 00:00:00'"))
            .expect("n/a row insert");
        let fill = statements
            .iter()
            .position(|s| s.contains("FROM \"etl_temp$dim_date\""))
            .expect("insert from temp");
        assert!(na < fill, "n/a row must be inserted before the data");
        assert!(statements.iter().any(|s| s.contains("DROP TABLE \"etl_temp$dim_date\"")));
    }

    #[tokio::test]
    async fn test_ctas_grants_follow_verification() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let mut rel = relation_with("analytics.t", &[], RelationKind::Ctas, false);
        rel.design.constraints = vec![TableConstraint::PrimaryKey(vec!["id".to_string()])];

        orchestrator(&warehouse, store)
            .run(vec![rel], &schemas(&["analytics"]), LoadOptions::default())
            .await
            .unwrap();
        let statements = warehouse.statements();
        let position = |needle: &str| {
            statements
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("no statement containing {:?}", needle))
        };
        // Derived tables are only exposed after the duplicate check passes.
        assert!(position("HAVING COUNT(*) > 1") < position("GRANT ALL ON \"analytics\".\"t\""));
        assert!(position("INSERT INTO \"analytics\".\"t\"") < position("GRANT ALL"));
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_touching_warehouse() {
        let warehouse = FakeWarehouse::new();
        let store = Arc::new(MemoryStore::new());
        let monitor = Arc::new(RecordingMonitor::new());
        let orchestrator = LoadOrchestrator::new(
            Arc::new(warehouse.clone()),
            store,
            monitor.clone(),
            config(),
        );
        // No manifest published; a dry run warns instead of failing.
        let worklist = vec![relation("www.orders", &[])];

        let options = LoadOptions {
            dry_run: true,
            drop: true,
            ..Default::default()
        };
        let report = orchestrator
            .run(worklist, &schemas(&["www"]), options)
            .await
            .unwrap();
        assert_eq!(report.loaded, vec!["www.orders"]);
        assert!(warehouse.statements().is_empty());
        // The per-relation span still fires, flagged as a dry run.
        let events = monitor.events();
        assert_eq!(
            events[0],
            MonitorEvent::Started {
                identifier: "www.orders".to_string(),
                step: "load".to_string(),
                dry_run: true,
            }
        );
        assert_eq!(
            events[1],
            MonitorEvent::Succeeded {
                identifier: "www.orders".to_string(),
                step: "load".to_string(),
            }
        );
    }
}
