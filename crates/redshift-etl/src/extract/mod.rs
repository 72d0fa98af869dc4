//! Extraction orchestration: per-source concurrent extraction of relations
//! into object storage, with manifest publication and partial-failure
//! containment.

pub mod static_source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use crate::config::{EtlConfig, SchemaConfig};
use crate::error::{EtlError, Result};
use crate::monitor::{Monitor, MonitorPayload};
use crate::names::join_with_quotes;
use crate::relation::Relation;
use crate::retry::retry;
use crate::store::{wait_for_object, Manifest, ObjectStore};

pub use static_source::StaticSourceExtractor;

/// Capability to extract one relation's upstream data into object storage.
///
/// Implementations cover the different source flavors (static files already
/// in a bucket, bulk export, direct query); the orchestrator depends only on
/// this interface.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in monitor payloads and logs.
    fn name(&self) -> &'static str;

    /// Produce the partition files and completion marker for one relation.
    async fn extract_table(&self, source: &SchemaConfig, relation: &Relation) -> Result<()>;
}

/// Options for one extract invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Keep going past failed required relations; always wait for every
    /// source to settle.
    pub keep_going: bool,

    /// Log the work without touching the object store.
    pub dry_run: bool,

    /// Poll (bounded) for the upstream completion marker instead of checking
    /// once.
    pub wait: bool,
}

/// Summary of one extract run.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Identifiers of relations that failed but did not abort the run.
    pub failed: Vec<String>,
}

/// Runs extraction for a worklist: one task per distinct source, sequential
/// within a source.
pub struct ExtractOrchestrator {
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn ObjectStore>,
    monitor: Arc<dyn Monitor>,
    config: Arc<EtlConfig>,
    options: ExtractOptions,
}

/// Per-source outcome: relations that failed, split by required flag.
#[derive(Debug, Default)]
struct SourceOutcome {
    failed: Vec<String>,
    required_failed: Vec<String>,
}

impl ExtractOrchestrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn ObjectStore>,
        monitor: Arc<dyn Monitor>,
        config: Arc<EtlConfig>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            extractor,
            store,
            monitor,
            config,
            options,
        }
    }

    /// Extract every relation in the worklist, grouped by source.
    ///
    /// With `keep_going`, waits for every source to settle and fails at the
    /// end if any required relation failed. Without it, the first failed
    /// required relation aborts its source task and the run returns that
    /// error as soon as it is observed; sibling source tasks are not
    /// cancelled but the run no longer blocks on them.
    pub async fn run(self: Arc<Self>, worklist: Vec<Relation>) -> Result<ExtractReport> {
        let total = worklist.len();
        let by_source = group_by_source(worklist);
        info!(
            "Starting to extract {} relation(s) from {} source(s)",
            total,
            by_source.len()
        );

        let mut tasks = FuturesUnordered::new();
        for (source_name, relations) in by_source {
            let source = self.config.schema(&source_name)?.clone();
            let orchestrator = self.clone();
            tasks.push(tokio::spawn(async move {
                orchestrator.extract_source(source, relations).await
            }));
        }

        let mut report = ExtractReport::default();
        let mut required_failed = Vec::new();
        let mut first_error: Option<EtlError> = None;
        while let Some(settled) = tasks.next().await {
            let outcome = match settled {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(error)) => {
                    if !self.options.keep_going {
                        if !tasks.is_empty() {
                            warn!(
                                "Extract failed with {} source task(s) unfinished",
                                tasks.len()
                            );
                        }
                        return Err(error);
                    }
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    continue;
                }
                Err(join_error) => {
                    return Err(EtlError::Task(format!(
                        "Extract source task did not settle: {}",
                        join_error
                    )));
                }
            };
            required_failed.extend(outcome.required_failed);
            report.failed.extend(outcome.failed);
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        if !report.failed.is_empty() {
            warn!(
                "Failed to extract relation(s): {}",
                join_with_quotes(&report.failed)
            );
        }
        if !required_failed.is_empty() {
            return Err(EtlError::DataExtract(format!(
                "Failed to extract required relation(s): {}",
                join_with_quotes(&required_failed)
            )));
        }
        Ok(report)
    }

    /// Extract one source's relations strictly in order.
    async fn extract_source(
        &self,
        source: SchemaConfig,
        relations: Vec<Relation>,
    ) -> Result<SourceOutcome> {
        let started = Instant::now();
        let total = relations.len();
        info!(
            "Extracting {} relation(s) from source '{}'",
            total, source.name
        );

        let mut outcome = SourceOutcome::default();
        for (index, relation) in relations.iter().enumerate() {
            let payload = MonitorPayload::new(relation.identifier(), "extract")
                .with_option(self.extractor.name())
                .with_source("name", &source.name)
                .with_destination("bucket", &relation.bucket_name)
                .with_destination("prefix", relation.csv_prefix())
                .with_index(index + 1, total)
                .with_dry_run(self.options.dry_run);
            self.monitor.started(&payload);

            let attempt = retry(self.config.etl.extract_retries, || {
                self.extract_relation(&source, relation)
            })
            .await;
            match attempt {
                Ok(()) => self.monitor.succeeded(&payload),
                Err(error) => {
                    self.monitor.failed(&payload, &error.to_string());
                    let identifier = relation.identifier();
                    if !relation.is_required {
                        warn!(
                            "Failed to extract optional relation '{}' (continuing): {}",
                            identifier, error
                        );
                        outcome.failed.push(identifier);
                    } else if self.options.keep_going {
                        warn!(
                            "Failed to extract required relation '{}' (keep-going): {}",
                            identifier, error
                        );
                        outcome.failed.push(identifier.clone());
                        outcome.required_failed.push(identifier);
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        info!(
            "Finished source '{}' ({} relation(s), {} failed) in {:.1}s",
            source.name,
            total,
            outcome.failed.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(outcome)
    }

    /// Extract one relation and publish its manifest.
    async fn extract_relation(&self, source: &SchemaConfig, relation: &Relation) -> Result<()> {
        if self.options.dry_run {
            info!(
                "Dry-run: skipping extraction of '{}'",
                relation.identifier()
            );
        } else {
            self.extractor.extract_table(source, relation).await?;
        }
        self.publish_manifest(source, relation).await
    }

    /// Discover the relation's partition files and write its manifest.
    ///
    /// The data bucket is the source's own bucket for static sources and the
    /// ETL bucket otherwise; the manifest always lands in the ETL bucket.
    async fn publish_manifest(&self, source: &SchemaConfig, relation: &Relation) -> Result<()> {
        let data_bucket = if source.is_static_source {
            source.s3_bucket.as_deref().ok_or_else(|| {
                EtlError::Config(format!(
                    "Static source '{}' has no s3_bucket configured",
                    source.name
                ))
            })?
        } else {
            relation.bucket_name.as_str()
        };
        let csv_prefix = relation.csv_prefix();
        let marker = format!("{}/_SUCCESS", csv_prefix);

        let found = if self.options.wait && !self.options.dry_run {
            wait_for_object(
                self.store.as_ref(),
                data_bucket,
                &marker,
                Duration::from_secs(self.config.etl.marker_poll_timeout_secs),
                Duration::from_secs(self.config.etl.marker_poll_interval_secs),
            )
            .await?
        } else {
            self.store.last_modified(data_bucket, &marker).await?
        };
        if found.is_none() {
            if self.options.dry_run {
                warn!(
                    "Dry-run: no completion marker 's3://{}/{}', skipping manifest",
                    data_bucket, marker
                );
                return Ok(());
            }
            return Err(EtlError::MissingCsvFiles {
                relation: relation.identifier(),
                message: format!("No completion marker 's3://{}/{}'", data_bucket, marker),
            });
        }

        let mut files: Vec<String> = self
            .store
            .list_keys(data_bucket, &csv_prefix)
            .await?
            .into_iter()
            .filter(|key| key.contains("part") && key.ends_with(".gz"))
            .collect();
        files.sort();
        if files.is_empty() {
            if self.options.dry_run {
                warn!(
                    "Dry-run: no partition files under 's3://{}/{}'",
                    data_bucket, csv_prefix
                );
                return Ok(());
            }
            return Err(EtlError::MissingCsvFiles {
                relation: relation.identifier(),
                message: format!("No partition files under 's3://{}/{}'", data_bucket, csv_prefix),
            });
        }

        let manifest = Manifest::for_files(data_bucket, &files);
        if self.options.dry_run {
            info!(
                "Dry-run: would write manifest 's3://{}/{}' with {} entries",
                relation.bucket_name,
                relation.manifest_file_name,
                manifest.entries.len()
            );
            return Ok(());
        }
        info!(
            "Writing manifest 's3://{}/{}' with {} entries",
            relation.bucket_name,
            relation.manifest_file_name,
            manifest.entries.len()
        );
        self.store
            .put(
                &relation.bucket_name,
                &relation.manifest_file_name,
                manifest.to_json()?,
            )
            .await
    }
}

/// Group relations by source name, preserving the first-appearance order of
/// sources and the within-source relation order.
fn group_by_source(worklist: Vec<Relation>) -> Vec<(String, Vec<Relation>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Relation>)> = Vec::new();
    for relation in worklist {
        match index.get(&relation.source_name) {
            Some(&i) => groups[i].1.push(relation),
            None => {
                index.insert(relation.source_name.clone(), groups.len());
                groups.push((relation.source_name.clone(), vec![relation]));
            }
        }
    }
    groups
}
