//! Extractor for relations whose partition files are produced by an outside
//! process.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::SchemaConfig;
use crate::error::{EtlError, Result};
use crate::relation::Relation;
use crate::store::ObjectStore;

use super::Extractor;

/// "Extraction" for pre-materialized data: static sources upload files into
/// their own bucket, and bulk exports land in the ETL bucket through an
/// external pipeline. Either way there is nothing to produce here; this
/// extractor only verifies the files exist. Manifest publication happens in
/// the orchestrator as for any other source.
pub struct StaticSourceExtractor {
    store: Arc<dyn ObjectStore>,
}

impl StaticSourceExtractor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Extractor for StaticSourceExtractor {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn extract_table(&self, source: &SchemaConfig, relation: &Relation) -> Result<()> {
        let bucket = if source.is_static_source {
            source.s3_bucket.as_deref().ok_or_else(|| {
                EtlError::Config(format!(
                    "Static source '{}' has no s3_bucket configured",
                    source.name
                ))
            })?
        } else {
            relation.bucket_name.as_str()
        };
        let prefix = relation.csv_prefix();
        let files = self.store.list_keys(bucket, &prefix).await?;
        if files.is_empty() {
            return Err(EtlError::DataExtract(format!(
                "No files found for relation '{}' under 's3://{}/{}'",
                relation.identifier(),
                bucket,
                prefix
            )));
        }
        info!(
            "Found {} file(s) for relation '{}'",
            files.len(),
            relation.identifier()
        );
        Ok(())
    }
}
