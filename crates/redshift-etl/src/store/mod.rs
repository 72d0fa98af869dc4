//! Object storage access and manifest files.
//!
//! Layout of extracted data within a bucket:
//!
//! `{prefix}/data/{source_name}/{schema}-{table}/csv/part-0000.gz` holds the
//! partition files, and the manifest listing them lives one folder above at
//! `{prefix}/data/{source_name}/{schema}-{table}.manifest`.

pub mod memory;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Minimal object storage interface needed by the orchestrators.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Last-modified timestamp of an object, or None if it does not exist.
    async fn last_modified(&self, bucket: &str, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Keys under the given prefix.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Fetch an object's content.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Write an object, overwriting any existing content.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;
}

/// Poll for an object with a bounded wait.
///
/// Returns the object's last-modified timestamp as soon as it appears, or
/// None once the timeout elapses. Never waits forever.
pub async fn wait_for_object(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(last_modified) = store.last_modified(bucket, key).await? {
            return Ok(Some(last_modified));
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Ok(None);
        }
        debug!("Waiting for 's3://{}/{}' to appear", bucket, key);
        tokio::time::sleep(interval).await;
    }
}

/// One entry in a manifest: a remote partition file backing a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub mandatory: bool,
}

/// Index of the remote data files that together constitute one relation's
/// extracted data. Written once extraction completes; read by the loader to
/// drive the copy step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest for the given keys in a bucket; all entries are
    /// mandatory.
    pub fn for_files(bucket: &str, keys: &[String]) -> Self {
        Manifest {
            entries: keys
                .iter()
                .map(|key| ManifestEntry {
                    url: format!("s3://{}/{}", bucket, key),
                    mandatory: true,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}
