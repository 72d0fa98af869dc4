//! S3-backed object store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as RemotePath;
use object_store::{ObjectStore as RemoteStore, PutPayload};
use tokio::sync::Mutex;

use crate::error::{EtlError, Result};

use super::ObjectStore;

/// Object store talking to S3, with one client per bucket.
///
/// Credentials and region come from the environment (standard AWS variables
/// or instance metadata).
#[derive(Debug, Default)]
pub struct S3Store {
    clients: Mutex<HashMap<String, Arc<dyn RemoteStore>>>,
}

impl S3Store {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, bucket: &str) -> Result<Arc<dyn RemoteStore>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }
        let client: Arc<dyn RemoteStore> = Arc::new(
            AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| EtlError::Store(format!("Failed to build S3 client: {}", e)))?,
        );
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn last_modified(&self, bucket: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let client = self.client(bucket).await?;
        match client.head(&RemotePath::from(key)).await {
            Ok(meta) => Ok(Some(meta.last_modified)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_error(bucket, key, e)),
        }
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let client = self.client(bucket).await?;
        let mut keys: Vec<String> = client
            .list(Some(&RemotePath::from(prefix)))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| store_error(bucket, prefix, e))?;
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let client = self.client(bucket).await?;
        let result = client
            .get(&RemotePath::from(key))
            .await
            .map_err(|e| store_error(bucket, key, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| store_error(bucket, key, e))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let client = self.client(bucket).await?;
        client
            .put(&RemotePath::from(key), PutPayload::from(body))
            .await
            .map_err(|e| store_error(bucket, key, e))?;
        Ok(())
    }
}

fn store_error(bucket: &str, key: &str, error: object_store::Error) -> EtlError {
    EtlError::Store(format!("'s3://{}/{}': {}", bucket, key, error))
}
