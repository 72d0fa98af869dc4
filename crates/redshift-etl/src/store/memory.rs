//! In-memory object store used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{EtlError, Result};

use super::ObjectStore;

/// Object store backed by a map, keyed by (bucket, key).
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn last_modified(&self, bucket: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
        let objects = self.objects.lock().map_err(poisoned)?;
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, last_modified)| *last_modified))
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().map_err(poisoned)?;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().map_err(poisoned)?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, _)| body.clone())
            .ok_or_else(|| EtlError::Store(format!("No such object: 's3://{}/{}'", bucket, key)))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.lock().map_err(poisoned)?;
        objects.insert((bucket.to_string(), key.to_string()), (body, Utc::now()));
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> EtlError {
    EtlError::Store("Object store mutex poisoned".to_string())
}
