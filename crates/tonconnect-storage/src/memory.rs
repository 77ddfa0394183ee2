//! In-memory storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use tonconnect_core::Connection;

use crate::{Storage, StorageData, StorageError, StorageKey, StorageResult};

/// Process-local storage; state is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<String, StorageData>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert(&self, app_name: &str, data: StorageData) -> StorageResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(app_name) {
            return Err(StorageError::AlreadyExists(app_name.to_owned()));
        }
        let _ = records.insert(app_name.to_owned(), data);
        Ok(())
    }

    async fn get_connection(&self, app_name: &str) -> StorageResult<Option<Connection>> {
        let records = self.records.read().await;
        Ok(records.get(app_name).and_then(|r| r.connection.clone()))
    }

    async fn set_connection(&self, app_name: &str, connection: &Connection) -> StorageResult<()> {
        let mut records = self.records.write().await;
        records.entry(app_name.to_owned()).or_default().connection = Some(connection.clone());
        Ok(())
    }

    async fn remove(&self, app_name: &str, key: StorageKey) -> StorageResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(app_name) {
            record.remove_key(key);
        }
        Ok(())
    }

    async fn set(&self, app_name: &str, key: StorageKey, value: Value) -> StorageResult<()> {
        let mut records = self.records.write().await;
        records.entry(app_name.to_owned()).or_default().set_key(key, value)
    }

    async fn get(&self, app_name: &str, key: StorageKey) -> StorageResult<Option<Value>> {
        let records = self.records.read().await;
        match records.get(app_name) {
            Some(record) => record.get_key(key),
            None => Ok(None),
        }
    }
}
