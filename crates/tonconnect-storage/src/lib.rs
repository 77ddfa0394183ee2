//! # tonconnect-storage
//!
//! Persistence adapters for TON Connect connection state.
//!
//! The connector persists one [`StorageData`] record per app name: the
//! [`Connection`] itself plus auxiliary values (relay heartbeat timestamp).
//! Two backends ship with the crate:
//!
//! - [`MemoryStorage`]: process-local, for tests and short-lived apps
//! - [`FileStorage`]: a single JSON document on disk, for CLI-style apps

#![deny(unsafe_code)]

pub mod errors;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tonconnect_core::Connection;

pub use errors::StorageError;
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Keys within a per-app record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKey {
    /// The persisted [`Connection`].
    Connection,
    /// Unix timestamp of the last relay heartbeat.
    Heartbeat,
}

/// Per-app persisted record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageData {
    /// The connection, once established.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    /// Last relay heartbeat, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<i64>,
}

impl StorageData {
    pub(crate) fn set_key(&mut self, key: StorageKey, value: Value) -> StorageResult<()> {
        match key {
            StorageKey::Connection => {
                self.connection = Some(serde_json::from_value(value)?);
            }
            StorageKey::Heartbeat => {
                self.heartbeat = serde_json::from_value(value)?;
            }
        }
        Ok(())
    }

    pub(crate) fn get_key(&self, key: StorageKey) -> StorageResult<Option<Value>> {
        Ok(match key {
            StorageKey::Connection => self
                .connection
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            StorageKey::Heartbeat => self.heartbeat.map(Value::from),
        })
    }

    pub(crate) fn remove_key(&mut self, key: StorageKey) {
        match key {
            StorageKey::Connection => self.connection = None,
            StorageKey::Heartbeat => self.heartbeat = None,
        }
    }
}

/// Key/value persistence consumed by the connector.
///
/// `insert` must fail with [`StorageError::AlreadyExists`] when the app name
/// is taken; the connector treats that failure as benign idempotence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the record for an app. Fails if the app already has one.
    async fn insert(&self, app_name: &str, data: StorageData) -> StorageResult<()>;

    /// Load the persisted connection, if any.
    async fn get_connection(&self, app_name: &str) -> StorageResult<Option<Connection>>;

    /// Persist the connection, creating the record if needed.
    async fn set_connection(&self, app_name: &str, connection: &Connection) -> StorageResult<()>;

    /// Remove one key from the app's record.
    async fn remove(&self, app_name: &str, key: StorageKey) -> StorageResult<()>;

    /// Set an auxiliary value on the app's record.
    async fn set(&self, app_name: &str, key: StorageKey, value: Value) -> StorageResult<()>;

    /// Read an auxiliary value from the app's record.
    async fn get(&self, app_name: &str, key: StorageKey) -> StorageResult<Option<Value>>;
}
