//! JSON-file storage backend.
//!
//! The whole store is one pretty-printed JSON document mapping app names to
//! their records. Every mutation rewrites the file under an internal lock;
//! on unix the file is created with 0o600 permissions since it holds session
//! private keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use tonconnect_core::Connection;

use crate::{Storage, StorageData, StorageError, StorageKey, StorageResult};

/// File-backed storage for CLI-style applications.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Create a store backed by the given file. The file is created lazily
    /// on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<HashMap<String, StorageData>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, records: &HashMap<String, StorageData>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.path, perms);
        }

        Ok(())
    }

    async fn mutate<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut HashMap<String, StorageData>) -> StorageResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load()?;
        f(&mut records)?;
        self.save(&records)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn insert(&self, app_name: &str, data: StorageData) -> StorageResult<()> {
        self.mutate(|records| {
            if records.contains_key(app_name) {
                return Err(StorageError::AlreadyExists(app_name.to_owned()));
            }
            let _ = records.insert(app_name.to_owned(), data);
            Ok(())
        })
        .await
    }

    async fn get_connection(&self, app_name: &str) -> StorageResult<Option<Connection>> {
        let records = self.load()?;
        Ok(records.get(app_name).and_then(|r| r.connection.clone()))
    }

    async fn set_connection(&self, app_name: &str, connection: &Connection) -> StorageResult<()> {
        self.mutate(|records| {
            records.entry(app_name.to_owned()).or_default().connection =
                Some(connection.clone());
            Ok(())
        })
        .await
    }

    async fn remove(&self, app_name: &str, key: StorageKey) -> StorageResult<()> {
        self.mutate(|records| {
            if let Some(record) = records.get_mut(app_name) {
                record.remove_key(key);
            }
            Ok(())
        })
        .await
    }

    async fn set(&self, app_name: &str, key: StorageKey, value: Value) -> StorageResult<()> {
        self.mutate(|records| {
            records
                .entry(app_name.to_owned())
                .or_default()
                .set_key(key, value)
        })
        .await
    }

    async fn get(&self, app_name: &str, key: StorageKey) -> StorageResult<Option<Value>> {
        let records = self.load()?;
        match records.get(app_name) {
            Some(record) => record.get_key(key),
            None => Ok(None),
        }
    }
}
