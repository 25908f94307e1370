// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// redb-backed persistent storage.
//
// One database file, one table. Every put/delete is its own committed write
// transaction, so a crash between the engine's field write and its audit
// append leaves the field durable and the audit entry missing, never the
// reverse. Blocking redb calls run on the tokio blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, TableDefinition, TableError};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::StorageError;

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("profsync");

/// A single-file persistent backend.
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "failed to open redb at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "opened redb backend");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::BackendUnavailable(format!("task join: {e}")))?
    }
}

fn open_table_error(err: TableError) -> StorageError {
    StorageError::CorruptedData(format!("open table: {err}"))
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").field("path", &self.path).finish()
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db
                .begin_read()
                .map_err(|e| StorageError::BackendUnavailable(format!("read txn: {e}")))?;
            let table = match txn.open_table(RECORDS) {
                Ok(t) => t,
                // Nothing written yet.
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(open_table_error(e)),
            };
            match table.get(key.as_slice()) {
                Ok(found) => Ok(found.map(|v| v.value().to_vec())),
                Err(e) => Err(StorageError::CorruptedData(format!("get: {e}"))),
            }
        })
        .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.blocking(move |db| {
            let txn = db
                .begin_write()
                .map_err(|e| StorageError::BackendUnavailable(format!("write txn: {e}")))?;
            {
                let mut table = txn
                    .open_table(RECORDS)
                    .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(|e| StorageError::CorruptedData(format!("insert: {e}")))?;
            }
            txn.commit()
                .map_err(|e| StorageError::CorruptedData(format!("commit: {e}")))
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db
                .begin_write()
                .map_err(|e| StorageError::BackendUnavailable(format!("write txn: {e}")))?;
            let existed = {
                let mut table = txn
                    .open_table(RECORDS)
                    .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
                let removed = table
                    .remove(key.as_slice())
                    .map_err(|e| StorageError::CorruptedData(format!("remove: {e}")))?;
                removed.is_some()
            };
            txn.commit()
                .map_err(|e| StorageError::CorruptedData(format!("commit: {e}")))?;
            Ok(existed)
        })
        .await
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let txn = db
                .begin_read()
                .map_err(|e| StorageError::BackendUnavailable(format!("read txn: {e}")))?;
            let table = match txn.open_table(RECORDS) {
                Ok(t) => t,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(open_table_error(e)),
            };

            let mut rows = Vec::new();
            let iter = table
                .range(prefix.as_slice()..)
                .map_err(|e| StorageError::CorruptedData(format!("range scan: {e}")))?;
            for entry in iter {
                if rows.len() >= limit {
                    break;
                }
                let entry =
                    entry.map_err(|e| StorageError::CorruptedData(format!("scan entry: {e}")))?;
                let k = entry.0.value().to_vec();
                if !k.starts_with(&prefix) {
                    break;
                }
                rows.push((k, entry.1.value().to_vec()));
            }
            Ok(rows)
        })
        .await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        // Each write transaction is durable on commit.
        Ok(())
    }

    fn name(&self) -> &str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_backend() -> (RedbBackend, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("profsync.redb")).unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn test_crud_on_empty_database() {
        let (backend, _dir) = temp_backend();
        assert_eq!(backend.get(b"profile:s1").await.unwrap(), None);
        assert!(backend.scan_prefix(b"profile:", 10).await.unwrap().is_empty());

        backend.put(b"profile:s1", b"one").await.unwrap();
        backend.put(b"profile:s1", b"two").await.unwrap();
        assert_eq!(backend.get(b"profile:s1").await.unwrap(), Some(b"two".to_vec()));

        assert!(backend.delete(b"profile:s1").await.unwrap());
        assert!(!backend.delete(b"profile:s1").await.unwrap());
        assert_eq!(backend.name(), "redb");
    }

    #[tokio::test]
    async fn test_prefix_scan_stops_at_boundary() {
        let (backend, _dir) = temp_backend();
        backend.put(b"audit:s1/01", b"a").await.unwrap();
        backend.put(b"audit:s1/02", b"b").await.unwrap();
        backend.put(b"audit:s2/01", b"c").await.unwrap();

        let rows = backend.scan_prefix(b"audit:s1/", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0, b"audit:s1/02".to_vec());
        assert_eq!(backend.scan_prefix(b"audit:", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_table_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.redb");
        {
            let db = Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let foreign: TableDefinition<&str, u64> = TableDefinition::new("profsync");
                let mut table = txn.open_table(foreign).unwrap();
                table.insert("profile:s1", 1u64).unwrap();
            }
            txn.commit().unwrap();
        }

        let backend = RedbBackend::open(&path).unwrap();
        assert!(matches!(
            backend.get(b"profile:s1").await,
            Err(StorageError::CorruptedData(_))
        ));
        assert!(backend.scan_prefix(b"profile:", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put(b"ledger:c1", b"pending").await.unwrap();
            backend.flush().await.unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.get(b"ledger:c1").await.unwrap(), Some(b"pending".to_vec()));
        assert_eq!(backend.path(), path.as_path());
    }
}
