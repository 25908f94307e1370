// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// In-memory storage backend.
//
// A `BTreeMap` behind a tokio `RwLock`. Key ordering gives cheap prefix scans,
// which is how every store lists the records of one entity.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// An ordered in-process backend. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.data.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.data.read().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().await);
        assert_eq!(backend.get(b"profile:s1").await.unwrap(), None);

        backend.put(b"profile:s1", b"v1").await.unwrap();
        backend.put(b"profile:s1", b"v2").await.unwrap();
        assert_eq!(backend.get(b"profile:s1").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(backend.len().await, 1);

        assert!(backend.delete(b"profile:s1").await.unwrap());
        assert!(!backend.delete(b"profile:s1").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered_and_bounded() {
        let backend = InMemoryBackend::new();
        backend.put(b"audit:s1/0002", b"b").await.unwrap();
        backend.put(b"audit:s1/0001", b"a").await.unwrap();
        backend.put(b"audit:s10/0001", b"x").await.unwrap();
        backend.put(b"audit:s2/0001", b"c").await.unwrap();

        let rows = backend.scan_prefix(b"audit:s1/", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"audit:s1/0001".to_vec());
        assert_eq!(rows[1].0, b"audit:s1/0002".to_vec());

        let limited = backend.scan_prefix(b"audit:", 3).await.unwrap();
        assert_eq!(limited.len(), 3);

        assert!(backend.scan_prefix(b"ledger:", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();
        backend.put(b"k", b"v").await.unwrap();
        assert_eq!(clone.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(clone.name(), "in-memory");
        clone.flush().await.unwrap();
    }
}
