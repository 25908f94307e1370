// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Typed, namespaced view over a shared backend.
//
// Each ProfSync store (profile, audit, ledger, undo) owns one `TypedStore`
// with its own namespace; all of them usually share a single backend.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// JSON-encoded records stored under `"{namespace}:{key}"`.
#[derive(Clone)]
pub struct TypedStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl TypedStore {
    /// Create a typed view over `backend` using `namespace` as key prefix.
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    /// The namespace prefix used by this view.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn full_key(&self, key: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, key).into_bytes()
    }

    /// Fetch and decode the record under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.full_key(key)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                StorageError::SerializationError(format!(
                    "failed to decode '{}:{}': {}",
                    self.namespace, key, err
                ))
            }),
            None => Ok(None),
        }
    }

    /// Encode and store `value` under `key`.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|err| {
            StorageError::SerializationError(format!(
                "failed to encode '{}:{}': {}",
                self.namespace, key, err
            ))
        })?;
        self.backend.put(&self.full_key(key), &bytes).await
    }

    /// Remove the record under `key`.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.full_key(key)).await
    }

    /// Decode up to `limit` records whose logical key starts with
    /// `key_prefix`. Returned keys have the namespace stripped.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
        limit: usize,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let ns_len = self.namespace.len() + 1;
        let rows = self
            .backend
            .scan_prefix(&self.full_key(key_prefix), limit)
            .await?;

        rows.into_iter()
            .map(|(raw_key, raw_value)| {
                let key = String::from_utf8_lossy(&raw_key[ns_len.min(raw_key.len())..]).to_string();
                let value = serde_json::from_slice(&raw_value).map_err(|err| {
                    StorageError::SerializationError(format!(
                        "failed to decode scanned '{}:{}': {}",
                        self.namespace, key, err
                    ))
                })?;
                Ok((key, value))
            })
            .collect()
    }

    /// Decode every record whose logical key starts with `key_prefix`.
    pub async fn scan_all<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
    ) -> Result<Vec<(String, T)>, StorageError> {
        self.scan_prefix(key_prefix, usize::MAX).await
    }
}

impl std::fmt::Debug for TypedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedStore")
            .field("namespace", &self.namespace)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Row {
        field: String,
        score: f64,
    }

    fn shared() -> Arc<dyn StorageBackend> {
        Arc::new(InMemoryBackend::new())
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let store = TypedStore::new(shared(), "profile");
        let row = Row { field: "examAverage".into(), score: 71.5 };

        store.put("s1/academic/examAverage", &row).await.unwrap();
        let back: Row = store.get("s1/academic/examAverage").await.unwrap().unwrap();
        assert_eq!(back, row);

        assert!(store.get::<Row>("s1/academic/missing").await.unwrap().is_none());
        assert!(store.delete("s1/academic/examAverage").await.unwrap());
        assert!(store.get::<Row>("s1/academic/examAverage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_share_backend_without_collisions() {
        let backend = shared();
        let profile = TypedStore::new(backend.clone(), "profile");
        let ledger = TypedStore::new(backend.clone(), "ledger");

        profile.put("s1", &1u32).await.unwrap();
        ledger.put("s1", &2u32).await.unwrap();

        assert_eq!(profile.get::<u32>("s1").await.unwrap(), Some(1));
        assert_eq!(ledger.get::<u32>("s1").await.unwrap(), Some(2));
        assert_eq!(profile.namespace(), "profile");
        assert_eq!(ledger.backend().name(), "in-memory");
    }

    #[tokio::test]
    async fn test_scan_strips_namespace() {
        let store = TypedStore::new(shared(), "audit");
        store.put("s1/00000000000000000002", &"b").await.unwrap();
        store.put("s1/00000000000000000001", &"a").await.unwrap();
        store.put("s2/00000000000000000001", &"c").await.unwrap();

        let rows: Vec<(String, String)> = store.scan_all("s1/").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "s1/00000000000000000001");
        assert_eq!(rows[0].1, "a");

        let limited: Vec<(String, String)> = store.scan_prefix("", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_error_is_reported() {
        let backend = shared();
        backend.put(b"profile:broken", b"{not json").await.unwrap();
        let store = TypedStore::new(backend, "profile");

        match store.get::<Row>("broken").await {
            Err(StorageError::SerializationError(msg)) => assert!(msg.contains("profile:broken")),
            other => panic!("expected SerializationError, got {:?}", other),
        }
    }
}
