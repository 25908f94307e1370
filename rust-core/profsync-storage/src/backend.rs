// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Core key-value trait shared by every ProfSync store.

use async_trait::async_trait;

use crate::error::StorageError;

/// A pluggable key-value storage backend.
///
/// Keys and values are opaque bytes; [`crate::typed::TypedStore`] layers
/// JSON encoding and namespacing on top. Only plain reads and blind writes
/// are offered. Callers that need read-modify-write atomicity must serialise
/// access themselves.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value stored under `key`, or `Ok(None)` if absent.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Return up to `limit` `(key, value)` pairs whose key starts with
    /// `prefix`, in ascending key order.
    async fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Make previously written data durable. No-op for memory backends.
    async fn flush(&self) -> Result<(), StorageError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
