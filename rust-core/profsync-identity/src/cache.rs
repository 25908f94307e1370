// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Persisted identity cache: one `UnifiedIdentity` per entity under
// `identity:{entity}`.

use std::sync::Arc;

use profsync_storage::{StorageBackend, StorageError, TypedStore};
use tracing::debug;

use crate::aggregate::UnifiedIdentity;

#[derive(Debug, Clone)]
pub struct IdentityCache {
    store: TypedStore,
}

impl IdentityCache {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            store: TypedStore::new(backend, "identity"),
        }
    }

    pub async fn get(&self, entity_id: &str) -> Result<Option<UnifiedIdentity>, StorageError> {
        self.store.get(entity_id).await
    }

    pub async fn put(&self, identity: &UnifiedIdentity) -> Result<(), StorageError> {
        self.store.put(&identity.entity_id, identity).await?;
        debug!(entity_id = %identity.entity_id, priority = %identity.intervention_priority, "identity cached");
        Ok(())
    }

    pub async fn invalidate(&self, entity_id: &str) -> Result<bool, StorageError> {
        self.store.delete(entity_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, IdentityConfig};
    use chrono::Utc;
    use profsync_storage::InMemoryBackend;

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = IdentityCache::new(Arc::new(InMemoryBackend::new()));
        let identity = aggregate("S1", &[], &[], 0, &IdentityConfig::default(), Utc::now());

        cache.put(&identity).await.unwrap();
        assert_eq!(cache.get("S1").await.unwrap(), Some(identity));
        assert!(cache.invalidate("S1").await.unwrap());
        assert_eq!(cache.get("S1").await.unwrap(), None);
    }
}
