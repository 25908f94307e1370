// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Canonical profile store.
//
// One record per `(entity, domain, field)` under the key
// `profile:{entity}/{domain}/{field}`. The backend offers only plain reads
// and writes, so `write_field` re-reads the stored version and refuses if it
// moved since the caller read it. Callers hold the entity's lock; the check
// only fires if that discipline is broken.

use std::sync::Arc;

use profsync_storage::{StorageBackend, TypedStore};
use tracing::{debug, instrument, warn};

use crate::error::ProfileError;
use crate::model::{CanonicalProfileField, Domain};

const NAMESPACE: &str = "profile";

#[derive(Debug, Clone)]
pub struct ProfileStore {
    store: TypedStore,
}

fn field_key(entity_id: &str, domain: Domain, field: &str) -> String {
    format!("{entity_id}/{domain}/{field}")
}

impl ProfileStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            store: TypedStore::new(backend, NAMESPACE),
        }
    }

    /// Current value of one field.
    pub async fn get_field(
        &self,
        entity_id: &str,
        domain: Domain,
        field: &str,
    ) -> Result<Option<CanonicalProfileField>, ProfileError> {
        Ok(self.store.get(&field_key(entity_id, domain, field)).await?)
    }

    /// Write `record`, provided the stored version still equals
    /// `expected_version` (`None` meaning "field absent"). Returns the stored
    /// record with its new version.
    #[instrument(skip(self, record), fields(entity_id = %record.entity_id, domain = %record.domain, field = %record.field))]
    pub async fn write_field(
        &self,
        mut record: CanonicalProfileField,
        expected_version: Option<u64>,
    ) -> Result<CanonicalProfileField, ProfileError> {
        let key = field_key(&record.entity_id, record.domain, &record.field);
        let found = self
            .store
            .get::<CanonicalProfileField>(&key)
            .await?
            .map(|f| f.version);

        if found != expected_version {
            warn!(?expected_version, ?found, "field version moved");
            return Err(ProfileError::ConcurrencyViolation {
                entity_id: record.entity_id,
                domain: record.domain,
                field: record.field,
                expected: expected_version,
                found,
            });
        }

        record.version = found.unwrap_or(0) + 1;
        self.store.put(&key, &record).await?;
        debug!(version = record.version, "field written");
        Ok(record)
    }

    /// Remove one field, with the same version check as `write_field`.
    /// Returns whether a field was removed.
    #[instrument(skip(self))]
    pub async fn remove_field(
        &self,
        entity_id: &str,
        domain: Domain,
        field: &str,
        expected_version: Option<u64>,
    ) -> Result<bool, ProfileError> {
        let key = field_key(entity_id, domain, field);
        let found = self
            .store
            .get::<CanonicalProfileField>(&key)
            .await?
            .map(|f| f.version);

        if found != expected_version {
            return Err(ProfileError::ConcurrencyViolation {
                entity_id: entity_id.to_string(),
                domain,
                field: field.to_string(),
                expected: expected_version,
                found,
            });
        }
        Ok(self.store.delete(&key).await?)
    }

    /// Every stored field of an entity, ordered by domain then field.
    pub async fn entity_fields(
        &self,
        entity_id: &str,
    ) -> Result<Vec<CanonicalProfileField>, ProfileError> {
        let rows = self
            .store
            .scan_all::<CanonicalProfileField>(&format!("{entity_id}/"))
            .await?;
        Ok(rows.into_iter().map(|(_, f)| f).collect())
    }

    /// Stored fields of one domain.
    pub async fn domain_fields(
        &self,
        entity_id: &str,
        domain: Domain,
    ) -> Result<Vec<CanonicalProfileField>, ProfileError> {
        let rows = self
            .store
            .scan_all::<CanonicalProfileField>(&format!("{entity_id}/{domain}/"))
            .await?;
        Ok(rows.into_iter().map(|(_, f)| f).collect())
    }

    /// Distinct entity ids with at least one stored field.
    pub async fn entities(&self) -> Result<Vec<String>, ProfileError> {
        let rows = self.store.scan_all::<CanonicalProfileField>("").await?;
        let mut ids: Vec<String> = rows.into_iter().map(|(_, f)| f.entity_id).collect();
        ids.dedup();
        Ok(ids)
    }

    /// Remove all fields of an entity. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn delete_entity(&self, entity_id: &str) -> Result<usize, ProfileError> {
        let keys: Vec<String> = self
            .store
            .scan_all::<CanonicalProfileField>(&format!("{entity_id}/"))
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        debug!(removed, "entity fields deleted");
        Ok(removed)
    }
}
