// SPDX-License-Identifier: PMPL-1.0-or-later
//! Undo Manager.
//!
//! Undoing an audit entry puts its field back to the value it held before
//! that entry. The revert goes through the reconciler with a manual pin, so
//! it is audited like any other write (`source = undo`,
//! `processedBy = manual`). If the entry created the field, undo removes it.
//!
//! Each entry can be undone once. Entries written by an undo cannot be
//! undone themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use profsync_audit::{AuditAction, AuditDraft, AuditLogEntry, ProcessedBy};
use profsync_conflict::{ManualSelection, PolicyHint};
use profsync_profile::{Actor, FieldValue, ProposedUpdate, Source};
use profsync_storage::{StorageBackend, StorageError, TypedStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::engine::{Engine, OP_UNDO};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub id: String,
    pub entity_id: String,
    /// The audit entry that was undone.
    pub log_id: String,
    /// Value restored; `None` when the field was removed.
    pub previous_state: Option<FieldValue>,
    pub timestamp: DateTime<Utc>,
    pub performed_by: String,
    /// The forward audit entry documenting the revert.
    pub revert_log_id: Option<String>,
}

/// Undo records under `undo:{entity}/{log_id}`.
#[derive(Debug, Clone)]
pub(crate) struct UndoStore {
    store: TypedStore,
}

impl UndoStore {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            store: TypedStore::new(backend, "undo"),
        }
    }

    pub(crate) async fn get(
        &self,
        entity_id: &str,
        log_id: &str,
    ) -> Result<Option<UndoRecord>, StorageError> {
        self.store.get(&format!("{entity_id}/{log_id}")).await
    }

    pub(crate) async fn put(&self, record: &UndoRecord) -> Result<(), StorageError> {
        self.store
            .put(&format!("{}/{}", record.entity_id, record.log_id), record)
            .await
    }

    pub(crate) async fn for_entity(&self, entity_id: &str) -> Result<Vec<UndoRecord>, StorageError> {
        let mut records: Vec<UndoRecord> = self
            .store
            .scan_all::<UndoRecord>(&format!("{entity_id}/"))
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }
}

fn check_undoable(entry: &AuditLogEntry) -> Result<(), EngineError> {
    let refuse = |reason: &str| EngineError::NotUndoable {
        log_id: entry.id.clone(),
        reason: reason.to_string(),
    };
    if entry.content.action == AuditAction::Rejected {
        return Err(refuse("rejected updates changed nothing"));
    }
    if entry.content.source == Source::Undo {
        return Err(refuse("entry is itself an undo"));
    }
    if !entry.changed_field() {
        return Err(refuse("entry carries no field change"));
    }
    Ok(())
}

impl Engine {
    /// Revert the field change recorded by audit entry `log_id`.
    pub async fn undo(
        &self,
        entity_id: &str,
        log_id: &str,
        performed_by: &str,
    ) -> Result<UndoRecord, EngineError> {
        self.envelope
            .track(OP_UNDO, self.undo_inner(entity_id, log_id, performed_by))
            .await
    }

    /// Undo records of an entity, oldest first.
    pub async fn undo_records(&self, entity_id: &str) -> Result<Vec<UndoRecord>, EngineError> {
        Ok(self.undo_store.for_entity(entity_id).await?)
    }

    #[instrument(skip(self))]
    async fn undo_inner(
        &self,
        entity_id: &str,
        log_id: &str,
        performed_by: &str,
    ) -> Result<UndoRecord, EngineError> {
        let _guard = self.locks.acquire(entity_id).await;

        let entry = self.audit.get(entity_id, log_id).await?.ok_or_else(|| {
            EngineError::NotFound(format!("audit entry {log_id} for entity {entity_id}"))
        })?;
        check_undoable(&entry)?;
        if self.undo_store.get(entity_id, log_id).await?.is_some() {
            return Err(EngineError::AlreadyUndone(log_id.to_string()));
        }

        let content = &entry.content;
        let reason = format!("undo of {log_id}");
        let revert_log_id = match &content.previous_value {
            Some(previous) => {
                let update = ProposedUpdate {
                    entity_id: entity_id.to_string(),
                    source: Source::Undo,
                    source_id: log_id.to_string(),
                    domain: content.domain,
                    field: content.field.clone(),
                    value: previous.clone(),
                    confidence: None,
                    reasoning: Some(reason.clone()),
                    actor: Actor::human(performed_by),
                    timestamp: Utc::now(),
                };
                let hint = PolicyHint::manual(ManualSelection {
                    selected_value: previous.clone(),
                    reason,
                    resolved_by: performed_by.to_string(),
                });
                self.apply_locked(&update, &hint).await?.log_id
            }
            None => {
                let current = self
                    .profiles
                    .get_field(entity_id, content.domain, &content.field)
                    .await?;
                let expected_version = current.as_ref().map(|c| c.version);
                self.profiles
                    .remove_field(entity_id, content.domain, &content.field, expected_version)
                    .await?;

                let mut draft = AuditDraft::new(
                    entity_id,
                    Source::Undo,
                    log_id,
                    content.domain,
                    &content.field,
                    AuditAction::Updated,
                    performed_by,
                    ProcessedBy::Manual,
                );
                draft.reasoning = Some(reason);
                draft.previous_value = current.map(|c| c.value);
                let revert = self.audit.append(draft).await?;
                self.refresh_identity(entity_id).await?;
                Some(revert.id)
            }
        };

        let record = UndoRecord {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            log_id: log_id.to_string(),
            previous_state: content.previous_value.clone(),
            timestamp: Utc::now(),
            performed_by: performed_by.to_string(),
            revert_log_id,
        };
        self.undo_store.put(&record).await?;
        info!(entity_id, log_id, performed_by, "audit entry undone");
        Ok(record)
    }
}
