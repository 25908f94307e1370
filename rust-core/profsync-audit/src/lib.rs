// SPDX-License-Identifier: PMPL-1.0-or-later
//! ProfSync audit log
//!
//! Every accepted (or rejected) profile mutation is recorded as an immutable
//! [`AuditLogEntry`]. Entries of one entity form a hash chain: each entry's
//! `parent_hash` is the `content_hash` of its predecessor, and the first
//! entry's parent is the SHA-256 of the empty string. Any edit, deletion or
//! reordering of stored entries is caught by [`AuditLog::verify_chain`].
//!
//! # Layout
//!
//! - `audit:{entity}/{sequence:020}`: the entries, in append order.
//! - `audit-head:{entity}`: sequence and hash of the newest entry.
//! - `audit-id:{id}`: entity and sequence of an entry, for lookup by id.
//!
//! Appends for one entity must not race; the engine holds the entity lock
//! around every append.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use profsync_profile::{Domain, FieldValue, Source};
use profsync_storage::{StorageBackend, StorageError, TypedStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Audit-specific errors
#[derive(Error, Debug)]
pub enum AuditError {
    /// Chain linkage is broken (gap, reorder, wrong parent)
    #[error("Audit chain corrupted for entity {entity}: {reason}")]
    ChainCorrupted { entity: String, reason: String },

    /// An entry's stored content hash does not match its content
    #[error("Hash mismatch at sequence {sequence} for entity {entity}")]
    HashMismatch { entity: String, sequence: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// First accepted value of a field.
    Created,
    /// Accepted value replaced an earlier one (or removed it, on undo).
    Updated,
    /// Proposal matched the current value.
    Validated,
    /// Proposal was dropped.
    Rejected,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Validated => "validated",
            AuditAction::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Which kind of decision produced the recorded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedBy {
    Ai,
    Manual,
}

/// Content of an entry before it is sequenced and hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDraft {
    pub entity_id: String,
    pub source: Source,
    pub source_id: String,
    pub domain: Domain,
    pub field: String,
    pub action: AuditAction,
    pub validation_score: Option<u8>,
    pub reasoning: Option<String>,
    /// Opaque producer-supplied bag.
    #[serde(default)]
    pub extracted_insights: serde_json::Value,
    pub previous_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub conflict_id: Option<String>,
    pub performed_by: String,
    pub processed_by: ProcessedBy,
}

impl AuditDraft {
    /// A draft with no values, score, reasoning or conflict reference.
    pub fn new(
        entity_id: impl Into<String>,
        source: Source,
        source_id: impl Into<String>,
        domain: Domain,
        field: impl Into<String>,
        action: AuditAction,
        performed_by: impl Into<String>,
        processed_by: ProcessedBy,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            source,
            source_id: source_id.into(),
            domain,
            field: field.into(),
            action,
            validation_score: None,
            reasoning: None,
            extracted_insights: serde_json::Value::Null,
            previous_value: None,
            new_value: None,
            conflict_id: None,
            performed_by: performed_by.into(),
            processed_by,
        }
    }
}

/// An immutable, sequenced, hash-chained audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    /// Position in the entity's chain, starting at 1.
    pub sequence: u64,
    #[serde(flatten)]
    pub content: AuditDraft,
    pub timestamp: DateTime<Utc>,
    pub parent_hash: String,
    pub content_hash: String,
}

impl AuditLogEntry {
    /// SHA-256 hex digest over everything except `content_hash`.
    pub fn compute_hash(
        id: &str,
        sequence: u64,
        content: &AuditDraft,
        timestamp: &DateTime<Utc>,
        parent_hash: &str,
    ) -> String {
        let canonical = serde_json::json!({
            "id": id,
            "sequence": sequence,
            "content": content,
            "timestamp": timestamp.to_rfc3339(),
            "parent_hash": parent_hash,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("{:x}", digest)
    }

    /// Whether `content_hash` matches the entry's content.
    pub fn verify(&self) -> bool {
        self.content_hash
            == Self::compute_hash(
                &self.id,
                self.sequence,
                &self.content,
                &self.timestamp,
                &self.parent_hash,
            )
    }

    pub fn entity_id(&self) -> &str {
        &self.content.entity_id
    }

    /// Whether this entry changed a canonical field.
    pub fn changed_field(&self) -> bool {
        matches!(
            self.content.action,
            AuditAction::Created | AuditAction::Updated
        ) && self.content.previous_value != self.content.new_value
    }
}

/// SHA-256 of the empty string; parent of every chain's first entry.
pub fn genesis_hash() -> String {
    format!("{:x}", Sha256::digest(b""))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainHead {
    sequence: u64,
    hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdRef {
    entity_id: String,
    sequence: u64,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: TypedStore,
    heads: TypedStore,
    ids: TypedStore,
}

fn entry_key(entity_id: &str, sequence: u64) -> String {
    format!("{entity_id}/{sequence:020}")
}

impl AuditLog {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            entries: TypedStore::new(Arc::clone(&backend), "audit"),
            heads: TypedStore::new(Arc::clone(&backend), "audit-head"),
            ids: TypedStore::new(backend, "audit-id"),
        }
    }

    /// Sequence, hash and persist a new entry at the end of its entity's
    /// chain.
    #[instrument(skip(self, draft), fields(entity_id = %draft.entity_id, action = %draft.action))]
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditLogEntry, AuditError> {
        let head = self.heads.get::<ChainHead>(&draft.entity_id).await?;
        let (sequence, parent_hash) = match head {
            Some(h) => (h.sequence + 1, h.hash),
            None => (1, genesis_hash()),
        };

        let id = Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let content_hash =
            AuditLogEntry::compute_hash(&id, sequence, &draft, &timestamp, &parent_hash);
        let entry = AuditLogEntry {
            id,
            sequence,
            content: draft,
            timestamp,
            parent_hash,
            content_hash,
        };

        let entity_id = entry.content.entity_id.clone();
        self.entries
            .put(&entry_key(&entity_id, sequence), &entry)
            .await?;
        self.ids
            .put(
                &entry.id,
                &IdRef {
                    entity_id: entity_id.clone(),
                    sequence,
                },
            )
            .await?;
        self.heads
            .put(
                &entity_id,
                &ChainHead {
                    sequence,
                    hash: entry.content_hash.clone(),
                },
            )
            .await?;

        debug!(sequence, entry_id = %entry.id, "audit entry appended");
        Ok(entry)
    }

    /// Entry `id`, provided it belongs to `entity_id`.
    pub async fn get(
        &self,
        entity_id: &str,
        id: &str,
    ) -> Result<Option<AuditLogEntry>, AuditError> {
        let Some(reference) = self.ids.get::<IdRef>(id).await? else {
            return Ok(None);
        };
        if reference.entity_id != entity_id {
            return Ok(None);
        }
        Ok(self
            .entries
            .get(&entry_key(entity_id, reference.sequence))
            .await?)
    }

    /// All entries of an entity, oldest first.
    pub async fn entries(&self, entity_id: &str) -> Result<Vec<AuditLogEntry>, AuditError> {
        let rows = self
            .entries
            .scan_all::<AuditLogEntry>(&format!("{entity_id}/"))
            .await?;
        Ok(rows.into_iter().map(|(_, e)| e).collect())
    }

    /// The `limit` most recent entries of an entity, newest first. Reads
    /// back from the chain head by sequence.
    pub async fn history(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, AuditError> {
        let head = self.len(entity_id).await?;
        let oldest = head.saturating_sub(limit as u64) + 1;
        let mut recent = Vec::with_capacity((head + 1 - oldest) as usize);
        for sequence in (oldest..=head).rev() {
            if let Some(entry) = self
                .entries
                .get::<AuditLogEntry>(&entry_key(entity_id, sequence))
                .await?
            {
                recent.push(entry);
            }
        }
        Ok(recent)
    }

    /// Number of entries recorded for an entity.
    pub async fn len(&self, entity_id: &str) -> Result<u64, AuditError> {
        Ok(self
            .heads
            .get::<ChainHead>(entity_id)
            .await?
            .map(|h| h.sequence)
            .unwrap_or(0))
    }

    /// Walk an entity's chain and check every link and hash. Returns the
    /// number of entries verified.
    #[instrument(skip(self))]
    pub async fn verify_chain(&self, entity_id: &str) -> Result<u64, AuditError> {
        let entries = self.entries(entity_id).await?;
        let mut expected_parent = genesis_hash();

        for (index, entry) in entries.iter().enumerate() {
            let expected_sequence = index as u64 + 1;
            if entry.sequence != expected_sequence {
                warn!(expected_sequence, found = entry.sequence, "audit sequence gap");
                return Err(AuditError::ChainCorrupted {
                    entity: entity_id.to_string(),
                    reason: format!(
                        "expected sequence {expected_sequence}, found {}",
                        entry.sequence
                    ),
                });
            }
            if entry.entity_id() != entity_id {
                return Err(AuditError::ChainCorrupted {
                    entity: entity_id.to_string(),
                    reason: format!(
                        "entry {} belongs to entity {}",
                        entry.sequence,
                        entry.entity_id()
                    ),
                });
            }
            if entry.parent_hash != expected_parent {
                return Err(AuditError::ChainCorrupted {
                    entity: entity_id.to_string(),
                    reason: format!("parent hash mismatch at sequence {}", entry.sequence),
                });
            }
            if !entry.verify() {
                warn!(sequence = entry.sequence, "audit entry hash mismatch");
                return Err(AuditError::HashMismatch {
                    entity: entity_id.to_string(),
                    sequence: entry.sequence,
                });
            }
            expected_parent = entry.content_hash.clone();
        }

        let head = self.len(entity_id).await?;
        if head != entries.len() as u64 {
            return Err(AuditError::ChainCorrupted {
                entity: entity_id.to_string(),
                reason: format!("head records {head} entries, found {}", entries.len()),
            });
        }
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profsync_storage::InMemoryBackend;

    fn draft(entity: &str, value: f64) -> AuditDraft {
        let mut d = AuditDraft::new(
            entity,
            Source::ExamImport,
            "exam-1",
            Domain::Academic,
            "examAverage",
            AuditAction::Updated,
            "ai:extractor",
            ProcessedBy::Ai,
        );
        d.new_value = Some(FieldValue::Number(value));
        d
    }

    fn setup() -> (AuditLog, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        (AuditLog::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_history_reads_only_the_tail() {
        let (log, backend) = setup();
        for value in 1..=5 {
            log.append(draft("S1", f64::from(value))).await.unwrap();
        }
        // An unreadable old entry must not matter to a short history.
        backend
            .put(b"audit:S1/00000000000000000001", b"not json")
            .await
            .unwrap();

        let recent = log.history("S1", 2).await.unwrap();
        let sequences: Vec<u64> = recent.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![5, 4]);
        assert_eq!(recent[0].content.new_value, Some(FieldValue::Number(5.0)));

        assert!(log.history("S1", 0).await.unwrap().is_empty());
        assert!(log.history("S2", 10).await.unwrap().is_empty());
        assert!(log.entries("S1").await.is_err());
        assert!(log.history("S1", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let (log, _) = setup();
        let first = log.append(draft("S1", 10.0)).await.unwrap();
        let second = log.append(draft("S1", 20.0)).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(first.parent_hash, genesis_hash());
        assert_eq!(second.sequence, 2);
        assert_eq!(second.parent_hash, first.content_hash);
        assert!(first.verify() && second.verify());
        assert_eq!(log.verify_chain("S1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let (log, _) = setup();
        for v in 0..5 {
            log.append(draft("S1", v as f64)).await.unwrap();
        }
        log.append(draft("S2", 99.0)).await.unwrap();

        let recent = log.history("S1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence, 5);
        assert_eq!(recent[1].sequence, 4);
        assert_eq!(log.len("S2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_checks_entity() {
        let (log, _) = setup();
        let entry = log.append(draft("S1", 1.0)).await.unwrap();
        assert_eq!(log.get("S1", &entry.id).await.unwrap(), Some(entry.clone()));
        assert_eq!(log.get("S2", &entry.id).await.unwrap(), None);
        assert_eq!(log.get("S1", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tampering_is_detected() {
        let (log, backend) = setup();
        log.append(draft("S1", 1.0)).await.unwrap();
        let mut second = log.append(draft("S1", 2.0)).await.unwrap();
        log.append(draft("S1", 3.0)).await.unwrap();

        second.content.new_value = Some(FieldValue::Number(200.0));
        let raw = serde_json::to_vec(&second).unwrap();
        backend
            .put(entry_key("audit:S1", 2).as_bytes(), &raw)
            .await
            .unwrap();

        let err = log.verify_chain("S1").await.unwrap_err();
        assert!(matches!(err, AuditError::HashMismatch { sequence: 2, .. }));
    }

    #[tokio::test]
    async fn test_deleted_entry_is_detected() {
        let (log, backend) = setup();
        for v in 0..3 {
            log.append(draft("S1", v as f64)).await.unwrap();
        }
        backend
            .delete(entry_key("audit:S1", 2).as_bytes())
            .await
            .unwrap();
        assert!(matches!(
            log.verify_chain("S1").await,
            Err(AuditError::ChainCorrupted { .. })
        ));
    }

    #[test]
    fn test_changed_field() {
        let mut d = draft("S1", 1.0);
        d.previous_value = Some(FieldValue::Number(1.0));
        let entry = AuditLogEntry {
            id: "x".into(),
            sequence: 1,
            content: d,
            timestamp: Utc::now(),
            parent_hash: genesis_hash(),
            content_hash: String::new(),
        };
        assert!(!entry.changed_field());
    }
}
