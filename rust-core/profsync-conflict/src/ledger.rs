// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Conflict ledger.
//!
//! Stores every detected conflict under `conflict:{entity}/{id}` with an id
//! index at `conflict-id:{id}`. A record is created `pending` and is updated
//! exactly once, when it reaches a terminal [`ResolutionMethod`]. Resolving a
//! terminal record fails with [`ConflictError::AlreadyResolved`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use profsync_profile::{Actor, Domain, FieldValue, ProposedUpdate, Source};
use profsync_storage::{StorageBackend, StorageError, TypedStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::detector::Severity;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConflictError {
    #[error("conflict not found: {0}")]
    NotFound(String),

    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// A resolution was attempted with a non-terminal method.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// ResolutionMethod
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Pending,
    AiAuto,
    TimeBased,
    ConfidenceBased,
    Manual,
    ManualBulk,
}

impl ResolutionMethod {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolutionMethod::Pending)
    }

    /// Whether a human chose the value.
    pub fn is_manual(&self) -> bool {
        matches!(self, ResolutionMethod::Manual | ResolutionMethod::ManualBulk)
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionMethod::Pending => "pending",
            ResolutionMethod::AiAuto => "ai_auto",
            ResolutionMethod::TimeBased => "time_based",
            ResolutionMethod::ConfidenceBased => "confidence_based",
            ResolutionMethod::Manual => "manual",
            ResolutionMethod::ManualBulk => "manual_bulk",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ConflictRecord
// ---------------------------------------------------------------------------

/// A contradiction between the canonical value and a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: String,
    pub entity_id: String,
    /// The field name.
    pub conflict_type: String,
    pub domain: Domain,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub resolved_value: Option<FieldValue>,
    pub resolution_method: ResolutionMethod,
    pub severity: Severity,
    pub reasoning: Option<String>,
    pub resolved_by: Option<String>,
    /// Detection time.
    pub timestamp: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,

    // Both sides' provenance, for the policy engine and for writing the
    // value after a deferred resolution.
    pub old_confidence: Option<u8>,
    pub new_confidence: Option<u8>,
    pub old_timestamp: DateTime<Utc>,
    pub new_timestamp: DateTime<Utc>,
    pub old_actor: Actor,
    pub proposed_by: Actor,
    pub source: Source,
    pub source_id: String,
    /// Canonical field version the conflict was detected against.
    pub base_version: u64,
}

impl ConflictRecord {
    /// A pending record for `proposal` against the current value.
    pub fn pending(
        current: &profsync_profile::CanonicalProfileField,
        proposal: &ProposedUpdate,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: proposal.entity_id.clone(),
            conflict_type: proposal.field.clone(),
            domain: proposal.domain,
            old_value: current.value.clone(),
            new_value: proposal.value.clone(),
            resolved_value: None,
            resolution_method: ResolutionMethod::Pending,
            severity,
            reasoning: proposal.reasoning.clone(),
            resolved_by: None,
            timestamp: Utc::now(),
            resolved_at: None,
            old_confidence: current.confidence,
            new_confidence: proposal.confidence,
            old_timestamp: current.updated_at,
            new_timestamp: proposal.timestamp,
            old_actor: current.actor.clone(),
            proposed_by: proposal.actor.clone(),
            source: proposal.source,
            source_id: proposal.source_id.clone(),
            base_version: current.version,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.resolution_method == ResolutionMethod::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdRef {
    entity_id: String,
}

// ---------------------------------------------------------------------------
// ConflictLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConflictLedger {
    records: TypedStore,
    ids: TypedStore,
    /// Pending `high` records, keyed like `records`.
    open_high: TypedStore,
}

fn record_key(entity_id: &str, id: &str) -> String {
    format!("{entity_id}/{id}")
}

impl ConflictLedger {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            records: TypedStore::new(Arc::clone(&backend), "conflict"),
            ids: TypedStore::new(Arc::clone(&backend), "conflict-id"),
            open_high: TypedStore::new(backend, "conflict-high"),
        }
    }

    /// Persist a new record.
    #[instrument(skip(self, record), fields(conflict_id = %record.id, entity_id = %record.entity_id, severity = %record.severity))]
    pub async fn insert(&self, record: &ConflictRecord) -> Result<(), ConflictError> {
        self.records
            .put(&record_key(&record.entity_id, &record.id), record)
            .await?;
        self.ids
            .put(
                &record.id,
                &IdRef {
                    entity_id: record.entity_id.clone(),
                },
            )
            .await?;
        if record.is_pending() && record.severity == Severity::High {
            self.open_high
                .put(&record_key(&record.entity_id, &record.id), &true)
                .await?;
        }
        debug!("conflict recorded");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConflictRecord>, ConflictError> {
        let Some(reference) = self.ids.get::<IdRef>(id).await? else {
            return Ok(None);
        };
        Ok(self
            .records
            .get(&record_key(&reference.entity_id, id))
            .await?)
    }

    /// Move a pending record to a terminal method.
    #[instrument(skip(self, value, reasoning))]
    pub async fn resolve(
        &self,
        id: &str,
        value: FieldValue,
        method: ResolutionMethod,
        reasoning: Option<String>,
        resolved_by: &str,
    ) -> Result<ConflictRecord, ConflictError> {
        if !method.is_terminal() {
            return Err(ConflictError::InvalidResolution(format!(
                "{method} is not a terminal method"
            )));
        }
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| ConflictError::NotFound(id.to_string()))?;
        if !record.is_pending() {
            return Err(ConflictError::AlreadyResolved(id.to_string()));
        }

        record.resolved_value = Some(value);
        record.resolution_method = method;
        if reasoning.is_some() {
            record.reasoning = reasoning;
        }
        record.resolved_by = Some(resolved_by.to_string());
        record.resolved_at = Some(Utc::now());

        let key = record_key(&record.entity_id, &record.id);
        self.records.put(&key, &record).await?;
        if record.severity == Severity::High {
            self.open_high.delete(&key).await?;
        }
        info!(
            conflict_id = %record.id,
            entity_id = %record.entity_id,
            method = %method,
            "conflict resolved"
        );
        Ok(record)
    }

    /// All records of one entity, in key order.
    pub async fn for_entity(&self, entity_id: &str) -> Result<Vec<ConflictRecord>, ConflictError> {
        let rows = self
            .records
            .scan_all::<ConflictRecord>(&format!("{entity_id}/"))
            .await?;
        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    /// Pending records, optionally for one entity, ordered by severity
    /// (high first) and then by recency (newest first).
    pub async fn pending(&self, entity_id: Option<&str>) -> Result<Vec<ConflictRecord>, ConflictError> {
        let prefix = entity_id.map(|e| format!("{e}/")).unwrap_or_default();
        let mut pending: Vec<ConflictRecord> = self
            .records
            .scan_all::<ConflictRecord>(&prefix)
            .await?
            .into_iter()
            .map(|(_, r)| r)
            .filter(ConflictRecord::is_pending)
            .collect();
        pending.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        Ok(pending)
    }

    /// Number of pending `high` conflicts of an entity. Served from the
    /// open-high index; resolved records are never read.
    pub async fn unresolved_high(&self, entity_id: &str) -> Result<usize, ConflictError> {
        Ok(self
            .open_high
            .scan_all::<bool>(&format!("{entity_id}/"))
            .await?
            .len())
    }
}
