// SPDX-License-Identifier: PMPL-1.0-or-later
//! Human resolution of conflicts, singly or in bulk, and manual corrections
//! submitted directly as updates.

use chrono::Utc;
use profsync_audit::{AuditAction, AuditDraft, ProcessedBy};
use profsync_conflict::{ConflictRecord, ManualSelection, PolicyHint, ResolutionMethod};
use profsync_profile::schema;
use profsync_profile::{Actor, CanonicalProfileField, FieldValue, ProposedUpdate, Source};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::engine::{Engine, OP_BULK_RESOLUTION, OP_MANUAL_CORRECTION, OP_MANUAL_RESOLUTION};
use crate::error::EngineError;
use crate::reconciler::ApplyOutcome;

/// One item of a bulk resolution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResolution {
    pub conflict_id: String,
    pub selected_value: FieldValue,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub conflict_id: String,
    pub resolved: bool,
    pub error: Option<String>,
}

/// Per-item outcome of a bulk resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub resolved: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl Engine {
    /// Apply a human-authored value. It wins any conflict it meets and is
    /// recorded as `manual`.
    #[instrument(skip(self, update, reason), fields(entity_id = %update.entity_id, field = %update.field))]
    pub async fn submit_manual_correction(
        &self,
        update: ProposedUpdate,
        reason: &str,
        resolved_by: &str,
    ) -> Result<ApplyOutcome, EngineError> {
        Self::precheck(&update)?;
        let hint = PolicyHint::manual(ManualSelection {
            selected_value: update.value.clone(),
            reason: reason.to_string(),
            resolved_by: resolved_by.to_string(),
        });
        self.envelope
            .track(OP_MANUAL_CORRECTION, self.apply_with_hint(update, hint))
            .await
    }

    /// Resolve a pending conflict with a human-selected value.
    pub async fn resolve_conflict_manually(
        &self,
        conflict_id: &str,
        selected_value: FieldValue,
        reason: &str,
        resolved_by: &str,
    ) -> Result<ConflictRecord, EngineError> {
        self.envelope
            .track(
                OP_MANUAL_RESOLUTION,
                self.resolve_pending(
                    conflict_id,
                    selected_value,
                    reason,
                    resolved_by,
                    ResolutionMethod::Manual,
                ),
            )
            .await
    }

    /// Resolve several pending conflicts. Items are independent: one
    /// failing does not stop the rest.
    pub async fn bulk_resolve_conflicts(
        &self,
        items: Vec<BulkResolution>,
        resolved_by: &str,
    ) -> BulkSummary {
        let run = async {
            let mut summary = BulkSummary::default();
            for item in items {
                let result = self
                    .resolve_pending(
                        &item.conflict_id,
                        item.selected_value,
                        &item.reason,
                        resolved_by,
                        ResolutionMethod::ManualBulk,
                    )
                    .await;
                match result {
                    Ok(_) => {
                        summary.resolved += 1;
                        summary.results.push(BulkItemResult {
                            conflict_id: item.conflict_id,
                            resolved: true,
                            error: None,
                        });
                    }
                    Err(err) => {
                        warn!(conflict_id = %item.conflict_id, error = %err, "bulk item failed");
                        summary.failed += 1;
                        summary.results.push(BulkItemResult {
                            conflict_id: item.conflict_id,
                            resolved: false,
                            error: Some(err.to_string()),
                        });
                    }
                }
            }
            Ok::<_, EngineError>(summary)
        };
        self.envelope
            .track(OP_BULK_RESOLUTION, run)
            .await
            .unwrap_or_default()
    }

    #[instrument(skip(self, selected_value, reason))]
    async fn resolve_pending(
        &self,
        conflict_id: &str,
        selected_value: FieldValue,
        reason: &str,
        resolved_by: &str,
        method: ResolutionMethod,
    ) -> Result<ConflictRecord, EngineError> {
        let record = self
            .ledger
            .get(conflict_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("conflict {conflict_id}")))?;

        let _guard = self.locks.acquire(&record.entity_id).await;
        // Re-read under the lock.
        let record = self
            .ledger
            .get(conflict_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("conflict {conflict_id}")))?;
        if !record.is_pending() {
            return Err(EngineError::AlreadyResolved(conflict_id.to_string()));
        }

        let spec = schema::lookup(record.domain, &record.conflict_type).ok_or_else(|| {
            EngineError::UnknownMapping {
                domain: record.domain,
                field: record.conflict_type.clone(),
            }
        })?;
        spec.check(&selected_value).map_err(|reason| {
            EngineError::Validation(format!(
                "{}.{}: {}",
                record.domain, record.conflict_type, reason
            ))
        })?;

        let current = self
            .profiles
            .get_field(&record.entity_id, record.domain, &record.conflict_type)
            .await?;
        let expected_version = current.as_ref().map(|c| c.version);
        let previous_value = current.map(|c| c.value);

        let field = CanonicalProfileField {
            entity_id: record.entity_id.clone(),
            domain: record.domain,
            field: record.conflict_type.clone(),
            value: selected_value.clone(),
            confidence: None,
            source: Source::ManualCorrection,
            source_id: record.id.clone(),
            actor: Actor::human(resolved_by),
            updated_at: Utc::now(),
            version: 0,
        };
        self.profiles.write_field(field, expected_version).await?;

        let resolved = self
            .ledger
            .resolve(
                conflict_id,
                selected_value.clone(),
                method,
                Some(reason.to_string()),
                resolved_by,
            )
            .await?;

        let mut draft = AuditDraft::new(
            &record.entity_id,
            Source::ManualCorrection,
            &record.id,
            record.domain,
            &record.conflict_type,
            AuditAction::Updated,
            resolved_by,
            ProcessedBy::Manual,
        );
        draft.reasoning = Some(reason.to_string());
        draft.previous_value = previous_value;
        draft.new_value = Some(selected_value);
        draft.conflict_id = Some(record.id.clone());
        self.audit.append(draft).await?;

        self.refresh_identity(&record.entity_id).await?;
        info!(conflict_id, %method, resolved_by, "conflict resolved by hand");
        Ok(resolved)
    }
}
