// SPDX-License-Identifier: PMPL-1.0-or-later
//! Reconciler.
//!
//! `apply` takes one proposed update through detection and resolution and
//! writes the outcome. For a given entity the steps always happen in this
//! order, under the entity lock:
//!
//! 1. read the current field
//! 2. detect; on conflict, resolve (or park, for `high` AI proposals)
//! 3. write the field, checking the version that was read
//! 4. record the conflict and its resolution in the ledger
//! 5. append the audit entry
//! 6. recompute the unified identity
//!
//! Nothing is persisted before step 3, so a version mismatch there can be
//! retried from scratch. A second mismatch is surfaced.

use profsync_audit::{AuditAction, AuditDraft, ProcessedBy};
use profsync_conflict::{
    detect, ConflictRecord, Decision, PolicyHint, ResolutionMethod, Severity,
};
use profsync_profile::schema;
use profsync_profile::{ActorKind, CanonicalProfileField, FieldValue, ProposedUpdate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::engine::Engine;
use crate::error::EngineError;

/// What happened to an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    /// The field now holds the reconciled value.
    Applied,
    /// A `high` conflict was parked for human review; the field is unchanged.
    Pending,
    /// The field is not mapped; the update was logged and dropped.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub applied: bool,
    pub status: ApplyStatus,
    pub conflict_id: Option<String>,
    pub severity: Option<Severity>,
    pub method: Option<ResolutionMethod>,
    /// The field's value after reconciliation.
    pub value: Option<FieldValue>,
    pub log_id: Option<String>,
}

impl ApplyOutcome {
    fn new(status: ApplyStatus) -> Self {
        Self {
            applied: status == ApplyStatus::Applied,
            status,
            conflict_id: None,
            severity: None,
            method: None,
            value: None,
            log_id: None,
        }
    }
}

fn processed_by(hint: &PolicyHint, actor_kind: ActorKind) -> ProcessedBy {
    if hint.is_manual() || actor_kind == ActorKind::Human {
        ProcessedBy::Manual
    } else {
        ProcessedBy::Ai
    }
}

fn insights(update: &ProposedUpdate) -> serde_json::Value {
    json!({
        "proposedValue": update.value,
        "confidence": update.confidence,
        "reasoning": update.reasoning,
        "actor": update.actor.to_string(),
    })
}

impl Engine {
    /// Reconcile one update now, in the caller's task. Malformed updates
    /// are rejected before any state is read.
    pub async fn apply(&self, update: ProposedUpdate) -> Result<ApplyOutcome, EngineError> {
        self.apply_with_hint(update, PolicyHint::default()).await
    }

    pub(crate) async fn apply_with_hint(
        &self,
        update: ProposedUpdate,
        hint: PolicyHint,
    ) -> Result<ApplyOutcome, EngineError> {
        Self::precheck(&update)?;
        let _guard = self.locks.acquire(&update.entity_id).await;
        self.apply_locked(&update, &hint).await
    }

    /// Reconcile with one retry on a version mismatch. Callers hold the
    /// entity lock.
    pub(crate) async fn apply_locked(
        &self,
        update: &ProposedUpdate,
        hint: &PolicyHint,
    ) -> Result<ApplyOutcome, EngineError> {
        match self.reconcile(update, hint).await {
            Err(EngineError::ConcurrencyViolation(reason)) => {
                warn!(entity_id = %update.entity_id, %reason, "field moved during reconcile, retrying once");
                self.reconcile(update, hint).await
            }
            other => other,
        }
    }

    #[instrument(skip(self, update, hint), fields(entity_id = %update.entity_id, domain = %update.domain, field = %update.field))]
    async fn reconcile(
        &self,
        update: &ProposedUpdate,
        hint: &PolicyHint,
    ) -> Result<ApplyOutcome, EngineError> {
        let Some(spec) = schema::lookup(update.domain, &update.field) else {
            return self.reject_unmapped(update, hint).await;
        };
        spec.check(&update.value).map_err(|reason| {
            EngineError::Validation(format!("{}.{}: {}", update.domain, update.field, reason))
        })?;

        let current = self
            .profiles
            .get_field(&update.entity_id, update.domain, &update.field)
            .await?;
        let expected_version = current.as_ref().map(|c| c.version);
        let previous_value = current.as_ref().map(|c| c.value.clone());

        let decision = detect(&self.config.severity, current.as_ref(), update);
        let (conflict, resolution) = match (decision, current.as_ref()) {
            (Decision::Conflict(severity), Some(current)) => {
                let record = ConflictRecord::pending(current, update, severity);

                if severity == Severity::High && update.actor.is_ai() && !hint.is_manual() {
                    self.ledger.insert(&record).await?;
                    info!(conflict_id = %record.id, %severity, "conflict parked for review");
                    self.refresh_identity(&update.entity_id).await?;
                    let mut outcome = ApplyOutcome::new(ApplyStatus::Pending);
                    outcome.conflict_id = Some(record.id);
                    outcome.severity = Some(severity);
                    outcome.method = Some(ResolutionMethod::Pending);
                    outcome.value = previous_value;
                    return Ok(outcome);
                }

                let resolution = self.policy.resolve(&record, hint).await;
                (Some(record), Some(resolution))
            }
            _ => (None, None),
        };

        // Field write.
        let value = match &resolution {
            Some(r) => r.value.clone(),
            None => update.value.clone(),
        };
        let keeps_current = resolution.is_some() && previous_value.as_ref() == Some(&value);
        if !keeps_current {
            let mut record = CanonicalProfileField::from_update(update, value.clone());
            if hint.is_manual() {
                record.confidence = None;
            }
            self.profiles.write_field(record, expected_version).await?;
        }

        // Ledger.
        if let (Some(record), Some(r)) = (&conflict, &resolution) {
            self.ledger.insert(record).await?;
            self.ledger
                .resolve(
                    &record.id,
                    r.value.clone(),
                    r.method,
                    Some(r.reasoning.clone()),
                    &r.resolved_by,
                )
                .await?;
        }

        // Audit.
        let (performed_by, processed) = match &resolution {
            Some(r) if r.method.is_manual() => (r.resolved_by.clone(), ProcessedBy::Manual),
            Some(r) => (r.resolved_by.clone(), ProcessedBy::Ai),
            None => match &hint.manual {
                Some(selection) => (selection.resolved_by.clone(), ProcessedBy::Manual),
                None => (update.actor.to_string(), processed_by(hint, update.actor.kind)),
            },
        };
        let mut draft = AuditDraft::new(
            &update.entity_id,
            update.source,
            &update.source_id,
            update.domain,
            &update.field,
            AuditAction::Updated,
            performed_by,
            processed,
        );
        draft.validation_score = update.confidence;
        draft.reasoning = match &resolution {
            Some(r) => Some(r.reasoning.clone()),
            None => hint
                .manual
                .as_ref()
                .map(|s| s.reason.clone())
                .or_else(|| update.reasoning.clone()),
        };
        draft.extracted_insights = insights(update);
        draft.previous_value = previous_value;
        draft.new_value = Some(value.clone());
        draft.conflict_id = conflict.as_ref().map(|c| c.id.clone());
        let entry = self.audit.append(draft).await?;

        self.refresh_identity(&update.entity_id).await?;

        let mut outcome = ApplyOutcome::new(ApplyStatus::Applied);
        outcome.conflict_id = conflict.map(|c| c.id);
        outcome.severity = decision.severity();
        outcome.method = resolution.map(|r| r.method);
        outcome.value = Some(value);
        outcome.log_id = Some(entry.id);
        debug!(status = ?outcome.status, method = ?outcome.method, "update reconciled");
        Ok(outcome)
    }

    async fn reject_unmapped(
        &self,
        update: &ProposedUpdate,
        hint: &PolicyHint,
    ) -> Result<ApplyOutcome, EngineError> {
        warn!(
            entity_id = %update.entity_id,
            domain = %update.domain,
            field = %update.field,
            "unknown field mapping, update dropped"
        );
        let mut draft = AuditDraft::new(
            &update.entity_id,
            update.source,
            &update.source_id,
            update.domain,
            &update.field,
            AuditAction::Rejected,
            update.actor.to_string(),
            processed_by(hint, update.actor.kind),
        );
        draft.validation_score = update.confidence;
        draft.reasoning = Some(format!(
            "unknown field mapping: {}.{}",
            update.domain, update.field
        ));
        draft.extracted_insights = insights(update);
        let entry = self.audit.append(draft).await?;

        let mut outcome = ApplyOutcome::new(ApplyStatus::Rejected);
        outcome.log_id = Some(entry.id);
        Ok(outcome)
    }
}
