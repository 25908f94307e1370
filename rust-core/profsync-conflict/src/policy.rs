// SPDX-License-Identifier: PMPL-1.0-or-later
//! Resolution Policy Engine.
//!
//! [`PolicyEngine::resolve`] turns a conflict into a final value. Strategies
//! are tried in a fixed order and the first that applies wins:
//!
//! 1. **manual**: a human selection is present.
//! 2. **ai_auto**: severity below `high`, the proposer is an AI actor and an
//!    [`Adjudicator`] is configured. The adjudicator picks old or new within
//!    `adjudication_timeout_ms`; an error or timeout falls through.
//! 3. **confidence_based**: both sides carry a confidence and they differ.
//! 4. **time_based**: the newer timestamp wins; a tie goes to the proposal.
//!
//! A pinned method is tried first; if it does not apply, the normal order
//! continues. `time_based` always applies, so every call terminates with a
//! resolution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use profsync_profile::{ActorKind, Domain, FieldValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::detector::Severity;
use crate::ledger::{ConflictRecord, ResolutionMethod};

/// `resolvedBy` recorded for an adjudicator decision.
pub const ADJUDICATOR_ID: &str = "ai:adjudicator";
/// `resolvedBy` recorded for rule-based decisions.
pub const SYSTEM_ID: &str = "system";

// ---------------------------------------------------------------------------
// Adjudicator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Old,
    New,
}

/// What the adjudicator is asked to decide.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjudicationRequest {
    pub entity_id: String,
    pub domain: Domain,
    pub field: String,
    pub severity: Severity,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub old_confidence: Option<u8>,
    pub new_confidence: Option<u8>,
    pub reasoning: Option<String>,
}

impl From<&ConflictRecord> for AdjudicationRequest {
    fn from(record: &ConflictRecord) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            domain: record.domain,
            field: record.conflict_type.clone(),
            severity: record.severity,
            old_value: record.old_value.clone(),
            new_value: record.new_value.clone(),
            old_confidence: record.old_confidence,
            new_confidence: record.new_confidence,
            reasoning: record.reasoning.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationVerdict {
    pub choice: Choice,
    pub reasoning: String,
}

#[derive(Error, Debug)]
pub enum AdjudicationError {
    #[error("adjudication timed out after {0:?}")]
    Timeout(Duration),

    #[error("adjudication failed: {0}")]
    Failed(String),
}

/// Opaque old-or-new judge, typically backed by a language model.
#[async_trait]
pub trait Adjudicator: Send + Sync {
    async fn adjudicate(
        &self,
        request: &AdjudicationRequest,
    ) -> Result<AdjudicationVerdict, AdjudicationError>;
}

// ---------------------------------------------------------------------------
// Config / hints / result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Upper bound on one adjudicator call.
    pub adjudication_timeout_ms: u64,
    /// Consult the adjudicator at all.
    pub ai_auto_enabled: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            adjudication_timeout_ms: 2_000,
            ai_auto_enabled: true,
        }
    }
}

/// A human's choice for a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSelection {
    pub selected_value: FieldValue,
    pub reason: String,
    pub resolved_by: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyHint {
    pub pinned: Option<ResolutionMethod>,
    pub manual: Option<ManualSelection>,
}

impl PolicyHint {
    /// Hint carrying a human selection, recorded as `manual`.
    pub fn manual(selection: ManualSelection) -> Self {
        Self {
            pinned: Some(ResolutionMethod::Manual),
            manual: Some(selection),
        }
    }

    /// Hint carrying a human selection from a bulk request.
    pub fn manual_bulk(selection: ManualSelection) -> Self {
        Self {
            pinned: Some(ResolutionMethod::ManualBulk),
            manual: Some(selection),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: FieldValue,
    pub method: ResolutionMethod,
    pub reasoning: String,
    pub resolved_by: String,
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PolicyEngine {
    config: ResolutionConfig,
    adjudicator: Option<Arc<dyn Adjudicator>>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("adjudicator", &self.adjudicator.is_some())
            .finish()
    }
}

const ORDER: [ResolutionMethod; 4] = [
    ResolutionMethod::Manual,
    ResolutionMethod::AiAuto,
    ResolutionMethod::ConfidenceBased,
    ResolutionMethod::TimeBased,
];

impl PolicyEngine {
    pub fn new(config: ResolutionConfig) -> Self {
        Self {
            config,
            adjudicator: None,
        }
    }

    pub fn with_adjudicator(mut self, adjudicator: Arc<dyn Adjudicator>) -> Self {
        self.adjudicator = Some(adjudicator);
        self
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Resolve `conflict`. Always returns a resolution.
    pub async fn resolve(&self, conflict: &ConflictRecord, hint: &PolicyHint) -> Resolution {
        if let Some(pinned) = hint.pinned {
            if let Some(resolution) = self.attempt(pinned, conflict, hint).await {
                return resolution;
            }
        }
        for method in ORDER {
            if Some(method) == hint.pinned {
                continue;
            }
            if let Some(resolution) = self.attempt(method, conflict, hint).await {
                return resolution;
            }
        }
        // time_based never declines
        time_based(conflict)
    }

    async fn attempt(
        &self,
        method: ResolutionMethod,
        conflict: &ConflictRecord,
        hint: &PolicyHint,
    ) -> Option<Resolution> {
        match method {
            ResolutionMethod::Manual | ResolutionMethod::ManualBulk => {
                let selection = hint.manual.as_ref()?;
                let method = if hint.pinned == Some(ResolutionMethod::ManualBulk) {
                    ResolutionMethod::ManualBulk
                } else {
                    ResolutionMethod::Manual
                };
                Some(Resolution {
                    value: selection.selected_value.clone(),
                    method,
                    reasoning: selection.reason.clone(),
                    resolved_by: selection.resolved_by.clone(),
                })
            }
            ResolutionMethod::AiAuto => self.ai_auto(conflict).await,
            ResolutionMethod::ConfidenceBased => confidence_based(conflict),
            ResolutionMethod::TimeBased => Some(time_based(conflict)),
            ResolutionMethod::Pending => None,
        }
    }

    async fn ai_auto(&self, conflict: &ConflictRecord) -> Option<Resolution> {
        if !self.config.ai_auto_enabled
            || conflict.severity == Severity::High
            || conflict.proposed_by.kind != ActorKind::Ai
        {
            return None;
        }
        let adjudicator = self.adjudicator.as_ref()?;

        let limit = Duration::from_millis(self.config.adjudication_timeout_ms);
        let request = AdjudicationRequest::from(conflict);
        let outcome = match tokio::time::timeout(limit, adjudicator.adjudicate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AdjudicationError::Timeout(limit)),
        };

        match outcome {
            Ok(verdict) => {
                debug!(conflict_id = %conflict.id, choice = ?verdict.choice, "adjudicated");
                let value = match verdict.choice {
                    Choice::Old => conflict.old_value.clone(),
                    Choice::New => conflict.new_value.clone(),
                };
                Some(Resolution {
                    value,
                    method: ResolutionMethod::AiAuto,
                    reasoning: verdict.reasoning,
                    resolved_by: ADJUDICATOR_ID.to_string(),
                })
            }
            Err(err) => {
                warn!(conflict_id = %conflict.id, error = %err, "adjudication failed, falling back");
                None
            }
        }
    }
}

fn confidence_based(conflict: &ConflictRecord) -> Option<Resolution> {
    let (old, new) = (conflict.old_confidence?, conflict.new_confidence?);
    let (value, reasoning) = if new > old {
        (conflict.new_value.clone(), format!("proposed confidence {new} > current {old}"))
    } else if old > new {
        (conflict.old_value.clone(), format!("current confidence {old} > proposed {new}"))
    } else {
        return None;
    };
    Some(Resolution {
        value,
        method: ResolutionMethod::ConfidenceBased,
        reasoning,
        resolved_by: SYSTEM_ID.to_string(),
    })
}

fn time_based(conflict: &ConflictRecord) -> Resolution {
    let (value, reasoning) = if conflict.new_timestamp >= conflict.old_timestamp {
        (conflict.new_value.clone(), "proposed value is the most recent")
    } else {
        (conflict.old_value.clone(), "current value is more recent than the proposal")
    };
    Resolution {
        value,
        method: ResolutionMethod::TimeBased,
        reasoning: reasoning.to_string(),
        resolved_by: SYSTEM_ID.to_string(),
    }
}
