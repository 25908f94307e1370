// SPDX-License-Identifier: PMPL-1.0-or-later
//! Identity aggregation.
//!
//! Domain scores are weighted composites of the domain's `Role::Score`
//! fields, using the weights from the field schema. Every scale is first
//! mapped onto 0..=100 with inverted scales flipped. Weights are
//! renormalised over the fields actually present, and a domain with no
//! scored fields has no score.

use std::fmt;

use chrono::{DateTime, Utc};
use profsync_audit::{AuditAction, AuditLogEntry, ProcessedBy};
use profsync_profile::schema::{self, FieldKind, Role};
use profsync_profile::{CanonicalProfileField, Domain, FieldValue};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// `riskLevel` thresholds for the intervention priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            critical: 75.0,
            high: 50.0,
            medium: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Audit entries summarised in `recentChanges`.
    pub recent_changes: usize,
    /// Cached identities older than this are recomputed on read.
    pub max_age_secs: u64,
    /// Normalised score at or above which a scored field counts as a
    /// strength.
    pub strength_score: f64,
    /// Normalised score at or below which a scored field counts as a
    /// challenge.
    pub challenge_score: f64,
    pub priority: PriorityThresholds,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            recent_changes: 10,
            max_age_secs: 300,
            strength_score: 80.0,
            challenge_score: 30.0,
            priority: PriorityThresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for InterventionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterventionPriority::Low => "low",
            InterventionPriority::Medium => "medium",
            InterventionPriority::High => "high",
            InterventionPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl InterventionPriority {
    /// Threshold function over `risk_level`; any unresolved `high` conflict
    /// lifts the result to at least `High`.
    pub fn from_risk(risk_level: f64, unresolved_high: usize, thresholds: &PriorityThresholds) -> Self {
        let base = if risk_level >= thresholds.critical {
            InterventionPriority::Critical
        } else if risk_level >= thresholds.high {
            InterventionPriority::High
        } else if risk_level >= thresholds.medium {
            InterventionPriority::Medium
        } else {
            InterventionPriority::Low
        };
        if unresolved_high > 0 {
            base.max(InterventionPriority::High)
        } else {
            base
        }
    }
}

/// One line of `recentChanges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChange {
    pub log_id: String,
    pub domain: Domain,
    pub field: String,
    pub action: AuditAction,
    pub processed_by: ProcessedBy,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedIdentity {
    pub entity_id: String,
    pub summary: String,
    pub key_characteristics: Vec<String>,
    pub academic_score: Option<f64>,
    pub social_emotional_score: Option<f64>,
    pub behavioral_score: Option<f64>,
    pub motivation_score: Option<f64>,
    /// 0..=100, higher is more at risk.
    pub risk_level: f64,
    pub strengths: Vec<String>,
    pub challenges: Vec<String>,
    pub recent_changes: Vec<RecentChange>,
    pub intervention_priority: InterventionPriority,
    pub unresolved_high_conflicts: usize,
    pub last_updated: DateTime<Utc>,
}

impl UnifiedIdentity {
    /// Whether this cached identity is younger than `max_age_secs`.
    pub fn is_fresh(&self, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.last_updated);
        age.num_seconds() >= 0 && (age.num_seconds() as u64) < max_age_secs
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Weighted composite of a domain's scored fields on 0..=100.
fn domain_score(domain: Domain, fields: &[CanonicalProfileField]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight = 0.0;
    for f in fields.iter().filter(|f| f.domain == domain) {
        let Some(spec) = schema::lookup(domain, &f.field) else {
            continue;
        };
        if spec.role != Role::Score || spec.weight <= 0.0 {
            continue;
        }
        if let Some(n) = spec.normalized(&f.value) {
            weighted += spec.weight * n;
            weight += spec.weight;
        }
    }
    (weight > 0.0).then(|| weighted / weight)
}

/// Floor applied to the composite risk when a category is recorded.
fn category_floor(category: &str) -> f64 {
    match category {
        "severe" => 80.0,
        "elevated" => 60.0,
        "moderate" => 40.0,
        "low" => 10.0,
        _ => 0.0,
    }
}

fn risk_level(fields: &[CanonicalProfileField]) -> f64 {
    let composite = domain_score(Domain::RiskFactors, fields).unwrap_or(0.0);
    let floor = fields
        .iter()
        .find(|f| f.domain == Domain::RiskFactors && f.field == "riskCategory")
        .and_then(|f| f.value.as_text())
        .map(category_floor)
        .unwrap_or(0.0);
    composite.max(floor).clamp(0.0, 100.0)
}

fn items(value: &FieldValue) -> Vec<String> {
    match value {
        FieldValue::Array(items) => items
            .iter()
            .map(|item| match item {
                FieldValue::Text(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        FieldValue::Text(s) => vec![s.clone()],
        other => vec![other.to_string()],
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Recompute the identity of `entity_id`.
///
/// `recent` is expected newest first; only the first
/// `config.recent_changes` entries are used.
pub fn aggregate(
    entity_id: &str,
    fields: &[CanonicalProfileField],
    recent: &[AuditLogEntry],
    unresolved_high: usize,
    config: &IdentityConfig,
    now: DateTime<Utc>,
) -> UnifiedIdentity {
    let mut strengths = Vec::new();
    let mut challenges = Vec::new();
    let mut key_characteristics = Vec::new();

    for f in fields {
        let Some(spec) = schema::lookup(f.domain, &f.field) else {
            continue;
        };
        match spec.role {
            Role::Strength => {
                for item in items(&f.value) {
                    push_unique(&mut strengths, item);
                }
            }
            Role::Challenge => match (&spec.kind, &f.value) {
                (FieldKind::Flag, FieldValue::Boolean(true)) => {
                    push_unique(&mut challenges, format!("{}.{}", f.domain, f.field));
                }
                (FieldKind::Flag, _) => {}
                _ => {
                    for item in items(&f.value) {
                        push_unique(&mut challenges, item);
                    }
                }
            },
            Role::Characteristic => {
                let rendered = items(&f.value).join(", ");
                if !rendered.is_empty() {
                    key_characteristics.push(format!("{}: {}", f.field, rendered));
                }
            }
            Role::Score if f.domain != Domain::RiskFactors => {
                if let Some(n) = spec.normalized(&f.value) {
                    if n >= config.strength_score {
                        push_unique(&mut strengths, format!("{} (high)", f.field));
                    } else if n <= config.challenge_score {
                        push_unique(&mut challenges, format!("{} (low)", f.field));
                    }
                }
            }
            Role::Score | Role::Note => {}
        }
    }

    let recent_changes: Vec<RecentChange> = recent
        .iter()
        .take(config.recent_changes)
        .map(|e| RecentChange {
            log_id: e.id.clone(),
            domain: e.content.domain,
            field: e.content.field.clone(),
            action: e.content.action,
            processed_by: e.content.processed_by,
            timestamp: e.timestamp,
        })
        .collect();

    let risk_level = risk_level(fields);
    let intervention_priority =
        InterventionPriority::from_risk(risk_level, unresolved_high, &config.priority);

    let mut domains: Vec<Domain> = fields.iter().map(|f| f.domain).collect();
    domains.sort();
    domains.dedup();
    let mut summary = format!(
        "{} fields across {} domains; risk {:.0} ({}); {} strengths, {} challenges",
        fields.len(),
        domains.len(),
        risk_level,
        intervention_priority,
        strengths.len(),
        challenges.len()
    );
    if unresolved_high > 0 {
        summary.push_str(&format!("; {unresolved_high} high-severity conflicts awaiting review"));
    }

    UnifiedIdentity {
        entity_id: entity_id.to_string(),
        summary,
        key_characteristics,
        academic_score: domain_score(Domain::Academic, fields),
        social_emotional_score: domain_score(Domain::SocialEmotional, fields),
        behavioral_score: domain_score(Domain::Behavioral, fields),
        motivation_score: domain_score(Domain::Motivation, fields),
        risk_level,
        strengths,
        challenges,
        recent_changes,
        intervention_priority,
        unresolved_high_conflicts: unresolved_high,
        last_updated: now,
    }
}
