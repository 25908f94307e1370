// SPDX-License-Identifier: PMPL-1.0-or-later
//! Conflict detection.
//!
//! [`detect`] compares the current canonical value with a proposal and
//! classifies the disagreement. It reads nothing but its arguments.

use std::fmt;

use profsync_profile::schema::{self, FieldKind};
use profsync_profile::{CanonicalProfileField, Domain, FieldValue, ProposedUpdate};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a detected conflict. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoConflict,
    Conflict(Severity),
}

impl Decision {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Decision::NoConflict => None,
            Decision::Conflict(s) => Some(*s),
        }
    }
}

// ---------------------------------------------------------------------------
// SeverityTable
// ---------------------------------------------------------------------------

/// Tunable thresholds for severity classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityTable {
    /// Domains where a large divergence is `high`.
    pub sensitive_domains: Vec<Domain>,
    /// Divergence on a numeric scale, as a percentage of the scale width,
    /// above which a sensitive-domain conflict is `high`.
    pub numeric_divergence_pct: f64,
    /// Confidence gap (in points) within which a conflict is `medium`.
    pub confidence_proximity: u8,
    /// Confidence assumed when a side carries none.
    pub neutral_confidence: u8,
    /// Treat a disagreement between actors of the same kind as `medium`
    /// regardless of the confidence gap.
    pub same_actor_is_medium: bool,
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            sensitive_domains: vec![Domain::RiskFactors, Domain::Health],
            numeric_divergence_pct: 30.0,
            confidence_proximity: 15,
            neutral_confidence: 50,
            same_actor_is_medium: true,
        }
    }
}

impl SeverityTable {
    pub fn is_sensitive(&self, domain: Domain) -> bool {
        self.sensitive_domains.contains(&domain)
    }

    /// Whether two differing values of `field` diverge past the sensitive
    /// threshold. Scale fields compare by distance; every other kind
    /// counts any mismatch.
    fn diverges(&self, domain: Domain, field: &str, old: &FieldValue, new: &FieldValue) -> bool {
        let kind = schema::lookup(domain, field).map(|spec| spec.kind);
        match (kind, old.as_number(), new.as_number()) {
            (Some(FieldKind::Scale { min, max, .. }), Some(a), Some(b)) if max > min => {
                (a - b).abs() / (max - min) * 100.0 > self.numeric_divergence_pct
            }
            _ => true,
        }
    }
}

/// Classify `proposed` against the current canonical value.
pub fn detect(
    table: &SeverityTable,
    current: Option<&CanonicalProfileField>,
    proposed: &ProposedUpdate,
) -> Decision {
    let Some(current) = current else {
        return Decision::NoConflict;
    };
    if current.value == proposed.value {
        return Decision::NoConflict;
    }

    if table.is_sensitive(proposed.domain)
        && table.diverges(proposed.domain, &proposed.field, &current.value, &proposed.value)
    {
        return Decision::Conflict(Severity::High);
    }

    let prior = current.confidence.unwrap_or(table.neutral_confidence);
    let incoming = proposed.confidence.unwrap_or(table.neutral_confidence);
    let close = prior.abs_diff(incoming) <= table.confidence_proximity;
    let same_kind = table.same_actor_is_medium && current.actor.kind == proposed.actor.kind;

    if close || same_kind {
        Decision::Conflict(Severity::Medium)
    } else {
        Decision::Conflict(Severity::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profsync_profile::{Actor, Source};

    fn current(
        domain: Domain,
        field: &str,
        value: FieldValue,
        confidence: Option<u8>,
        actor: Actor,
    ) -> CanonicalProfileField {
        let mut update = ProposedUpdate::new("S1", Source::Session, domain, field, value.clone(), actor);
        update.confidence = confidence;
        let mut record = CanonicalProfileField::from_update(&update, value);
        record.version = 1;
        record
    }

    #[test]
    fn test_no_prior_value() {
        let proposal = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Academic,
            "examAverage",
            70.0,
            Actor::ai("x"),
        );
        assert_eq!(detect(&SeverityTable::default(), None, &proposal), Decision::NoConflict);
    }

    #[test]
    fn test_deep_equal_is_not_a_conflict() {
        let cur = current(
            Domain::Academic,
            "strongSubjects",
            FieldValue::list(["Math", "Art"]),
            Some(10),
            Actor::human("t"),
        );
        let proposal = ProposedUpdate::new(
            "S1",
            Source::Survey,
            Domain::Academic,
            "strongSubjects",
            FieldValue::list(["Math", "Art"]),
            Actor::ai("x"),
        )
        .with_confidence(95);
        assert_eq!(
            detect(&SeverityTable::default(), Some(&cur), &proposal),
            Decision::NoConflict
        );
    }

    #[test]
    fn test_same_actor_kind_is_medium() {
        let cur = current(
            Domain::Academic,
            "strongSubjects",
            FieldValue::list(["Math"]),
            Some(80),
            Actor::ai("extractor"),
        );
        let proposal = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Academic,
            "strongSubjects",
            FieldValue::list(["Math", "Physics"]),
            Actor::ai("extractor"),
        )
        .with_confidence(40);
        assert_eq!(
            detect(&SeverityTable::default(), Some(&cur), &proposal),
            Decision::Conflict(Severity::Medium)
        );
    }

    #[test]
    fn test_confidence_gap_decides_between_medium_and_low() {
        let cur = current(
            Domain::Motivation,
            "engagementLevel",
            FieldValue::Number(40.0),
            None,
            Actor::human("counselor"),
        );
        let near = ProposedUpdate::new(
            "S1",
            Source::Survey,
            Domain::Motivation,
            "engagementLevel",
            45.0,
            Actor::ai("x"),
        )
        .with_confidence(60);
        let far = near.clone().with_confidence(95);

        let table = SeverityTable::default();
        assert_eq!(detect(&table, Some(&cur), &near), Decision::Conflict(Severity::Medium));
        assert_eq!(detect(&table, Some(&cur), &far), Decision::Conflict(Severity::Low));
    }

    #[test]
    fn test_sensitive_numeric_threshold() {
        let cur = current(
            Domain::RiskFactors,
            "dropoutRisk",
            FieldValue::Number(20.0),
            Some(70),
            Actor::human("counselor"),
        );
        let small = ProposedUpdate::new(
            "S1",
            Source::Incident,
            Domain::RiskFactors,
            "dropoutRisk",
            45.0,
            Actor::ai("x"),
        )
        .with_confidence(70);
        let large = ProposedUpdate::new(
            "S1",
            Source::Incident,
            Domain::RiskFactors,
            "dropoutRisk",
            60.0,
            Actor::ai("x"),
        )
        .with_confidence(70);

        let table = SeverityTable::default();
        assert_eq!(detect(&table, Some(&cur), &small), Decision::Conflict(Severity::Medium));
        assert_eq!(detect(&table, Some(&cur), &large), Decision::Conflict(Severity::High));
    }

    #[test]
    fn test_sensitive_categorical_mismatch_is_high() {
        let cur = current(
            Domain::Health,
            "needsSupport",
            FieldValue::Boolean(false),
            Some(90),
            Actor::human("nurse"),
        );
        let proposal = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Health,
            "needsSupport",
            true,
            Actor::ai("x"),
        );
        assert_eq!(
            detect(&SeverityTable::default(), Some(&cur), &proposal),
            Decision::Conflict(Severity::High)
        );
    }

    #[test]
    fn test_sensitive_domains_follow_the_table() {
        let cur = current(
            Domain::Health,
            "needsSupport",
            FieldValue::Boolean(false),
            Some(90),
            Actor::human("nurse"),
        );
        let proposal = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Health,
            "needsSupport",
            true,
            Actor::ai("x"),
        )
        .with_confidence(40);

        let table = SeverityTable {
            sensitive_domains: vec![Domain::RiskFactors],
            ..SeverityTable::default()
        };
        assert!(!table.is_sensitive(Domain::Health));
        assert_eq!(detect(&table, Some(&cur), &proposal), Decision::Conflict(Severity::Low));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Decision::Conflict(Severity::Low).severity(), Some(Severity::Low));
    }
}
