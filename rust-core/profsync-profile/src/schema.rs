// SPDX-License-Identifier: PMPL-1.0-or-later
//! Closed field schema.
//!
//! Every tracked field is listed here with its kind, its weight in the
//! domain score and the role it plays in the unified identity. Lookups of
//! anything not listed return `None`, which the reconciler treats as an
//! unknown mapping.
//!
//! Score weights within a domain sum to 1.0 over the `Role::Score` fields.

use serde::Serialize;

use crate::model::{Domain, FieldValue};

/// Value shape accepted by a field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FieldKind {
    /// Numeric scale. `inverted` scales count higher raw values as worse.
    Scale { min: f64, max: f64, inverted: bool },
    /// One of a fixed set of labels.
    Categorical(&'static [&'static str]),
    /// Array of values (usually strings).
    List,
    Flag,
    Text,
}

impl FieldKind {
    /// Width of a numeric scale.
    pub fn range(&self) -> Option<f64> {
        match self {
            FieldKind::Scale { min, max, .. } => Some(max - min),
            _ => None,
        }
    }
}

/// How a field feeds the unified identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Weighted into the domain score.
    Score,
    /// Items are listed as strengths.
    Strength,
    /// Items are listed as challenges.
    Challenge,
    /// Rendered as a key characteristic.
    Characteristic,
    /// Free text, carried but not aggregated.
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub weight: f64,
    pub role: Role,
}

const fn scale(name: &'static str, min: f64, max: f64, weight: f64) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Scale {
            min,
            max,
            inverted: false,
        },
        weight,
        role: Role::Score,
    }
}

const fn inverted(name: &'static str, min: f64, max: f64, weight: f64) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Scale {
            min,
            max,
            inverted: true,
        },
        weight,
        role: Role::Score,
    }
}

const fn list(name: &'static str, role: Role) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::List,
        weight: 0.0,
        role,
    }
}

const fn categorical(name: &'static str, options: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Categorical(options),
        weight: 0.0,
        role: Role::Characteristic,
    }
}

const fn note(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
        weight: 0.0,
        role: Role::Note,
    }
}

const fn flag(name: &'static str, role: Role) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Flag,
        weight: 0.0,
        role,
    }
}

pub const LEARNING_STYLES: &[&str] = &["visual", "auditory", "kinesthetic", "reading", "mixed"];
pub const RISK_CATEGORIES: &[&str] = &["none", "low", "moderate", "elevated", "severe"];
pub const ECONOMIC_STATUS: &[&str] = &["stable", "strained", "critical"];

static ACADEMIC: [FieldSpec; 6] = [
    scale("overallAchievement", 0.0, 100.0, 0.5),
    scale("examAverage", 0.0, 100.0, 0.3),
    scale("studyHabits", 1.0, 5.0, 0.2),
    list("strongSubjects", Role::Strength),
    list("weakSubjects", Role::Challenge),
    categorical("learningStyle", LEARNING_STYLES),
];

static SOCIAL_EMOTIONAL: [FieldSpec; 5] = [
    scale("selfAwareness", 1.0, 5.0, 0.25),
    scale("empathy", 1.0, 5.0, 0.25),
    scale("peerRelations", 1.0, 5.0, 0.25),
    scale("emotionalRegulation", 1.0, 5.0, 0.25),
    list("socialStrengths", Role::Strength),
];

static BEHAVIORAL: [FieldSpec; 4] = [
    scale("classParticipation", 1.0, 5.0, 0.3),
    inverted("disciplineIncidents", 0.0, 20.0, 0.3),
    scale("attendanceRate", 0.0, 100.0, 0.4),
    list("behaviorConcerns", Role::Challenge),
];

static MOTIVATION: [FieldSpec; 4] = [
    scale("intrinsicMotivation", 1.0, 5.0, 0.4),
    scale("goalOrientation", 1.0, 5.0, 0.3),
    list("careerInterests", Role::Characteristic),
    scale("engagementLevel", 0.0, 100.0, 0.3),
];

static RISK_FACTORS: [FieldSpec; 5] = [
    scale("academicRisk", 0.0, 100.0, 0.4),
    scale("dropoutRisk", 0.0, 100.0, 0.35),
    scale("wellbeingRisk", 0.0, 100.0, 0.25),
    categorical("riskCategory", RISK_CATEGORIES),
    note("riskNotes"),
];

static TALENTS: [FieldSpec; 3] = [
    list("talents", Role::Strength),
    list("creativeInterests", Role::Characteristic),
    scale("leadership", 1.0, 5.0, 1.0),
];

static HEALTH: [FieldSpec; 3] = [
    list("chronicConditions", Role::Challenge),
    scale("physicalWellbeing", 0.0, 100.0, 1.0),
    flag("needsSupport", Role::Challenge),
];

static FAMILY: [FieldSpec; 4] = [
    scale("familySupport", 1.0, 5.0, 1.0),
    FieldSpec {
        name: "householdSize",
        kind: FieldKind::Scale {
            min: 1.0,
            max: 20.0,
            inverted: false,
        },
        weight: 0.0,
        role: Role::Characteristic,
    },
    categorical("economicStatus", ECONOMIC_STATUS),
    note("familyNotes"),
];

/// All fields of `domain`.
pub fn fields(domain: Domain) -> &'static [FieldSpec] {
    match domain {
        Domain::Academic => &ACADEMIC,
        Domain::SocialEmotional => &SOCIAL_EMOTIONAL,
        Domain::Behavioral => &BEHAVIORAL,
        Domain::Motivation => &MOTIVATION,
        Domain::RiskFactors => &RISK_FACTORS,
        Domain::Talents => &TALENTS,
        Domain::Health => &HEALTH,
        Domain::Family => &FAMILY,
    }
}

/// Schema entry for `(domain, field)`, or `None` when unmapped.
pub fn lookup(domain: Domain, field: &str) -> Option<&'static FieldSpec> {
    fields(domain).iter().find(|spec| spec.name == field)
}

impl FieldSpec {
    /// Check that `value` has the shape this field accepts.
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match (&self.kind, value) {
            (FieldKind::Scale { min, max, .. }, FieldValue::Number(n)) => {
                if !n.is_finite() || n < min || n > max {
                    Err(format!("{n} is outside {min}..={max}"))
                } else {
                    Ok(())
                }
            }
            (FieldKind::Categorical(options), FieldValue::Text(s)) => {
                if options.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not one of {options:?}"))
                }
            }
            (FieldKind::List, FieldValue::Array(_)) => Ok(()),
            (FieldKind::Flag, FieldValue::Boolean(_)) => Ok(()),
            (FieldKind::Text, FieldValue::Text(_)) => Ok(()),
            (kind, other) => Err(format!(
                "expected {}, got {}",
                kind_label(kind),
                other.kind_name()
            )),
        }
    }

    /// Scale value mapped onto 0..=100, with inverted scales flipped so that
    /// higher always means better. `None` for non-scale fields.
    pub fn normalized(&self, value: &FieldValue) -> Option<f64> {
        let FieldKind::Scale { min, max, inverted } = self.kind else {
            return None;
        };
        let n = value.as_number()?;
        if max <= min {
            return None;
        }
        let pct = ((n - min) / (max - min)).clamp(0.0, 1.0) * 100.0;
        Some(if inverted { 100.0 - pct } else { pct })
    }
}

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Scale { .. } => "number",
        FieldKind::Categorical(_) => "categorical text",
        FieldKind::List => "array",
        FieldKind::Flag => "boolean",
        FieldKind::Text => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_weights_sum_to_one() {
        for domain in Domain::ALL {
            let total: f64 = fields(domain)
                .iter()
                .filter(|f| f.role == Role::Score)
                .map(|f| f.weight)
                .sum();
            assert!((total - 1.0).abs() < 1e-9, "{domain} weights sum to {total}");
        }
    }

    #[test]
    fn test_field_names_unique_per_domain() {
        for domain in Domain::ALL {
            let names: Vec<_> = fields(domain).iter().map(|f| f.name).collect();
            let mut dedup = names.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(names.len(), dedup.len(), "duplicate field in {domain}");
        }
    }

    #[test]
    fn test_lookup() {
        assert!(lookup(Domain::Academic, "strongSubjects").is_some());
        assert!(lookup(Domain::Academic, "needsSupport").is_none());
        assert_eq!(
            lookup(Domain::Health, "needsSupport").map(|f| f.kind),
            Some(FieldKind::Flag)
        );
    }

    #[test]
    fn test_check_kinds() {
        let achievement = lookup(Domain::Academic, "overallAchievement").unwrap();
        assert!(achievement.check(&FieldValue::Number(55.0)).is_ok());
        assert!(achievement.check(&FieldValue::Number(101.0)).is_err());
        assert!(achievement.check(&FieldValue::Number(f64::NAN)).is_err());
        assert!(achievement.check(&"high".into()).is_err());

        let style = lookup(Domain::Academic, "learningStyle").unwrap();
        assert!(style.check(&"visual".into()).is_ok());
        assert!(style.check(&"telepathic".into()).is_err());

        let support = lookup(Domain::Health, "needsSupport").unwrap();
        assert!(support.check(&FieldValue::Boolean(true)).is_ok());
        assert!(support.check(&FieldValue::Number(1.0)).is_err());
    }

    #[test]
    fn test_normalized_respects_inversion() {
        let incidents = lookup(Domain::Behavioral, "disciplineIncidents").unwrap();
        assert_eq!(incidents.normalized(&FieldValue::Number(0.0)), Some(100.0));
        assert_eq!(incidents.normalized(&FieldValue::Number(20.0)), Some(0.0));

        let habits = lookup(Domain::Academic, "studyHabits").unwrap();
        assert_eq!(habits.normalized(&FieldValue::Number(3.0)), Some(50.0));
        assert_eq!(habits.normalized(&"x".into()), None);
    }
}
