// SPDX-License-Identifier: PMPL-1.0-or-later
//! Core profile types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProfileError;
use crate::schema::{self, FieldSpec};

/// Identifier of the entity (student) a profile belongs to.
pub type EntityId = String;

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Profile domain. Each domain owns a fixed set of fields (see [`schema`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Domain {
    Academic,
    SocialEmotional,
    Behavioral,
    Motivation,
    RiskFactors,
    Talents,
    Health,
    Family,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Academic,
        Domain::SocialEmotional,
        Domain::Behavioral,
        Domain::Motivation,
        Domain::RiskFactors,
        Domain::Talents,
        Domain::Health,
        Domain::Family,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Academic => "academic",
            Domain::SocialEmotional => "socialEmotional",
            Domain::Behavioral => "behavioral",
            Domain::Motivation => "motivation",
            Domain::RiskFactors => "riskFactors",
            Domain::Talents => "talents",
            Domain::Health => "health",
            Domain::Family => "family",
        }
    }

    /// The fields this domain tracks.
    pub fn fields(&self) -> &'static [FieldSpec] {
        schema::fields(*self)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ProfileError::ValidationError(format!("unknown domain '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Source / Actor
// ---------------------------------------------------------------------------

/// Producer category of an update.
///
/// `Undo` is never submitted by producers; the undo manager stamps it on the
/// forward entry that documents a revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Session,
    Survey,
    ExamImport,
    Incident,
    ManualCorrection,
    Other,
    Undo,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Session => "session",
            Source::Survey => "survey",
            Source::ExamImport => "examImport",
            Source::Incident => "incident",
            Source::ManualCorrection => "manualCorrection",
            Source::Other => "other",
            Source::Undo => "undo",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Ai,
    Human,
}

/// Who proposed a value: an AI extractor or a named human.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn ai(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Ai,
            id: id.into(),
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Human,
            id: id.into(),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.kind == ActorKind::Ai
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActorKind::Ai => write!(f, "ai:{}", self.id),
            ActorKind::Human => write!(f, "human:{}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A JSON-shaped field value. Equality is structural (deep).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Array(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Shape name used in validation messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::Array(_) => "array",
            FieldValue::Object(_) => "object",
        }
    }

    /// Convenience constructor for a list of strings.
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::Array(items.into_iter().map(|s| FieldValue::Text(s.into())).collect())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

// ---------------------------------------------------------------------------
// ProposedUpdate
// ---------------------------------------------------------------------------

/// A field-level value proposed by a producer. Consumed once by the
/// reconciler; never persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedUpdate {
    pub entity_id: EntityId,
    pub source: Source,
    pub source_id: String,
    pub domain: Domain,
    pub field: String,
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub actor: Actor,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ProposedUpdate {
    /// Build an update stamped with the current time and a fresh source id.
    pub fn new(
        entity_id: impl Into<EntityId>,
        source: Source,
        domain: Domain,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        actor: Actor,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            source,
            source_id: Uuid::new_v4().to_string(),
            domain,
            field: field.into(),
            value: value.into(),
            confidence: None,
            reasoning: None,
            actor,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Structural checks that do not need the schema.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.entity_id.trim().is_empty() {
            return Err(ProfileError::ValidationError("entityId is empty".into()));
        }
        if self.entity_id.contains('/') {
            return Err(ProfileError::ValidationError(format!(
                "entityId '{}' must not contain '/'",
                self.entity_id
            )));
        }
        if self.field.trim().is_empty() {
            return Err(ProfileError::ValidationError("field is empty".into()));
        }
        if self.source_id.trim().is_empty() {
            return Err(ProfileError::ValidationError("sourceId is empty".into()));
        }
        if self.actor.id.trim().is_empty() {
            return Err(ProfileError::ValidationError("actor id is empty".into()));
        }
        if self.source == Source::Undo {
            return Err(ProfileError::ValidationError(
                "source 'undo' is reserved for undo reverts".into(),
            ));
        }
        if let Some(c) = self.confidence {
            if c > 100 {
                return Err(ProfileError::ValidationError(format!(
                    "confidence {c} is outside 0..=100"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the schema entry and check the value against its kind.
    ///
    /// An unknown field yields `UnknownMapping`; a shape mismatch yields
    /// `ValidationError`.
    pub fn check_schema(&self) -> Result<&'static FieldSpec, ProfileError> {
        let spec =
            schema::lookup(self.domain, &self.field).ok_or_else(|| ProfileError::UnknownMapping {
                domain: self.domain,
                field: self.field.clone(),
            })?;
        spec.check(&self.value).map_err(|reason| {
            ProfileError::ValidationError(format!("{}.{}: {}", self.domain, self.field, reason))
        })?;
        Ok(spec)
    }
}

// ---------------------------------------------------------------------------
// CanonicalProfileField
// ---------------------------------------------------------------------------

/// The accepted current value of `(entity_id, domain, field)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalProfileField {
    pub entity_id: EntityId,
    pub domain: Domain,
    pub field: String,
    pub value: FieldValue,
    pub confidence: Option<u8>,
    pub source: Source,
    pub source_id: String,
    pub actor: Actor,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; the first write stores version 1.
    pub version: u64,
}

impl CanonicalProfileField {
    /// Field record carrying `value` and the provenance of `update`.
    pub fn from_update(update: &ProposedUpdate, value: FieldValue) -> Self {
        Self {
            entity_id: update.entity_id.clone(),
            domain: update.domain,
            field: update.field.clone(),
            value,
            confidence: update.confidence,
            source: update.source,
            source_id: update.source_id.clone(),
            actor: update.actor.clone(),
            updated_at: update.timestamp,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_parse_and_display() {
        for d in Domain::ALL {
            assert_eq!(d.as_str().parse::<Domain>().unwrap(), d);
        }
        assert!("astrology".parse::<Domain>().is_err());
    }

    #[test]
    fn test_update_json_shape() {
        let raw = r#"{
            "entityId": "S1",
            "source": "examImport",
            "sourceId": "exam-7",
            "domain": "academic",
            "field": "strongSubjects",
            "value": ["Math"],
            "confidence": 80,
            "actor": {"kind": "ai", "id": "extractor"},
            "timestamp": "2026-03-01T10:00:00Z"
        }"#;
        let update: ProposedUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(update.source, Source::ExamImport);
        assert_eq!(update.value, FieldValue::list(["Math"]));
        assert_eq!(update.confidence, Some(80));
        assert!(update.actor.is_ai());
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_field_value_deep_equality() {
        let a: FieldValue = serde_json::from_str(r#"{"a": [1, 2, {"b": true}]}"#).unwrap();
        let b: FieldValue = serde_json::from_str(r#"{"a": [1, 2, {"b": true}]}"#).unwrap();
        let c: FieldValue = serde_json::from_str(r#"{"a": [1, 2, {"b": false}]}"#).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.kind_name(), "object");
    }

    #[test]
    fn test_validate_rejects_malformed_updates() {
        let base = ProposedUpdate::new(
            "S1",
            Source::Survey,
            Domain::Motivation,
            "engagementLevel",
            60.0,
            Actor::ai("x"),
        );
        assert!(base.validate().is_ok());

        let mut bad = base.clone();
        bad.entity_id = " ".into();
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.entity_id = "S1/evil".into();
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.confidence = Some(101);
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.actor = Actor::human("");
        assert!(bad.validate().is_err());

        let mut bad = base;
        bad.source = Source::Undo;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_check_schema_paths() {
        let ok = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Academic,
            "strongSubjects",
            FieldValue::list(["Math"]),
            Actor::ai("x"),
        );
        assert_eq!(ok.check_schema().unwrap().name, "strongSubjects");

        let unknown = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Academic,
            "favouriteColour",
            "blue",
            Actor::ai("x"),
        );
        assert!(matches!(
            unknown.check_schema(),
            Err(ProfileError::UnknownMapping { .. })
        ));

        let wrong_shape = ProposedUpdate::new(
            "S1",
            Source::Session,
            Domain::Academic,
            "overallAchievement",
            "excellent",
            Actor::ai("x"),
        );
        assert!(matches!(
            wrong_shape.check_schema(),
            Err(ProfileError::ValidationError(_))
        ));
    }
}
