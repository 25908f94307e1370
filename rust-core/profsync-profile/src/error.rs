// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Profile-layer errors.

use profsync_storage::StorageError;
use thiserror::Error;

use crate::model::Domain;

#[derive(Error, Debug)]
pub enum ProfileError {
    /// The update is malformed or its value does not fit the field kind.
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// The `(domain, field)` pair is not part of the schema.
    #[error("unknown field mapping: {domain}.{field}")]
    UnknownMapping { domain: Domain, field: String },

    /// The field moved between read and write.
    #[error(
        "concurrent modification of {entity_id}/{domain}/{field}: expected version {expected:?}, found {found:?}"
    )]
    ConcurrencyViolation {
        entity_id: String,
        domain: Domain,
        field: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mapping_display() {
        let err = ProfileError::UnknownMapping {
            domain: Domain::Academic,
            field: "shoeSize".into(),
        };
        assert_eq!(err.to_string(), "unknown field mapping: academic.shoeSize");
    }

    #[test]
    fn test_concurrency_violation_display() {
        let err = ProfileError::ConcurrencyViolation {
            entity_id: "S1".into(),
            domain: Domain::Health,
            field: "needsSupport".into(),
            expected: Some(2),
            found: Some(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("S1/health/needsSupport"));
        assert!(msg.contains("Some(2)"));
    }
}
