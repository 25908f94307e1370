// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Engine-level errors returned to callers of manual operations and queries.
// Producer-path errors never leave the envelope.

use profsync_audit::AuditError;
use profsync_conflict::ConflictError;
use profsync_envelope::EnvelopeError;
use profsync_profile::{Domain, ProfileError};
use profsync_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input, rejected before reconciliation.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown field mapping: {domain}.{field}")]
    UnknownMapping { domain: Domain, field: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("audit entry {log_id} cannot be undone: {reason}")]
    NotUndoable { log_id: String, reason: String },

    #[error("audit entry already undone: {0}")]
    AlreadyUndone(String),

    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// The field moved under a reconciliation, twice in a row.
    #[error("concurrent modification: {0}")]
    ConcurrencyViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ProfileError> for EngineError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::ValidationError(msg) => EngineError::Validation(msg),
            ProfileError::UnknownMapping { domain, field } => {
                EngineError::UnknownMapping { domain, field }
            }
            violation @ ProfileError::ConcurrencyViolation { .. } => {
                EngineError::ConcurrencyViolation(violation.to_string())
            }
            ProfileError::Storage(e) => EngineError::Storage(e),
        }
    }
}

impl From<ConflictError> for EngineError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::NotFound(id) => EngineError::NotFound(format!("conflict {id}")),
            ConflictError::AlreadyResolved(id) => EngineError::AlreadyResolved(id),
            ConflictError::InvalidResolution(msg) => EngineError::Validation(msg),
            ConflictError::Storage(e) => EngineError::Storage(e),
        }
    }
}
