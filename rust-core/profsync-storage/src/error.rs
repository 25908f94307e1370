// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Storage error types.

use thiserror::Error;

/// Errors raised by a storage backend or the typed wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The stored bytes are not what the backend expected.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The backend cannot currently serve requests.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = StorageError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        ));
        assert!(err.to_string().starts_with("I/O error"));
        assert!(err.to_string().contains("read-only volume"));
    }

    #[test]
    fn test_serialization_error_display() {
        let err = StorageError::SerializationError("expected object".to_string());
        assert_eq!(err.to_string(), "serialization error: expected object");
    }

    #[test]
    fn test_backend_unavailable_display() {
        let err = StorageError::BackendUnavailable("database locked".to_string());
        assert!(err.to_string().contains("backend unavailable"));
    }
}
