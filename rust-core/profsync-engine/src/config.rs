// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine configuration.
//!
//! Every section has documented defaults, and every field is optional in
//! the JSON form so a partial file only overrides what it names:
//!
//! ```json
//! { "severity": { "confidence_proximity": 10 }, "envelope": { "history_size": 200 } }
//! ```

use std::path::Path;

use profsync_conflict::{ResolutionConfig, SeverityTable};
use profsync_envelope::EnvelopeConfig;
use profsync_identity::IdentityConfig;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Conflict severity thresholds.
    pub severity: SeverityTable,
    /// Resolution policy tuning.
    pub resolution: ResolutionConfig,
    /// Async envelope sizing.
    pub envelope: EnvelopeConfig,
    /// Identity aggregation and cache.
    pub identity: IdentityConfig,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}
