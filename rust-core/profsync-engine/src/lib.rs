// SPDX-License-Identifier: PMPL-1.0-or-later
//! ProfSync engine
//!
//! [`Engine`] owns every store and service of the synchronization pipeline
//! and is the only way to mutate a canonical profile:
//!
//! ```text
//! producer -> Envelope -> Reconciler -> { Detector -> PolicyEngine }
//!          -> ProfileStore + AuditLog -> identity aggregation
//! ```
//!
//! At most one apply, resolution or undo runs per entity at a time
//! ([`EntityLocks`]); different entities proceed in parallel.

pub mod config;
pub mod engine;
pub mod error;
pub mod locks;
mod reconciler;
mod resolution;
pub mod undo;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use locks::EntityLocks;
pub use reconciler::{ApplyOutcome, ApplyStatus};
pub use resolution::{BulkItemResult, BulkResolution, BulkSummary};
pub use undo::UndoRecord;
