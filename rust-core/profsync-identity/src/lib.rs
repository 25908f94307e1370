// SPDX-License-Identifier: PMPL-1.0-or-later
//! ProfSync unified identity
//!
//! A per-entity rollup of the canonical profile: domain scores, risk level,
//! strengths, challenges, recent changes and an intervention priority.
//! [`aggregate`] is a pure function of the current fields, the most recent
//! audit entries and the count of unresolved `high` conflicts. The result is
//! a cache ([`IdentityCache`]), never a source of truth.

pub mod aggregate;
pub mod cache;

pub use aggregate::{
    aggregate, IdentityConfig, InterventionPriority, PriorityThresholds, RecentChange,
    UnifiedIdentity,
};
pub use cache::IdentityCache;
