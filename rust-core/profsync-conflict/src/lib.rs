// SPDX-License-Identifier: PMPL-1.0-or-later
//! ProfSync conflict handling
//!
//! - [`detector`]: pure `detect(current, proposed) -> Decision` over a
//!   tunable [`SeverityTable`].
//! - [`ledger`]: persisted [`ConflictRecord`]s. A record is created
//!   `pending` and moves exactly once to a terminal resolution method.
//! - [`policy`]: the [`PolicyEngine`], which walks manual, ai_auto,
//!   confidence_based and time_based in that order and always produces a
//!   resolution.

pub mod detector;
pub mod ledger;
pub mod policy;

pub use detector::{detect, Decision, Severity, SeverityTable};
pub use ledger::{ConflictError, ConflictLedger, ConflictRecord, ResolutionMethod};
pub use policy::{
    AdjudicationError, AdjudicationRequest, AdjudicationVerdict, Adjudicator, Choice,
    ManualSelection, PolicyEngine, PolicyHint, Resolution, ResolutionConfig,
};
