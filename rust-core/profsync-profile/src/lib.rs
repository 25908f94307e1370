// SPDX-License-Identifier: PMPL-1.0-or-later
//! ProfSync profile model
//!
//! The vocabulary every other ProfSync crate speaks:
//!
//! - [`model`]: entity ids, domains, sources, actors, field values and the
//!   [`ProposedUpdate`] that producers submit.
//! - [`schema`]: the closed `Domain -> FieldSpec` table. A field that is not
//!   listed here cannot be stored.
//! - [`store`]: [`ProfileStore`], the canonical per-entity field table with
//!   a per-field version counter.

pub mod error;
pub mod model;
pub mod schema;
pub mod store;

pub use error::ProfileError;
pub use model::{
    Actor, ActorKind, CanonicalProfileField, Domain, EntityId, FieldValue, ProposedUpdate, Source,
};
pub use schema::{FieldKind, FieldSpec, Role};
pub use store::ProfileStore;
