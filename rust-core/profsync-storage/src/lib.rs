// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// ProfSync storage layer.
//
// Every piece of persisted engine state (canonical profile fields, audit log,
// conflict ledger, undo records) lives behind the `StorageBackend` trait. The
// trait offers get / put / delete / prefix scan and no compare-and-swap; all
// mutation safety comes from the engine's per-entity single-writer discipline.
//
// # Modules
//
// - [`backend`] -- the `StorageBackend` trait.
// - [`error`] -- `StorageError`.
// - [`memory`] -- a `BTreeMap` backend for tests and ephemeral engines.
// - [`typed`] -- JSON values under a namespace prefix, sharing one backend.
// - `redb_backend` -- single-file persistent backend (feature `redb-backend`).

pub mod backend;
pub mod error;
pub mod memory;
pub mod typed;

#[cfg(feature = "redb-backend")]
pub mod redb_backend;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::InMemoryBackend;
pub use typed::TypedStore;

#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
