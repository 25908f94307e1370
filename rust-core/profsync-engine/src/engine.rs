// SPDX-License-Identifier: PMPL-1.0-or-later
//! The [`Engine`]: construction, producer entry points and queries.
//!
//! Reconciliation lives in `reconciler`, manual resolution in `resolution`
//! and undo in [`crate::undo`]; all of them are methods on `Engine`.

use std::sync::Arc;

use chrono::Utc;
use profsync_audit::{AuditLog, AuditLogEntry};
use profsync_conflict::{Adjudicator, ConflictLedger, ConflictRecord, PolicyEngine};
use profsync_envelope::{AsyncStats, Envelope, OperationRecord};
use profsync_identity::{aggregate, IdentityCache, UnifiedIdentity};
use profsync_profile::{
    CanonicalProfileField, Domain, ProfileError, ProfileStore, ProposedUpdate,
};
use profsync_storage::{InMemoryBackend, StorageBackend};
use prometheus::Registry;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::locks::EntityLocks;
use crate::undo::UndoStore;

/// Operation type recorded for producer updates.
pub const OP_RECONCILE: &str = "reconcile";
pub const OP_MANUAL_CORRECTION: &str = "manual_correction";
pub const OP_MANUAL_RESOLUTION: &str = "manual_resolution";
pub const OP_BULK_RESOLUTION: &str = "bulk_resolution";
pub const OP_UNDO: &str = "undo";

/// The synchronization engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) profiles: ProfileStore,
    pub(crate) audit: AuditLog,
    pub(crate) ledger: ConflictLedger,
    pub(crate) undo_store: UndoStore,
    pub(crate) identities: IdentityCache,
    pub(crate) policy: PolicyEngine,
    pub(crate) envelope: Envelope,
    pub(crate) locks: Arc<EntityLocks>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("envelope", &self.envelope)
            .finish()
    }
}

impl Engine {
    /// Build an engine whose stores all share `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, config: EngineConfig) -> Self {
        info!(backend = backend.name(), "starting profsync engine");
        Self {
            profiles: ProfileStore::new(Arc::clone(&backend)),
            audit: AuditLog::new(Arc::clone(&backend)),
            ledger: ConflictLedger::new(Arc::clone(&backend)),
            undo_store: UndoStore::new(Arc::clone(&backend)),
            identities: IdentityCache::new(Arc::clone(&backend)),
            policy: PolicyEngine::new(config.resolution.clone()),
            envelope: Envelope::new(config.envelope.clone()),
            locks: Arc::new(EntityLocks::new()),
            config: Arc::new(config),
            backend,
        }
    }

    /// An engine over a fresh in-memory backend.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), config)
    }

    /// Consult `adjudicator` for `ai_auto` resolutions.
    pub fn with_adjudicator(mut self, adjudicator: Arc<dyn Adjudicator>) -> Self {
        self.policy = self.policy.with_adjudicator(adjudicator);
        self
    }

    /// Run submitted updates on `handle`. Engines built inside a runtime
    /// use that runtime already.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.envelope = self.envelope.with_runtime(handle);
        self
    }

    /// Register envelope metrics with `registry`.
    pub fn with_prometheus(mut self, registry: &Registry) -> Result<Self, EngineError> {
        self.envelope = self.envelope.with_prometheus(registry)?;
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    // -----------------------------------------------------------------------
    // Producer entry point
    // -----------------------------------------------------------------------

    /// Check an update before it reaches the reconciler. Unknown mappings
    /// pass: the reconciler records and drops them.
    pub(crate) fn precheck(update: &ProposedUpdate) -> Result<(), EngineError> {
        update.validate()?;
        match update.check_schema() {
            Ok(_) | Err(ProfileError::UnknownMapping { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate `update` and reconcile it in the background. Returns the
    /// envelope operation id; reconciliation failures are captured by the
    /// envelope and never reach the producer. Safe to call from threads
    /// outside the runtime.
    #[instrument(skip(self, update), fields(entity_id = %update.entity_id, domain = %update.domain, field = %update.field))]
    pub fn submit_update(&self, update: ProposedUpdate) -> Result<String, EngineError> {
        Self::precheck(&update)?;
        let engine = self.clone();
        let op_id = self
            .envelope
            .spawn_safely(OP_RECONCILE, async move { engine.apply(update).await })?;
        debug!(op_id = %op_id, "update submitted");
        Ok(op_id)
    }

    /// Wait until no envelope operation is in flight.
    pub async fn wait_idle(&self) {
        self.envelope.wait_idle().await;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Pending conflicts, optionally for one entity, severity first then
    /// newest first.
    pub async fn pending_conflicts(
        &self,
        entity_id: Option<&str>,
    ) -> Result<Vec<ConflictRecord>, EngineError> {
        Ok(self.ledger.pending(entity_id).await?)
    }

    pub async fn conflict(&self, conflict_id: &str) -> Result<Option<ConflictRecord>, EngineError> {
        Ok(self.ledger.get(conflict_id).await?)
    }

    /// All conflicts recorded for an entity, pending or resolved.
    pub async fn conflicts_for(&self, entity_id: &str) -> Result<Vec<ConflictRecord>, EngineError> {
        Ok(self.ledger.for_entity(entity_id).await?)
    }

    /// The `limit` most recent audit entries of an entity, newest first.
    pub async fn audit_history(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, EngineError> {
        Ok(self.audit.history(entity_id, limit).await?)
    }

    /// Check the entity's audit hash chain. Returns the entry count.
    pub async fn verify_audit_chain(&self, entity_id: &str) -> Result<u64, EngineError> {
        Ok(self.audit.verify_chain(entity_id).await?)
    }

    pub async fn field(
        &self,
        entity_id: &str,
        domain: Domain,
        field: &str,
    ) -> Result<Option<CanonicalProfileField>, EngineError> {
        Ok(self.profiles.get_field(entity_id, domain, field).await?)
    }

    /// Every canonical field of an entity.
    pub async fn profile(&self, entity_id: &str) -> Result<Vec<CanonicalProfileField>, EngineError> {
        Ok(self.profiles.entity_fields(entity_id).await?)
    }

    /// Entities with at least one canonical field.
    pub async fn entities(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.profiles.entities().await?)
    }

    /// The cached identity if it is fresh, otherwise a recomputed one.
    /// `None` when nothing is known about the entity.
    pub async fn unified_identity(
        &self,
        entity_id: &str,
    ) -> Result<Option<UnifiedIdentity>, EngineError> {
        if let Some(cached) = self.identities.get(entity_id).await? {
            if cached.is_fresh(self.config.identity.max_age_secs, Utc::now()) {
                return Ok(Some(cached));
            }
        }
        let fields = self.profiles.entity_fields(entity_id).await?;
        if fields.is_empty() && self.audit.len(entity_id).await? == 0 {
            return Ok(None);
        }
        let _guard = self.locks.acquire(entity_id).await;
        Ok(Some(self.refresh_identity(entity_id).await?))
    }

    pub fn async_stats(&self) -> AsyncStats {
        self.envelope.stats()
    }

    pub fn failed_operations(&self) -> Vec<OperationRecord> {
        self.envelope.failed_operations()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Recompute and cache the identity. Callers hold the entity lock.
    pub(crate) async fn refresh_identity(
        &self,
        entity_id: &str,
    ) -> Result<UnifiedIdentity, EngineError> {
        let fields = self.profiles.entity_fields(entity_id).await?;
        let recent = self
            .audit
            .history(entity_id, self.config.identity.recent_changes)
            .await?;
        let unresolved_high = self.ledger.unresolved_high(entity_id).await?;
        let identity = aggregate(
            entity_id,
            &fields,
            &recent,
            unresolved_high,
            &self.config.identity,
            Utc::now(),
        );
        self.identities.put(&identity).await?;
        Ok(identity)
    }

    /// Remove an entity's canonical fields and cached identity. Audit,
    /// ledger and undo history are kept. Returns the number of fields
    /// removed.
    #[instrument(skip(self))]
    pub async fn delete_entity(&self, entity_id: &str) -> Result<usize, EngineError> {
        let _guard = self.locks.acquire(entity_id).await;
        let removed = self.profiles.delete_entity(entity_id).await?;
        self.identities.invalidate(entity_id).await?;
        info!(entity_id, removed, "entity deleted");
        Ok(removed)
    }

    /// Flush the shared backend.
    pub async fn flush(&self) -> Result<(), EngineError> {
        Ok(self.backend.flush().await?)
    }
}
