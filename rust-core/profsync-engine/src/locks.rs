// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Per-entity single-writer locks.
//
// One async mutex per entity id, created on demand. The table itself is a
// short-lived std mutex that is never held across an await. Idle entries
// are pruned once the table grows past `PRUNE_ABOVE`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

const PRUNE_ABOVE: usize = 1024;

/// Held while an entity is being mutated. Dropping it releases the entity.
#[derive(Debug)]
pub struct EntityGuard {
    entity_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl EntityGuard {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

#[derive(Debug, Default)]
pub struct EntityLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id`.
    pub async fn acquire(&self, entity_id: &str) -> EntityGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            if table.len() > PRUNE_ABOVE {
                table.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(
                table
                    .entry(entity_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = slot.lock_owned().await;
        trace!(entity_id, "entity lock acquired");
        EntityGuard {
            entity_id: entity_id.to_string(),
            _guard: guard,
        }
    }

    /// Entities with a lock slot (held or idle).
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
