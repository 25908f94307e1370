// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//!
//! Async execution envelope.
//!
//! Producer-triggered work runs inside the envelope so that its failures and
//! latency never reach the producer. Each operation moves through
//! `started -> succeeded | failed`; finished operations are kept in a bounded
//! ring buffer and folded into running totals.
//!
//! - [`Envelope::track`] records the operation and hands its error back.
//! - [`Envelope::execute_safely`] records the operation, reports a failure to
//!   the `on_error` callback and returns `None`.
//! - [`Envelope::spawn_safely`] does the same on a tokio task and returns the
//!   operation id immediately.
//!
//! Panics inside a wrapped future are captured as failures. A wrapped future
//! dropped before completion is recorded as a `cancelled` failure.

mod metrics;

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::metrics::EnvelopeMetrics;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("metrics registration failed: {0}")]
    Metrics(String),

    #[error("no tokio runtime available to run background operations")]
    NoRuntime,
}

// ---------------------------------------------------------------------------
// Configuration and records
// ---------------------------------------------------------------------------

/// Configuration for the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Finished operations kept for inspection.
    /// Default: 1000.
    pub history_size: usize,

    /// Operations slower than this (milliseconds) are logged at `warn`.
    /// Default: 1000ms.
    pub slow_threshold_ms: u64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            history_size: 1000,
            slow_threshold_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Started,
    Succeeded,
    Failed,
}

/// One tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub op_type: String,
    pub state: OperationState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub error: Option<String>,
}

/// Per-operation-type counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub active_count: usize,
    pub success_count: u64,
    pub error_count: u64,
    pub average_duration_ms: f64,
}

/// Envelope-wide counters since start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncStats {
    pub active_count: usize,
    pub success_count: u64,
    pub error_count: u64,
    /// Mean duration of finished operations, in milliseconds.
    pub average_duration_ms: f64,
    pub by_type: BTreeMap<String, TypeStats>,
}

#[derive(Debug, Default)]
struct Totals {
    success: u64,
    error: u64,
    total_ms: f64,
}

impl Totals {
    fn add(&mut self, succeeded: bool, duration_ms: f64) {
        if succeeded {
            self.success += 1;
        } else {
            self.error += 1;
        }
        self.total_ms += duration_ms;
    }

    fn average(&self) -> f64 {
        let n = self.success + self.error;
        if n == 0 {
            0.0
        } else {
            self.total_ms / n as f64
        }
    }
}

#[derive(Debug, Default)]
struct State {
    active: HashMap<String, OperationRecord>,
    history: VecDeque<OperationRecord>,
    totals: Totals,
    by_type: HashMap<String, Totals>,
}

/// An operation in flight. Dropping an unfinished ticket records the
/// operation as cancelled.
struct Ticket {
    envelope: Envelope,
    id: String,
    op_type: String,
    started: Instant,
    finished: bool,
}

impl Ticket {
    fn finish(mut self, error: Option<String>) {
        self.finished = true;
        self.envelope.finish(&self, error);
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            warn!(op_id = %self.id, op_type = %self.op_type, "operation dropped before completion");
            self.envelope.finish(&*self, Some(CANCELLED.to_string()));
        }
    }
}

/// Error recorded for operations whose future was dropped.
pub const CANCELLED: &str = "cancelled";

enum Outcome<T, E> {
    Ok(T),
    Err(E),
    Panicked(Box<dyn Any + Send>),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Tracks and isolates asynchronous operations. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct Envelope {
    config: Arc<EnvelopeConfig>,
    state: Arc<Mutex<State>>,
    idle: Arc<Notify>,
    metrics: Option<EnvelopeMetrics>,
    runtime: Option<Handle>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new(EnvelopeConfig::default())
    }
}

impl Envelope {
    /// Build an envelope. Background operations run on the runtime current
    /// at construction, if any; see [`Envelope::with_runtime`].
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(State::default())),
            idle: Arc::new(Notify::new()),
            metrics: None,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Run background operations on `handle`, whatever thread submits them.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Register Prometheus metrics
    pub fn with_prometheus(mut self, registry: &Registry) -> Result<Self, EnvelopeError> {
        self.metrics = Some(EnvelopeMetrics::register(registry)?);
        Ok(self)
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, op_type: &str) -> Ticket {
        let ticket = Ticket {
            envelope: self.clone(),
            id: Uuid::new_v4().to_string(),
            op_type: op_type.to_string(),
            started: Instant::now(),
            finished: false,
        };
        let record = OperationRecord {
            id: ticket.id.clone(),
            op_type: ticket.op_type.clone(),
            state: OperationState::Started,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            error: None,
        };
        self.lock().active.insert(ticket.id.clone(), record);
        if let Some(m) = &self.metrics {
            m.started();
        }
        debug!(op_id = %ticket.id, op_type, "operation started");
        ticket
    }

    fn finish(&self, ticket: &Ticket, error: Option<String>) {
        let duration_ms = ticket.started.elapsed().as_secs_f64() * 1000.0;
        let succeeded = error.is_none();

        let idle = {
            let mut state = self.lock();
            let mut record = state.active.remove(&ticket.id).unwrap_or_else(|| OperationRecord {
                id: ticket.id.clone(),
                op_type: ticket.op_type.clone(),
                state: OperationState::Started,
                started_at: Utc::now(),
                finished_at: None,
                duration_ms: None,
                error: None,
            });
            record.state = if succeeded {
                OperationState::Succeeded
            } else {
                OperationState::Failed
            };
            record.finished_at = Some(Utc::now());
            record.duration_ms = Some(duration_ms);
            record.error = error;

            state.totals.add(succeeded, duration_ms);
            state
                .by_type
                .entry(ticket.op_type.clone())
                .or_default()
                .add(succeeded, duration_ms);

            if self.config.history_size > 0 {
                while state.history.len() >= self.config.history_size {
                    state.history.pop_front();
                }
                state.history.push_back(record.clone());
            }

            if let Some(err) = &record.error {
                error!(op_id = %record.id, op_type = %record.op_type, error = %err, "operation failed");
            } else if duration_ms > self.config.slow_threshold_ms as f64 {
                warn!(op_id = %record.id, op_type = %record.op_type, duration_ms, "slow operation");
            } else {
                debug!(op_id = %record.id, op_type = %record.op_type, duration_ms, "operation succeeded");
            }
            state.active.is_empty()
        };

        if let Some(m) = &self.metrics {
            m.finished(&ticket.op_type, succeeded, duration_ms / 1000.0);
        }
        if idle {
            self.idle.notify_waiters();
        }
    }

    async fn run<T, E, F>(&self, ticket: Ticket, fut: F) -> Outcome<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => {
                ticket.finish(None);
                Outcome::Ok(value)
            }
            Ok(Err(err)) => {
                ticket.finish(Some(err.to_string()));
                Outcome::Err(err)
            }
            Err(payload) => {
                ticket.finish(Some(panic_message(payload.as_ref())));
                Outcome::Panicked(payload)
            }
        }
    }

    /// Run `fut` as a tracked operation and return its result. A panic is
    /// recorded as a failure and then resumed.
    pub async fn track<T, E, F>(&self, op_type: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let ticket = self.begin(op_type);
        match self.run(ticket, fut).await {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(err) => Err(err),
            Outcome::Panicked(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Run `fut` as a tracked operation. Failures (errors and panics) are
    /// passed to `on_error` and never propagate; the result is then `None`.
    pub async fn execute_safely<T, E, F, H>(&self, op_type: &str, fut: F, on_error: H) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
        H: FnOnce(&str),
    {
        let ticket = self.begin(op_type);
        match self.run(ticket, fut).await {
            Outcome::Ok(value) => Some(value),
            Outcome::Err(err) => {
                on_error(&err.to_string());
                None
            }
            Outcome::Panicked(payload) => {
                on_error(&panic_message(payload.as_ref()));
                None
            }
        }
    }

    /// Start `fut` on the tokio runtime as a tracked operation and return
    /// its id. The operation is visible in [`Envelope::in_flight`] before
    /// this returns.
    ///
    /// Callable from any thread. Without a runtime from construction or the
    /// calling context the operation is not started and `NoRuntime` is
    /// returned.
    pub fn spawn_safely<T, E, F>(&self, op_type: &str, fut: F) -> Result<String, EnvelopeError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let handle = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| EnvelopeError::NoRuntime)?,
        };
        let ticket = self.begin(op_type);
        let id = ticket.id.clone();
        let envelope = self.clone();
        handle.spawn(async move {
            let _ = envelope.run(ticket, fut).await;
        });
        Ok(id)
    }

    /// Operations started but not yet finished.
    pub fn in_flight(&self) -> Vec<OperationRecord> {
        let mut ops: Vec<_> = self.lock().active.values().cloned().collect();
        ops.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        ops
    }

    /// Up to `limit` finished operations, newest first.
    pub fn recent_operations(&self, limit: usize) -> Vec<OperationRecord> {
        self.lock().history.iter().rev().take(limit).cloned().collect()
    }

    /// Failed operations still in the ring buffer, newest first.
    pub fn failed_operations(&self) -> Vec<OperationRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|r| r.state == OperationState::Failed)
            .cloned()
            .collect()
    }

    /// A finished or in-flight operation by id.
    pub fn operation(&self, id: &str) -> Option<OperationRecord> {
        let state = self.lock();
        state
            .active
            .get(id)
            .or_else(|| state.history.iter().rev().find(|r| r.id == id))
            .cloned()
    }

    pub fn stats(&self) -> AsyncStats {
        let state = self.lock();
        let mut by_type: BTreeMap<String, TypeStats> = state
            .by_type
            .iter()
            .map(|(op_type, totals)| {
                (
                    op_type.clone(),
                    TypeStats {
                        active_count: 0,
                        success_count: totals.success,
                        error_count: totals.error,
                        average_duration_ms: totals.average(),
                    },
                )
            })
            .collect();
        for record in state.active.values() {
            by_type.entry(record.op_type.clone()).or_default().active_count += 1;
        }

        AsyncStats {
            active_count: state.active.len(),
            success_count: state.totals.success,
            error_count: state.totals.error,
            average_duration_ms: state.totals.average(),
            by_type,
        }
    }

    /// Resolve once no operation is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.lock().active.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
