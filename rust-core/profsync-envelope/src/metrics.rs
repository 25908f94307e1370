// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// Prometheus instruments for the envelope.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

use crate::EnvelopeError;

#[derive(Clone)]
pub(crate) struct EnvelopeMetrics {
    operations: IntCounterVec,
    active: IntGauge,
    duration: HistogramVec,
}

impl EnvelopeMetrics {
    pub(crate) fn register(registry: &Registry) -> Result<Self, EnvelopeError> {
        let operations = IntCounterVec::new(
            Opts::new(
                "profsync_envelope_operations_total",
                "Finished envelope operations by type and outcome",
            ),
            &["op_type", "outcome"],
        )
        .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(operations.clone()))
            .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;

        let active = IntGauge::new(
            "profsync_envelope_active_operations",
            "Envelope operations started but not finished",
        )
        .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(active.clone()))
            .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "profsync_envelope_duration_seconds",
                "Envelope operation duration",
            ),
            &["op_type"],
        )
        .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(|e| EnvelopeError::Metrics(e.to_string()))?;

        Ok(Self {
            operations,
            active,
            duration,
        })
    }

    pub(crate) fn started(&self) {
        self.active.inc();
    }

    pub(crate) fn finished(&self, op_type: &str, succeeded: bool, seconds: f64) {
        self.active.dec();
        let outcome = if succeeded { "succeeded" } else { "failed" };
        self.operations.with_label_values(&[op_type, outcome]).inc();
        self.duration.with_label_values(&[op_type]).observe(seconds);
    }
}
