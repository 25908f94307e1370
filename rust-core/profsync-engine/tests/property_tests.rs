// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the reconciliation pipeline

use proptest::prelude::*;
use profsync_conflict::ResolutionMethod;
use profsync_engine::{ApplyStatus, Engine, EngineConfig};
use profsync_profile::{Actor, Domain, FieldValue, ProposedUpdate, Source};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Exam averages from AI producers with arbitrary confidence.
fn arb_exam() -> impl Strategy<Value = (f64, Option<u8>)> {
    ((0u32..=100).prop_map(f64::from), prop::option::of(0u8..=100))
}

fn exam(value: f64, confidence: Option<u8>) -> ProposedUpdate {
    let mut update = ProposedUpdate::new(
        "S1",
        Source::ExamImport,
        Domain::Academic,
        "examAverage",
        value,
        Actor::ai("importer"),
    );
    update.confidence = confidence;
    update
}

fn risk(value: f64) -> ProposedUpdate {
    ProposedUpdate::new(
        "S1",
        Source::Incident,
        Domain::RiskFactors,
        "dropoutRisk",
        value,
        Actor::ai("risk-model"),
    )
    .with_confidence(60)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_non_sensitive_ai_conflicts_always_resolve(
        updates in prop::collection::vec(arb_exam(), 1..12)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = Engine::in_memory(EngineConfig::default());
            for (value, confidence) in &updates {
                let outcome = engine.apply(exam(*value, *confidence)).await.unwrap();
                prop_assert_eq!(outcome.status, ApplyStatus::Applied);
            }

            prop_assert!(engine.pending_conflicts(None).await.unwrap().is_empty());
            for record in engine.conflicts_for("S1").await.unwrap() {
                prop_assert!(record.resolution_method.is_terminal());
                prop_assert!(record.resolved_value.is_some());
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_every_applied_update_is_audited(
        updates in prop::collection::vec(arb_exam(), 1..12)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = Engine::in_memory(EngineConfig::default());
            for (value, confidence) in &updates {
                engine.apply(exam(*value, *confidence)).await.unwrap();
            }

            let verified = engine.verify_audit_chain("S1").await.unwrap();
            prop_assert_eq!(verified, updates.len() as u64);

            // The canonical value is the latest audited outcome.
            let field = engine
                .field("S1", Domain::Academic, "examAverage")
                .await
                .unwrap()
                .unwrap();
            let latest = &engine.audit_history("S1", 1).await.unwrap()[0];
            prop_assert_eq!(Some(field.value), latest.content.new_value.clone());
            Ok(())
        })?;
    }

    #[test]
    fn test_large_risk_swings_are_parked(
        first in 0u32..=30,
        second in 70u32..=100,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = Engine::in_memory(EngineConfig::default());
            engine.apply(risk(f64::from(first))).await.unwrap();
            let outcome = engine.apply(risk(f64::from(second))).await.unwrap();

            prop_assert_eq!(outcome.status, ApplyStatus::Pending);
            prop_assert_eq!(outcome.method, Some(ResolutionMethod::Pending));
            let field = engine
                .field("S1", Domain::RiskFactors, "dropoutRisk")
                .await
                .unwrap()
                .unwrap();
            prop_assert_eq!(field.value, FieldValue::Number(f64::from(first)));
            Ok(())
        })?;
    }
}
