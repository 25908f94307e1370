// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the audit chain

use std::sync::Arc;

use proptest::prelude::*;
use profsync_audit::{genesis_hash, AuditAction, AuditDraft, AuditLog, ProcessedBy};
use profsync_profile::{Domain, FieldValue, Source};
use profsync_storage::InMemoryBackend;

fn arb_entity_id() -> impl Strategy<Value = String> {
    "[A-Z][0-9]{1,4}"
}

fn arb_scores() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..100.0, 1..20)
}

fn draft(entity: &str, score: f64) -> AuditDraft {
    let mut d = AuditDraft::new(
        entity,
        Source::Survey,
        "survey-1",
        Domain::Motivation,
        "engagementLevel",
        AuditAction::Updated,
        "ai:survey-reader",
        ProcessedBy::Ai,
    );
    d.new_value = Some(FieldValue::Number(score));
    d
}

proptest! {
    #[test]
    fn test_any_append_sequence_verifies(
        entity_id in arb_entity_id(),
        scores in arb_scores()
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let log = AuditLog::new(Arc::new(InMemoryBackend::new()));
            for score in &scores {
                log.append(draft(&entity_id, *score)).await.unwrap();
            }

            let verified = log.verify_chain(&entity_id).await.unwrap();
            prop_assert_eq!(verified, scores.len() as u64);

            let oldest_first = log.entries(&entity_id).await.unwrap();
            prop_assert_eq!(&oldest_first[0].parent_hash, &genesis_hash());
            for pair in oldest_first.windows(2) {
                prop_assert_eq!(&pair[1].parent_hash, &pair[0].content_hash);
            }

            Ok(())
        })?;
    }

    #[test]
    fn test_history_matches_reverse_append_order(
        entity_id in arb_entity_id(),
        scores in arb_scores(),
        limit in 1usize..25
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let log = AuditLog::new(Arc::new(InMemoryBackend::new()));
            for score in &scores {
                log.append(draft(&entity_id, *score)).await.unwrap();
            }

            let history = log.history(&entity_id, limit).await.unwrap();
            prop_assert_eq!(history.len(), limit.min(scores.len()));
            for (i, entry) in history.iter().enumerate() {
                let expected = scores[scores.len() - 1 - i];
                prop_assert_eq!(entry.content.new_value.clone(), Some(FieldValue::Number(expected)));
            }

            Ok(())
        })?;
    }
}
