// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for conflict detection and resolution

use proptest::prelude::*;
use profsync_conflict::{
    detect, ConflictRecord, Decision, PolicyEngine, PolicyHint, ResolutionConfig,
    ResolutionMethod, Severity, SeverityTable,
};
use profsync_profile::{Actor, CanonicalProfileField, Domain, FieldValue, ProposedUpdate, Source};

fn arb_domain() -> impl Strategy<Value = Domain> {
    prop::sample::select(Domain::ALL.to_vec())
}

fn arb_actor() -> impl Strategy<Value = Actor> {
    prop_oneof![
        "[a-z]{3,8}".prop_map(Actor::ai),
        "[a-z]{3,8}".prop_map(Actor::human),
    ]
}

fn arb_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        (0.0f64..100.0).prop_map(FieldValue::Number),
        any::<bool>().prop_map(FieldValue::Boolean),
        "[a-z]{1,6}".prop_map(FieldValue::Text),
        prop::collection::vec("[A-Z][a-z]{2,6}", 0..4).prop_map(FieldValue::list),
    ]
}

fn canonical(
    domain: Domain,
    value: FieldValue,
    confidence: Option<u8>,
    actor: Actor,
) -> CanonicalProfileField {
    let field = domain.fields()[0].name;
    let mut update = ProposedUpdate::new("S1", Source::Session, domain, field, value.clone(), actor);
    update.confidence = confidence;
    let mut record = CanonicalProfileField::from_update(&update, value);
    record.version = 1;
    record
}

fn proposal(
    domain: Domain,
    value: FieldValue,
    confidence: Option<u8>,
    actor: Actor,
) -> ProposedUpdate {
    let field = domain.fields()[0].name;
    let mut update = ProposedUpdate::new("S1", Source::Survey, domain, field, value, actor);
    update.confidence = confidence;
    update
}

proptest! {
    #[test]
    fn test_equal_values_never_conflict(
        domain in arb_domain(),
        value in arb_value(),
        c1 in prop::option::of(0u8..=100),
        c2 in prop::option::of(0u8..=100),
        a1 in arb_actor(),
        a2 in arb_actor()
    ) {
        let cur = canonical(domain, value.clone(), c1, a1);
        let prop_update = proposal(domain, value, c2, a2);
        prop_assert_eq!(detect(&SeverityTable::default(), Some(&cur), &prop_update), Decision::NoConflict);
    }

    #[test]
    fn test_high_only_in_sensitive_domains(
        domain in arb_domain(),
        old in arb_value(),
        new in arb_value(),
        c1 in prop::option::of(0u8..=100),
        c2 in prop::option::of(0u8..=100),
        a1 in arb_actor(),
        a2 in arb_actor()
    ) {
        let cur = canonical(domain, old.clone(), c1, a1);
        let prop_update = proposal(domain, new.clone(), c2, a2);
        let table = SeverityTable::default();
        let decision = detect(&table, Some(&cur), &prop_update);
        if old == new {
            prop_assert_eq!(decision, Decision::NoConflict);
        } else if decision == Decision::Conflict(Severity::High) {
            prop_assert!(table.is_sensitive(domain));
        } else {
            prop_assert!(decision.severity().is_some());
        }
    }

    #[test]
    fn test_resolution_is_always_terminal(
        domain in arb_domain(),
        old in arb_value(),
        new in arb_value(),
        c1 in prop::option::of(0u8..=100),
        c2 in prop::option::of(0u8..=100),
        a1 in arb_actor(),
        a2 in arb_actor()
    ) {
        prop_assume!(old != new);
        let cur = canonical(domain, old.clone(), c1, a1);
        let prop_update = proposal(domain, new.clone(), c2, a2);
        let severity = detect(&SeverityTable::default(), Some(&cur), &prop_update)
            .severity()
            .unwrap();
        let record = ConflictRecord::pending(&cur, &prop_update, severity);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let resolution = runtime.block_on(async {
            PolicyEngine::new(ResolutionConfig::default())
                .resolve(&record, &PolicyHint::default())
                .await
        });

        prop_assert!(resolution.method.is_terminal());
        prop_assert!(resolution.method != ResolutionMethod::Manual);
        prop_assert!(resolution.value == old || resolution.value == new);
    }
}
