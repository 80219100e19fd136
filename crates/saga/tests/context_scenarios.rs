//! End-to-end scenarios over the context algebra, as participants would
//! exchange contexts through event payloads.

use std::collections::BTreeSet;

use saga::{SagaContext, SagaCoordinator, SagaError, SagaMetadata, extract_metadata};

/// Simulates a context crossing a service boundary inside an event.
fn over_the_wire(context: &SagaContext) -> SagaContext {
    let json = serde_json::to_string(&SagaMetadata::from(context.clone())).unwrap();
    match serde_json::from_str::<SagaMetadata>(&json).unwrap() {
        SagaMetadata::Named(received) => received,
        SagaMetadata::Reduced(_) => panic!("named context came back reduced"),
    }
}

#[test]
fn diamond_saga_across_services() {
    // order service
    let s1 = SagaCoordinator::launch("fulfilment", "S1");

    // payment and inventory services react in parallel
    let s2 = SagaCoordinator::given(&over_the_wire(&s1))
        .perform_step("fulfilment", "S2")
        .unwrap();
    let s3 = SagaCoordinator::given(&over_the_wire(&s1))
        .perform_step("fulfilment", "S3")
        .unwrap();

    // shipping waits for both
    let s4 = SagaCoordinator::combine([&over_the_wire(&s3), &over_the_wire(&s2)])
        .perform_step("fulfilment", "S4")
        .unwrap();

    let id = |c: &SagaContext| c.get("fulfilment").unwrap().saga_step_id;
    let instance = s1.get("fulfilment").unwrap().saga_instance_id;

    for context in [&s2, &s3, &s4] {
        assert_eq!(context.get("fulfilment").unwrap().saga_instance_id, instance);
    }
    assert_eq!(
        s4.get("fulfilment").unwrap().prev_steps_ids,
        BTreeSet::from([id(&s2), id(&s3)])
    );
}

#[test]
fn waiting_for_branches_through_merge_links_every_branch() {
    let s1 = SagaCoordinator::launch("fulfilment", "S1");
    let s2 = SagaCoordinator::given(&s1)
        .perform_step("fulfilment", "S2")
        .unwrap();
    let s3 = SagaCoordinator::given(&s1)
        .perform_step("fulfilment", "S3")
        .unwrap();

    // the joining service folds arrivals into one stored context
    let arrived = SagaCoordinator::merge([&over_the_wire(&s2), &over_the_wire(&s3)]).unwrap();
    let s4 = SagaCoordinator::given(&over_the_wire(&arrived))
        .perform_step("fulfilment", "S4")
        .unwrap();

    let id = |c: &SagaContext| c.get("fulfilment").unwrap().saga_step_id;
    assert_eq!(
        s4.get("fulfilment").unwrap().prev_steps_ids,
        BTreeSet::from([id(&s2), id(&s3)])
    );
}

#[test]
fn merge_unions_predecessors_of_both_sides() {
    let a = SagaCoordinator::launch("SAGA", "A");
    let b = SagaCoordinator::given(&a).perform_step("SAGA", "B").unwrap();
    let c = SagaCoordinator::given(&a).perform_step("SAGA", "C").unwrap();
    let d = SagaCoordinator::given(&b).perform_step("SAGA", "D").unwrap();

    let merged = SagaCoordinator::merge([&c, &d]).unwrap();
    let expected: BTreeSet<_> = c
        .get("SAGA")
        .unwrap()
        .prev_steps_ids
        .union(&d.get("SAGA").unwrap().prev_steps_ids)
        .copied()
        .collect();

    assert_eq!(merged.get("SAGA").unwrap().prev_steps_ids, expected);
}

#[test]
fn contexts_of_unrelated_instances_never_merge() {
    let first = SagaCoordinator::launch("SAGA", "A");
    let second = SagaCoordinator::launch("SAGA", "A");

    let result = SagaCoordinator::merge([&first, &second]);
    assert!(matches!(result, Err(SagaError::InstanceMismatch { .. })));
}

#[test]
fn reduced_chain_keeps_correlation() {
    let first = SagaCoordinator::launch_reduced();
    let second = first.next();
    let third = second.next();

    assert_eq!(third.correlation_id, first.correlation_id);
    assert_eq!(third.causation_id, Some(second.current_event_id));
}

#[test]
fn extraction_reads_context_from_domain_payload() {
    use common::AggregateId;
    use event_store::{EventEnvelope, Version};

    let context = SagaCoordinator::launch("SAGA", "A");
    let envelope = EventEnvelope::builder()
        .aggregate_id(AggregateId::new())
        .aggregate_type("Order")
        .event_type("OrderPlaced")
        .version(Version::first())
        .payload_raw(serde_json::json!({
            "type": "OrderPlaced",
            "data": { "saga": SagaMetadata::from(context.clone()) }
        }))
        .build()
        .unwrap();

    assert_eq!(
        extract_metadata(&envelope).unwrap(),
        Some(SagaMetadata::Named(context))
    );
}
