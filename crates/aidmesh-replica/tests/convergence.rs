//! Replica-level convergence properties, observed through Merkle roots.
//!
//! Random batches of events are distributed across replicas which then
//! merge in every order; equal fingerprints must mean equal state.

use aidmesh_replica::{Event, EventCategory, EventDraft, EventOperation, Replica};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn event_strategy() -> impl Strategy<Value = Event> {
    (
        prop::sample::select(vec!["water_level", "injured_count", "road_status"]),
        -100i64..100,
        prop::sample::select(vec!["bridge_north", "shelter_east", "highway_101"]),
        prop::sample::select(vec!["node-1", "node-2", "node-3"]),
        0u64..50_000,
        prop::sample::select(vec![
            EventCategory::Sensor,
            EventCategory::Resource,
            EventCategory::Infrastructure,
            EventCategory::General,
        ]),
        prop::bool::ANY,
    )
        .prop_map(|(event_type, value, location, node, ts, category, decrement)| {
            let draft = EventDraft {
                event_type: event_type.into(),
                value: serde_json::json!(value),
                location: location.into(),
                metadata: BTreeMap::new(),
                category,
                operation: if decrement {
                    EventOperation::Decrement
                } else {
                    EventOperation::Increment
                },
            };
            draft.into_event(node, ts)
        })
}

fn replica_from(node_id: &str, events: &[Event]) -> Replica {
    let mut replica = Replica::new(node_id);
    for event in events {
        replica.apply_event(event);
    }
    replica
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merge_is_commutative_by_root(
        events in prop::collection::vec(event_strategy(), 0..12),
        split in 0usize..12,
    ) {
        let split = split.min(events.len());
        let a = replica_from("node-1", &events[..split]);
        let b = replica_from("node-2", &events[split..]);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        prop_assert_eq!(ab.merkle_root(), ba.merkle_root());
    }

    #[test]
    fn merge_is_associative_by_root(
        events in prop::collection::vec(event_strategy(), 0..12),
    ) {
        let third = events.len() / 3;
        let a = replica_from("node-1", &events[..third]);
        let b = replica_from("node-2", &events[third..2 * third]);
        let c = replica_from("node-3", &events[2 * third..]);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        prop_assert_eq!(left.merkle_root(), right.merkle_root());
    }

    #[test]
    fn merge_is_idempotent_by_root(
        events in prop::collection::vec(event_strategy(), 0..12),
    ) {
        let a = replica_from("node-1", &events);
        let root = a.merkle_root();

        let mut aa = a.clone();
        let report = aa.merge(&a);

        prop_assert!(!report.changed());
        prop_assert_eq!(aa.merkle_root(), root);
    }

    #[test]
    fn equal_roots_mean_equal_event_sets(
        events in prop::collection::vec(event_strategy(), 0..12),
        extra in event_strategy(),
    ) {
        let a = replica_from("node-1", &events);

        let mut with_extra = events.clone();
        with_extra.push(extra);
        let b = replica_from("node-2", &with_extra);

        let ids = |r: &Replica| -> BTreeSet<_> {
            r.events().map(|e| e.event_id).collect()
        };

        if a.merkle_root() == b.merkle_root() {
            prop_assert_eq!(ids(&a), ids(&b));
        } else {
            prop_assert_ne!(ids(&a), ids(&b));
        }
    }

    #[test]
    fn root_ignores_application_order(
        events in prop::collection::vec(event_strategy(), 0..12),
    ) {
        // distinct stamps: register writes at the same millisecond are
        // resolved by arrival order locally, which is exactly what this
        // property must not depend on
        let mut events = events;
        for (i, event) in events.iter_mut().enumerate() {
            event.timestamp = 1_000 + i as u64;
        }

        let forward = replica_from("node-1", &events);

        let mut reversed = events.clone();
        reversed.reverse();
        let backward = replica_from("node-1", &reversed);

        prop_assert_eq!(forward.merkle_root(), backward.merkle_root());
    }
}
