//! Property-based lattice law suites for every CRDT shipped by this crate.

use aidmesh_core::{GCounter, LWWRegister, Lattice, ORSet, PNCounter, Tag};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn gcounter_strategy() -> impl Strategy<Value = GCounter> {
    prop::collection::btree_map("node-[0-9]", 0u64..1000, 0..6).prop_map(|entries| {
        let mut counter = GCounter::new();
        for (node, v) in entries {
            counter.increment(&node, v);
        }
        counter
    })
}

fn pncounter_strategy() -> impl Strategy<Value = PNCounter> {
    (
        prop::collection::btree_map("node-[0-9]", 0u64..1000, 0..5),
        prop::collection::btree_map("node-[0-9]", 0u64..1000, 0..5),
    )
        .prop_map(|(ups, downs): (BTreeMap<String, u64>, BTreeMap<String, u64>)| {
            let mut counter = PNCounter::new();
            for (node, v) in ups {
                counter.increment(&node, v);
            }
            for (node, v) in downs {
                counter.decrement(&node, v);
            }
            counter
        })
}

fn lwwreg_strategy() -> impl Strategy<Value = LWWRegister<i64>> {
    prop::option::of((any::<i64>(), 0u64..10_000, "node-[0-9]")).prop_map(|write| {
        let mut reg = LWWRegister::new();
        if let Some((value, ts, node)) = write {
            reg.set(value, ts, &node);
        }
        reg
    })
}

fn orset_strategy() -> impl Strategy<Value = ORSet<String>> {
    // elements are a function of the tag id, matching the real system where
    // a tag embeds the id of the element it carries
    (
        prop::collection::btree_set(("e[0-9]{2}", "node-[0-9]"), 0..8),
        prop::collection::btree_set(("e[0-9]{2}", "node-[0-9]"), 0..4),
    )
        .prop_map(|(added, removed)| {
            let mut set = ORSet::new();
            for (id, node) in added {
                let element = format!("hazard-{id}");
                set.add(Tag::new(id, node), element);
            }
            for (id, node) in removed {
                set.remove_tag(&Tag::new(id, node));
            }
            set
        })
}

macro_rules! lattice_property_tests {
    ($name:ident, $crdt_type:ty, $strategy:expr) => {
        mod $name {
            use super::*;

            proptest! {
                #[test]
                fn join_is_commutative(a in $strategy, b in $strategy) {
                    prop_assert_eq!(a.join(&b), b.join(&a));
                }

                #[test]
                fn join_is_associative(
                    a in $strategy,
                    b in $strategy,
                    c in $strategy
                ) {
                    let left = a.join(&b).join(&c);
                    let right = a.join(&b.join(&c));
                    prop_assert_eq!(left, right);
                }

                #[test]
                fn join_is_idempotent(a in $strategy) {
                    prop_assert_eq!(a.join(&a), a);
                }

                #[test]
                fn bottom_is_identity(a in $strategy) {
                    let bottom = <$crdt_type>::bottom();
                    prop_assert_eq!(a.join(&bottom), a.clone());
                    prop_assert_eq!(bottom.join(&a), a);
                }
            }
        }
    };
}

lattice_property_tests!(gcounter_laws, GCounter, gcounter_strategy());
lattice_property_tests!(pncounter_laws, PNCounter, pncounter_strategy());
lattice_property_tests!(lwwreg_laws, LWWRegister<i64>, lwwreg_strategy());
lattice_property_tests!(orset_laws, ORSet<String>, orset_strategy());
