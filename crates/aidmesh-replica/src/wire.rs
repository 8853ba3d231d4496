//! Canonical transport form of a replica.
//!
//! This is the JSON every surface exchanges: `GET /state/snapshot`, the
//! gossip STATE payload, and the gateway's consolidated view. Key order is
//! fixed by field order here plus sorted maps, so the same semantic state
//! always serializes to the same bytes.

use crate::event::{CanonicalValue, Event};
use crate::hash::Hash;
use aidmesh_core::{GCounter, LWWRegister, PNCounter, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two halves of the event OR-Set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsWire {
    /// Every observed add as `[tag, event]` pairs, tag-sorted.
    pub adds: Vec<(Tag, Event)>,
    /// Tombstoned tags.
    pub removes: Vec<Tag>,
}

/// A full replica on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicaWire {
    pub node_id: String,
    pub version: u64,
    pub events: EventsWire,
    pub counters: BTreeMap<String, GCounter>,
    pub registers: BTreeMap<String, LWWRegister<CanonicalValue>>,
    #[serde(default)]
    pub pn_counters: BTreeMap<String, PNCounter>,
    pub merkle_root: Hash,
}

impl ReplicaWire {
    /// Rough payload size, used by gossip to decide on fragmentation.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
