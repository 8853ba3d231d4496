//! Composite replica state and the store that owns it.
//!
//! [`Replica`] is the pure CRDT state: the event OR-Set, counters,
//! registers, and pn-counters, merged field-by-field. [`ReplicaStore`]
//! wraps one replica together with its hash-chain ledger and digest cache
//! behind a single mutex, so a version bump, a ledger append, and a digest
//! invalidation land atomically with respect to every reader.

use crate::digest;
use crate::error::ReplicaError;
use crate::event::{CanonicalValue, Event, EventCategory, EventOperation};
use crate::hash::Hash;
use crate::ledger::{HashChainLog, LogAudit, LogRecord};
use crate::wire::{EventsWire, ReplicaWire};
use crate::EventDraft;
use aidmesh_core::{GCounter, LWWRegister, Lattice, ORSet, PNCounter, Tag};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Counter key holding the fleet-wide event total.
pub const EVENTS_TOTAL_KEY: &str = "events_total";

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a merge changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub new_events: u64,
    pub counter_updates: u64,
    pub register_updates: u64,
    pub pn_counter_updates: u64,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        *self != MergeReport::default()
    }
}

/// Response to a successful ingest.
#[derive(Clone, Debug, Serialize)]
pub struct IngestReceipt {
    pub event: Event,
    pub merkle_root: Hash,
    pub log_seq: u64,
    pub version: u64,
}

/// The semantic state of one node. Pure data: no ledger, no locking.
#[derive(Clone, Debug, PartialEq)]
pub struct Replica {
    node_id: String,
    version: u64,
    events: ORSet<Event>,
    counters: BTreeMap<String, GCounter>,
    registers: BTreeMap<String, LWWRegister<CanonicalValue>>,
    pn_counters: BTreeMap<String, PNCounter>,
}

impl Replica {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            version: 0,
            events: ORSet::new(),
            counters: BTreeMap::new(),
            registers: BTreeMap::new(),
            pn_counters: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Bumped on local mutations only; merges never touch it.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Live events, in tag order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, event)| event)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn contains_event(&self, event_id: &Uuid, node_origin: &str) -> bool {
        self.events
            .adds()
            .contains_key(&Tag::new(event_id.to_string(), node_origin))
    }

    /// Apply one event to the CRDTs: OR-Set add, counters, and the
    /// category-specific payload route. Returns false (and changes
    /// nothing) when the event's tag was already observed.
    pub fn apply_event(&mut self, event: &Event) -> bool {
        let tag = Tag::new(event.event_id.to_string(), &event.node_origin);
        if self.events.adds().contains_key(&tag) {
            return false;
        }
        self.events.add(tag, event.clone());

        self.counters
            .entry(EVENTS_TOTAL_KEY.to_string())
            .or_default()
            .increment(&event.node_origin, 1);
        self.counters
            .entry(format!("event_count:{}", event.event_type))
            .or_default()
            .increment(&event.node_origin, 1);

        match event.category {
            EventCategory::Resource => {
                let amount = event.value.as_i64().unwrap_or(0).max(0) as u64;
                let counter = self
                    .pn_counters
                    .entry(format!(
                        "resource:{}:{}",
                        event.location, event.event_type
                    ))
                    .or_default();
                match event.operation {
                    EventOperation::Increment => counter.increment(&event.node_origin, amount),
                    EventOperation::Decrement => counter.decrement(&event.node_origin, amount),
                }
            }
            EventCategory::Sensor | EventCategory::Infrastructure | EventCategory::General => {
                self.registers
                    .entry(format!("{}:{}", event.event_type, event.location))
                    .or_default()
                    .set(event.value.clone(), event.timestamp, &event.node_origin);
            }
        }

        self.version += 1;
        true
    }

    /// CRDT merge, field by field. Commutative, associative, idempotent.
    pub fn merge(&mut self, other: &Replica) -> MergeReport {
        let mut report = MergeReport::default();

        let before_observed = self.events.adds().len();
        self.events.join_assign(&other.events);
        report.new_events = (self.events.adds().len() - before_observed) as u64;

        for (key, counter) in &other.counters {
            let entry = self.counters.entry(key.clone()).or_default();
            let joined = entry.join(counter);
            if joined != *entry {
                report.counter_updates += 1;
            }
            *entry = joined;
        }

        for (key, register) in &other.registers {
            let entry = self.registers.entry(key.clone()).or_default();
            let joined = entry.join(register);
            if joined != *entry {
                report.register_updates += 1;
            }
            *entry = joined;
        }

        for (key, counter) in &other.pn_counters {
            let entry = self.pn_counters.entry(key.clone()).or_default();
            let joined = entry.join(counter);
            if joined != *entry {
                report.pn_counter_updates += 1;
            }
            *entry = joined;
        }

        report
    }

    /// Fingerprint of the semantic state. Depends only on what the replica
    /// holds, never on how or in what order it got there.
    pub fn merkle_root(&self) -> Hash {
        let mut live: Vec<&Event> = self.events().collect();
        live.sort_by_key(|e| e.event_id);

        let mut leaves = Vec::new();
        for event in live {
            let canonical = serde_json::to_string(event).unwrap_or_default();
            leaves.push(digest::leaf("e", &event.event_id.to_string(), &canonical));
        }
        for (key, counter) in &self.counters {
            let canonical = serde_json::to_string(counter).unwrap_or_default();
            leaves.push(digest::leaf("c", key, &canonical));
        }
        for (key, register) in &self.registers {
            let canonical = serde_json::to_string(register).unwrap_or_default();
            leaves.push(digest::leaf("r", key, &canonical));
        }
        for (key, counter) in &self.pn_counters {
            let canonical = serde_json::to_string(counter).unwrap_or_default();
            leaves.push(digest::leaf("pn", key, &canonical));
        }

        digest::reduce(leaves)
    }

    pub fn to_wire(&self) -> ReplicaWire {
        ReplicaWire {
            node_id: self.node_id.clone(),
            version: self.version,
            events: EventsWire {
                adds: self
                    .events
                    .adds()
                    .iter()
                    .map(|(tag, event)| (tag.clone(), event.clone()))
                    .collect(),
                removes: self.events.removes().iter().cloned().collect(),
            },
            counters: self.counters.clone(),
            registers: self.registers.clone(),
            pn_counters: self.pn_counters.clone(),
            merkle_root: self.merkle_root(),
        }
    }

    pub fn from_wire(wire: ReplicaWire) -> Result<Self, ReplicaError> {
        if wire.node_id.trim().is_empty() {
            return Err(ReplicaError::InvalidReplica("empty node_id".into()));
        }
        for (tag, event) in &wire.events.adds {
            if tag.id != event.event_id.to_string() {
                return Err(ReplicaError::InvalidReplica(format!(
                    "tag {tag} does not match event id {}",
                    event.event_id
                )));
            }
        }

        Ok(Self {
            node_id: wire.node_id,
            version: wire.version,
            events: ORSet::from_parts(
                wire.events.adds.into_iter().collect(),
                wire.events.removes.into_iter().collect(),
            ),
            counters: wire.counters,
            registers: wire.registers,
            pn_counters: wire.pn_counters,
        })
    }
}

struct StoreInner {
    replica: Replica,
    ledger: HashChainLog,
    cached_root: Option<Hash>,
}

impl StoreInner {
    fn root(&mut self) -> Hash {
        match self.cached_root {
            Some(root) => root,
            None => {
                let root = self.replica.merkle_root();
                self.cached_root = Some(root);
                root
            }
        }
    }
}

/// Owns one replica, its ledger, and the digest cache behind one mutex.
pub struct ReplicaStore {
    node_id: String,
    inner: Mutex<StoreInner>,
}

impl ReplicaStore {
    /// A store with a memory-only ledger.
    pub fn in_memory(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            inner: Mutex::new(StoreInner {
                replica: Replica::new(node_id),
                ledger: HashChainLog::in_memory(node_id),
                cached_root: None,
            }),
        }
    }

    /// Open the ledger at `<logs_dir>/<node_id>.log`, replaying
    /// `EVENT_INGESTED` records to rebuild the CRDTs. A broken chain is
    /// fatal here by design: a node must not serve from a forged history.
    pub fn open(node_id: &str, logs_dir: &Path) -> Result<Self, ReplicaError> {
        let ledger = HashChainLog::open(node_id, logs_dir)?;

        let mut replica = Replica::new(node_id);
        let mut replayed = 0usize;
        for record in ledger.records() {
            if record.entry.get("kind").and_then(|k| k.as_str()) != Some("EVENT_INGESTED") {
                continue;
            }
            let event_value = record
                .entry
                .get("event")
                .cloned()
                .ok_or(ReplicaError::LogCorruption { seq: record.seq })?;
            let event: Event = serde_json::from_value(event_value)
                .map_err(|_| ReplicaError::LogCorruption { seq: record.seq })?;
            replica.apply_event(&event);
            replayed += 1;
        }

        if replayed > 0 {
            tracing::info!(node_id, replayed, "ledger replayed");
        }

        Ok(Self {
            node_id: node_id.to_string(),
            inner: Mutex::new(StoreInner {
                replica,
                ledger,
                cached_root: None,
            }),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Validate, stamp, apply, and log one incoming event.
    pub fn ingest_event(&self, draft: EventDraft) -> Result<IngestReceipt, ReplicaError> {
        draft.validate().map_err(ReplicaError::InvalidInput)?;
        let timestamp = now_ms();
        let event = draft.into_event(&self.node_id, timestamp);

        let mut inner = self.inner.lock();
        inner.replica.apply_event(&event);
        let entry = json!({
            "kind": "EVENT_INGESTED",
            "event": serde_json::to_value(&event).map_err(ReplicaError::encoding)?,
        });
        let log_seq = inner.ledger.append(timestamp, entry)?.seq;
        inner.cached_root = None;

        Ok(IngestReceipt {
            merkle_root: inner.root(),
            version: inner.replica.version(),
            log_seq,
            event,
        })
    }

    /// Merge a remote replica. One `MERGE_APPLIED` ledger record per newly
    /// observed event; repeating the same merge is a no-op.
    pub fn merge_wire(&self, wire: ReplicaWire) -> Result<(MergeReport, Hash), ReplicaError> {
        let other = Replica::from_wire(wire)?;
        let from_node = other.node_id().to_string();

        let mut inner = self.inner.lock();
        let fresh: Vec<Uuid> = other
            .events
            .adds()
            .iter()
            .filter(|(tag, _)| !inner.replica.events.adds().contains_key(tag))
            .map(|(_, event)| event.event_id)
            .collect();

        let report = inner.replica.merge(&other);
        if report.changed() {
            inner.cached_root = None;
        }

        let timestamp = now_ms();
        for event_id in fresh {
            inner.ledger.append(
                timestamp,
                json!({
                    "kind": "MERGE_APPLIED",
                    "event_id": event_id.to_string(),
                    "from_node": from_node,
                }),
            )?;
        }

        Ok((report, inner.root()))
    }

    /// Internally consistent snapshot, taken under the store mutex.
    pub fn snapshot(&self) -> ReplicaWire {
        let mut inner = self.inner.lock();
        let root = inner.root();
        let mut wire = inner.replica.to_wire();
        wire.merkle_root = root;
        wire
    }

    pub fn merkle_root(&self) -> Hash {
        self.inner.lock().root()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().replica.version()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().replica.event_count()
    }

    pub fn verify_log(&self) -> LogAudit {
        self.inner.lock().ledger.verify()
    }

    pub fn log_tail(&self, n: usize) -> Vec<LogRecord> {
        self.inner.lock().ledger.tail(n).to_vec()
    }

    /// Records with `seq >= since`, capped at `limit`, oldest first.
    pub fn log_since(&self, since: u64, limit: usize) -> Vec<LogRecord> {
        self.inner
            .lock()
            .ledger
            .records()
            .iter()
            .filter(|r| r.seq >= since)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn log_len(&self) -> usize {
        self.inner.lock().ledger.len()
    }

    pub fn latest_log_hash(&self) -> Hash {
        self.inner.lock().ledger.latest_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(event_type: &str, value: serde_json::Value, location: &str) -> EventDraft {
        EventDraft {
            event_type: event_type.into(),
            value,
            location: location.into(),
            metadata: BTreeMap::new(),
            category: EventCategory::Sensor,
            operation: EventOperation::Increment,
        }
    }

    fn event(event_type: &str, value: serde_json::Value, location: &str, node: &str, ts: u64) -> Event {
        draft(event_type, value, location).into_event(node, ts)
    }

    #[test]
    fn test_apply_event_routes_to_counters_and_register() {
        let mut replica = Replica::new("node-1");
        let e = event("water_level", json!(3.2), "bridge_north", "node-1", 1_000);
        assert!(replica.apply_event(&e));

        assert_eq!(replica.event_count(), 1);
        assert_eq!(replica.counters[EVENTS_TOTAL_KEY].value(), 1);
        assert_eq!(replica.counters["event_count:water_level"].value(), 1);
        let reg = &replica.registers["water_level:bridge_north"];
        assert_eq!(reg.get().unwrap().0, json!(3.2));
        assert_eq!(replica.version(), 1);
    }

    #[test]
    fn test_apply_event_twice_is_a_no_op() {
        let mut replica = Replica::new("node-1");
        let e = event("water_level", json!(3.2), "bridge_north", "node-1", 1_000);
        assert!(replica.apply_event(&e));
        let root = replica.merkle_root();
        let version = replica.version();

        assert!(!replica.apply_event(&e));
        assert_eq!(replica.merkle_root(), root);
        assert_eq!(replica.version(), version);
    }

    #[test]
    fn test_resource_events_drive_the_pn_counter() {
        let mut replica = Replica::new("node-1");
        let mut arrival = draft("shelter_occupancy", json!(12), "shelter_east");
        arrival.category = EventCategory::Resource;
        let mut departure = draft("shelter_occupancy", json!(5), "shelter_east");
        departure.category = EventCategory::Resource;
        departure.operation = EventOperation::Decrement;

        replica.apply_event(&arrival.into_event("node-1", 1_000));
        replica.apply_event(&departure.into_event("node-1", 2_000));

        let net = replica.pn_counters["resource:shelter_east:shelter_occupancy"].value();
        assert_eq!(net, 7);
        // resource events do not publish a reading
        assert!(!replica
            .registers
            .contains_key("shelter_occupancy:shelter_east"));
    }

    #[test]
    fn test_merge_laws_hold_by_merkle_root() {
        let mut a = Replica::new("node-1");
        a.apply_event(&event("water_level", json!(3.2), "bridge_north", "node-1", 1_000));
        let mut b = Replica::new("node-2");
        b.apply_event(&event("injured_count", json!(14), "shelter_east", "node-2", 1_100));
        let mut c = Replica::new("node-3");
        c.apply_event(&event("road_status", json!("blocked"), "highway_101", "node-3", 1_200));

        // commutativity
        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab.merkle_root(), ba.merkle_root());

        // associativity
        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);
        assert_eq!(left.merkle_root(), right.merkle_root());

        // idempotence
        let mut aa = a.clone();
        let report = aa.merge(&a);
        assert!(!report.changed());
        assert_eq!(aa.merkle_root(), a.merkle_root());
    }

    #[test]
    fn test_merkle_root_ignores_ingestion_order() {
        let e1 = event("water_level", json!(3.2), "bridge_north", "node-1", 1_000);
        let e2 = event("road_status", json!("blocked"), "highway_101", "node-1", 2_000);

        let mut forward = Replica::new("node-1");
        forward.apply_event(&e1);
        forward.apply_event(&e2);

        let mut backward = Replica::new("node-1");
        backward.apply_event(&e2);
        backward.apply_event(&e1);

        assert_eq!(forward.merkle_root(), backward.merkle_root());
    }

    #[test]
    fn test_lww_tie_breaks_on_greater_node_id() {
        let mut a = Replica::new("node-1");
        a.apply_event(&event("water_level", json!(1.0), "bridge_north", "node-1", 5_000));
        let mut b = Replica::new("node-2");
        b.apply_event(&event("water_level", json!(2.0), "bridge_north", "node-2", 5_000));

        let mut merged_a = a.clone();
        merged_a.merge(&b);
        let mut merged_b = b.clone();
        merged_b.merge(&a);

        let winner = merged_a.registers["water_level:bridge_north"].get().unwrap();
        assert_eq!(winner.0, json!(2.0));
        assert_eq!(merged_a.merkle_root(), merged_b.merkle_root());
    }

    #[test]
    fn test_merge_report_counts_changes() {
        let mut a = Replica::new("node-1");
        a.apply_event(&event("water_level", json!(3.2), "bridge_north", "node-1", 1_000));
        let mut b = Replica::new("node-2");
        b.apply_event(&event("injured_count", json!(14), "shelter_east", "node-2", 1_100));

        let report = a.merge(&b);
        assert_eq!(report.new_events, 1);
        // events_total changed and event_count:injured_count appeared
        assert_eq!(report.counter_updates, 2);
        assert_eq!(report.register_updates, 1);
    }

    #[test]
    fn test_merge_does_not_bump_version() {
        let mut a = Replica::new("node-1");
        a.apply_event(&event("water_level", json!(3.2), "bridge_north", "node-1", 1_000));
        let mut b = Replica::new("node-2");
        b.apply_event(&event("injured_count", json!(14), "shelter_east", "node-2", 1_100));

        let version = a.version();
        a.merge(&b);
        assert_eq!(a.version(), version);
    }

    #[test]
    fn test_store_ingest_appends_to_ledger() {
        let store = ReplicaStore::in_memory("node-1");
        let receipt = store
            .ingest_event(draft("water_level", json!(3.2), "bridge_north"))
            .unwrap();

        assert_eq!(receipt.log_seq, 1);
        assert_eq!(receipt.version, 1);
        assert_eq!(store.merkle_root(), receipt.merkle_root);
        assert!(store.verify_log().valid);

        let tail = store.log_tail(1);
        assert_eq!(tail[0].entry["kind"], "EVENT_INGESTED");
    }

    #[test]
    fn test_store_rejects_invalid_draft() {
        let store = ReplicaStore::in_memory("node-1");
        let mut bad = draft("", json!(1), "bridge_north");
        bad.event_type = String::new();

        let err = store.ingest_event(bad).unwrap_err();
        assert!(matches!(err, ReplicaError::InvalidInput(_)));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_store_merge_logs_new_events_once() {
        let node1 = ReplicaStore::in_memory("node-1");
        let node2 = ReplicaStore::in_memory("node-2");
        node2
            .ingest_event(draft("injured_count", json!(14), "shelter_east"))
            .unwrap();

        let (report, root) = node1.merge_wire(node2.snapshot()).unwrap();
        assert_eq!(report.new_events, 1);
        assert_eq!(root, node2.merkle_root());

        let merge_records = node1
            .log_tail(10)
            .iter()
            .filter(|r| r.entry["kind"] == "MERGE_APPLIED")
            .count();
        assert_eq!(merge_records, 1);

        // idempotent: merging again changes nothing and logs nothing
        let (report, _) = node1.merge_wire(node2.snapshot()).unwrap();
        assert!(!report.changed());
        let merge_records_after = node1
            .log_tail(10)
            .iter()
            .filter(|r| r.entry["kind"] == "MERGE_APPLIED")
            .count();
        assert_eq!(merge_records_after, 1);
    }

    #[test]
    fn test_store_merge_rejects_malformed_wire() {
        let node1 = ReplicaStore::in_memory("node-1");
        let mut wire = ReplicaStore::in_memory("node-2").snapshot();
        wire.node_id = "   ".into();

        let err = node1.merge_wire(wire).unwrap_err();
        assert!(matches!(err, ReplicaError::InvalidReplica(_)));
    }

    #[test]
    fn test_store_reopen_replays_ingested_events() {
        let dir = tempfile::tempdir().unwrap();

        let root = {
            let store = ReplicaStore::open("node-1", dir.path()).unwrap();
            store
                .ingest_event(draft("water_level", json!(3.2), "bridge_north"))
                .unwrap();
            store
                .ingest_event(draft("road_status", json!("blocked"), "highway_101"))
                .unwrap();
            store.merkle_root()
        };

        let reopened = ReplicaStore::open("node-1", dir.path()).unwrap();
        assert_eq!(reopened.event_count(), 2);
        assert_eq!(reopened.merkle_root(), root);
        assert!(reopened.verify_log().valid);
    }

    #[test]
    fn test_snapshot_round_trips_through_wire() {
        let store = ReplicaStore::in_memory("node-1");
        store
            .ingest_event(draft("water_level", json!(3.2), "bridge_north"))
            .unwrap();

        let other = Replica::from_wire(store.snapshot()).unwrap();
        assert_eq!(other.merkle_root(), store.merkle_root());
    }
}
