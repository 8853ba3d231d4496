//! UDP gossip: periodic digest broadcast, pull on mismatch, fragmented
//! state transfer.
//!
//! One cooperative task per node interleaves a jittered broadcast tick
//! with inbound datagram handling. There are no acks and no retries: a
//! lost exchange is repaired by the next tick, and duplicate state is
//! harmless because the merge is idempotent.

use aidmesh_replica::{Hash, ReplicaStore, ReplicaWire};
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use uuid::Uuid;

/// Hard ceiling for one datagram.
pub const MAX_DATAGRAM: usize = 8 * 1024;
/// Raw snapshot bytes per fragment; base64 expansion plus the JSON
/// envelope must stay under [`MAX_DATAGRAM`].
const FRAGMENT_BYTES: usize = 5 * 1024;
/// Partial reassemblies older than this are discarded.
const REASSEMBLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire messages. The `msg` field is the envelope discriminator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum GossipMessage {
    /// Periodic fingerprint announcement, one per peer per tick.
    #[serde(rename = "DIGEST")]
    Digest {
        node_id: String,
        version: u64,
        merkle_root: Hash,
    },
    /// Reply to a digest that does not match ours.
    #[serde(rename = "PULL_REQ")]
    PullReq { node_id: String, since_version: u64 },
    /// One chunk of a base64-encoded snapshot.
    #[serde(rename = "STATE")]
    State {
        node_id: String,
        version: u64,
        frag_id: Uuid,
        index: u16,
        total: u16,
        data: String,
    },
}

/// Counters published through `/status`.
#[derive(Debug, Default)]
pub struct GossipStats {
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub merged: AtomicU64,
    pub malformed: AtomicU64,
    pub errors: AtomicU64,
    /// Milliseconds-since-epoch of the last valid inbound datagram.
    pub last_received_ms: AtomicU64,
}

impl GossipStats {
    fn mark_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_received_ms.store(now, Ordering::Relaxed);
    }
}

struct Reassembly {
    total: u16,
    chunks: BTreeMap<u16, String>,
    deadline: Instant,
}

/// The gossip half of an edge node.
pub struct GossipService {
    node_id: String,
    peers: Vec<String>,
    interval: Duration,
    socket: UdpSocket,
    store: Arc<ReplicaStore>,
    stats: Arc<GossipStats>,
    reassembly: HashMap<Uuid, Reassembly>,
}

impl GossipService {
    pub async fn bind(
        node_id: &str,
        bind_addr: &str,
        peers: Vec<String>,
        interval: Duration,
        store: Arc<ReplicaStore>,
        stats: Arc<GossipStats>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        tracing::info!(
            node_id,
            addr = %socket.local_addr()?,
            peer_count = peers.len(),
            "gossip bound"
        );
        Ok(Self {
            node_id: node_id.to_string(),
            peers,
            interval,
            socket,
            store,
            stats,
            reassembly: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the broadcast/receive loop forever.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut next_tick = Instant::now() + self.jittered_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    self.broadcast_digest().await;
                    self.purge_expired();
                    next_tick = Instant::now() + self.jittered_interval();
                }
                inbound = self.socket.recv_from(&mut buf) => {
                    match inbound {
                        Ok((len, addr)) => self.handle_datagram(&buf[..len], addr).await,
                        Err(err) => {
                            self.stats.errors.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(error = %err, "gossip recv failed");
                        }
                    }
                }
            }
        }
    }

    fn jittered_interval(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        self.interval.mul_f64(factor)
    }

    /// Announce our fingerprint to every configured peer.
    async fn broadcast_digest(&self) {
        let message = GossipMessage::Digest {
            node_id: self.node_id.clone(),
            version: self.store.version(),
            merkle_root: self.store.merkle_root(),
        };
        let Ok(bytes) = serde_json::to_vec(&message) else {
            return;
        };

        for peer in &self.peers {
            match self.socket.send_to(&bytes, peer.as_str()).await {
                Ok(_) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(peer, error = %err, "digest send failed");
                }
            }
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let message: GossipMessage = match serde_json::from_slice(data) {
            Ok(m) => m,
            Err(_) => {
                // not ours to diagnose; count and move on
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self.sender_id(&message) == self.node_id {
            return;
        }
        self.stats.mark_received();

        match message {
            GossipMessage::Digest {
                node_id,
                merkle_root,
                ..
            } => {
                if merkle_root != self.store.merkle_root() {
                    tracing::debug!(
                        from = node_id,
                        theirs = %merkle_root.short(),
                        ours = %self.store.merkle_root().short(),
                        "digest mismatch, pulling"
                    );
                    self.send_pull_req(addr).await;
                }
            }
            GossipMessage::PullReq { node_id, .. } => {
                tracing::debug!(from = node_id, "state requested");
                self.send_state(addr).await;
            }
            GossipMessage::State {
                node_id,
                frag_id,
                index,
                total,
                data,
                ..
            } => {
                self.accept_fragment(&node_id, frag_id, index, total, data);
            }
        }
    }

    fn sender_id<'a>(&self, message: &'a GossipMessage) -> &'a str {
        match message {
            GossipMessage::Digest { node_id, .. }
            | GossipMessage::PullReq { node_id, .. }
            | GossipMessage::State { node_id, .. } => node_id,
        }
    }

    async fn send_pull_req(&self, addr: SocketAddr) {
        let message = GossipMessage::PullReq {
            node_id: self.node_id.clone(),
            since_version: 0,
        };
        if let Ok(bytes) = serde_json::to_vec(&message) {
            if self.socket.send_to(&bytes, addr).await.is_err() {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Ship our snapshot as base64 fragments, each under the datagram cap.
    async fn send_state(&self, addr: SocketAddr) {
        let snapshot = self.store.snapshot();
        let version = snapshot.version;
        let Ok(raw) = serde_json::to_vec(&snapshot) else {
            return;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);

        let chunk_len = FRAGMENT_BYTES * 4 / 3;
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(chunk_len)
            // base64 is ASCII, any byte boundary is a char boundary
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        let total = chunks.len().max(1) as u16;
        let frag_id = Uuid::new_v4();

        for (index, chunk) in chunks.iter().enumerate() {
            let message = GossipMessage::State {
                node_id: self.node_id.clone(),
                version,
                frag_id,
                index: index as u16,
                total,
                data: (*chunk).to_string(),
            };
            let Ok(bytes) = serde_json::to_vec(&message) else {
                continue;
            };
            if self.socket.send_to(&bytes, addr).await.is_err() {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn accept_fragment(&mut self, from: &str, frag_id: Uuid, index: u16, total: u16, data: String) {
        if total == 0 || index >= total {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let entry = self.reassembly.entry(frag_id).or_insert_with(|| Reassembly {
            total,
            chunks: BTreeMap::new(),
            deadline: Instant::now() + REASSEMBLE_TIMEOUT,
        });
        if entry.total != total {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            self.reassembly.remove(&frag_id);
            return;
        }
        entry.chunks.insert(index, data);

        if entry.chunks.len() == entry.total as usize {
            let assembled: String = entry.chunks.values().map(String::as_str).collect();
            self.reassembly.remove(&frag_id);
            self.merge_snapshot(from, &assembled);
        }
    }

    fn merge_snapshot(&self, from: &str, encoded: &str) {
        let raw = match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(raw) => raw,
            Err(_) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let wire: ReplicaWire = match serde_json::from_slice(&raw) {
            Ok(wire) => wire,
            Err(_) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.store.merge_wire(wire) {
            Ok((report, root)) => {
                if report.changed() {
                    self.stats.merged.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        from,
                        new_events = report.new_events,
                        root = %root.short(),
                        "gossip merged"
                    );
                }
            }
            Err(err) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(from, error = %err, "gossip merge rejected");
            }
        }
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.reassembly.retain(|_, r| r.deadline > now);
    }
}
