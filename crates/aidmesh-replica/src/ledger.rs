//! Tamper-evident hash-chain ledger.
//!
//! Append-only sequence where every record embeds the hash of its
//! predecessor: `hash = SHA256(seq || timestamp || prev_hash ||
//! canonical(entry))`. Rewriting any past record breaks every link after
//! it. The ledger is the per-node audit trail; it is not replicated and
//! never enters the Merkle digest.
//!
//! On disk: one canonical JSON record per line, flushed before the append
//! returns. On open, the whole file is replayed and the chain re-verified;
//! a broken chain refuses to load.

use crate::error::ReplicaError;
use crate::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One chained record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub prev_hash: Hash,
    pub entry: Value,
    pub hash: Hash,
}

impl LogRecord {
    /// Recompute this record's hash from its own fields.
    fn computed_hash(&self) -> Hash {
        chain_hash(self.seq, self.timestamp_ms, &self.prev_hash, &self.entry)
    }
}

fn chain_hash(seq: u64, timestamp_ms: u64, prev_hash: &Hash, entry: &Value) -> Hash {
    // entry is canonical by construction: serde_json maps are sorted
    let canonical = entry.to_string();
    Hasher::hash_all(&[
        &seq.to_be_bytes(),
        &timestamp_ms.to_be_bytes(),
        prev_hash.as_bytes(),
        canonical.as_bytes(),
    ])
}

/// Outcome of a full chain audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAudit {
    pub valid: bool,
    pub first_bad_seq: Option<u64>,
}

/// Append-only hash-chained log with optional disk persistence.
pub struct HashChainLog {
    node_id: String,
    records: Vec<LogRecord>,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl HashChainLog {
    /// A purely in-memory ledger (gateway-side consolidated replicas,
    /// tests). Seeds the chain with its genesis record.
    pub fn in_memory(node_id: &str) -> Self {
        let mut log = Self {
            node_id: node_id.to_string(),
            records: Vec::new(),
            file: None,
            path: None,
        };
        log.push_seed();
        log
    }

    /// Open or create `<dir>/<node_id>.log`. An existing file is replayed
    /// and audited; any broken link is fatal.
    pub fn open(node_id: &str, dir: &Path) -> Result<Self, ReplicaError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{node_id}.log"));

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: LogRecord = serde_json::from_str(&line).map_err(|_| {
                    ReplicaError::LogCorruption {
                        seq: line_no as u64,
                    }
                })?;
                records.push(record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut log = Self {
            node_id: node_id.to_string(),
            records,
            file: Some(file),
            path: Some(path),
        };

        if log.records.is_empty() {
            log.push_seed();
            log.persist_last()?;
        } else {
            let audit = log.verify();
            if !audit.valid {
                return Err(ReplicaError::LogCorruption {
                    seq: audit.first_bad_seq.unwrap_or(0),
                });
            }
        }

        Ok(log)
    }

    fn push_seed(&mut self) {
        let entry = serde_json::json!({
            "kind": "GENESIS",
            "node_id": self.node_id,
        });
        let timestamp_ms = 0;
        let prev_hash = Hash::zero();
        let hash = chain_hash(0, timestamp_ms, &prev_hash, &entry);
        self.records.push(LogRecord {
            seq: 0,
            timestamp_ms,
            prev_hash,
            entry,
            hash,
        });
    }

    /// Append a record and flush it to disk before returning.
    pub fn append(&mut self, timestamp_ms: u64, entry: Value) -> Result<&LogRecord, ReplicaError> {
        let last = self
            .records
            .last()
            .expect("chain always holds its seed record");
        let seq = last.seq + 1;
        let prev_hash = last.hash;
        let hash = chain_hash(seq, timestamp_ms, &prev_hash, &entry);

        self.records.push(LogRecord {
            seq,
            timestamp_ms,
            prev_hash,
            entry,
            hash,
        });
        self.persist_last()?;

        Ok(self.records.last().expect("record just pushed"))
    }

    fn persist_last(&mut self) -> Result<(), ReplicaError> {
        if let Some(file) = self.file.as_mut() {
            let record = self.records.last().expect("chain is never empty");
            let line = serde_json::to_string(record).map_err(ReplicaError::encoding)?;
            writeln!(file, "{line}")?;
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Walk the whole chain and re-check every link. O(N), audit only.
    pub fn verify(&self) -> LogAudit {
        let mut expected_prev = Hash::zero();
        for (i, record) in self.records.iter().enumerate() {
            let bad = record.seq != i as u64
                || record.prev_hash != expected_prev
                || record.computed_hash() != record.hash;
            if bad {
                return LogAudit {
                    valid: false,
                    first_bad_seq: Some(i as u64),
                };
            }
            expected_prev = record.hash;
        }
        LogAudit {
            valid: true,
            first_bad_seq: None,
        }
    }

    /// The most recent `n` records, oldest first.
    pub fn tail(&self, n: usize) -> &[LogRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest_hash(&self) -> Hash {
        self.records
            .last()
            .map(|r| r.hash)
            .unwrap_or_else(Hash::zero)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
