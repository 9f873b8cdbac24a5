/// Replicated ledger storage
///
/// Every validator owns one append-only replica. A committed record and the
/// verification logs of its round land in one write: the record in every
/// replica, each log in the replica of the validator that wrote it.
/// `MemoryLedger` backs tests and one-shot runs, `RocksLedger` keeps each
/// replica in its own RocksDB column family.

use crate::types::{LedgerEntry, Record, ReplicaRecord, VerificationLog};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown replica: {0}")]
    UnknownReplica(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Append-only, per-validator record store
pub trait Ledger: Send + Sync {
    /// Replica names in validator order
    fn replicas(&self) -> Vec<String>;

    /// Append `record` to every replica and each `(node, log)` to its node,
    /// all or nothing
    fn append_committed(&self, record: &Record, logs: &[(String, VerificationLog)]) -> Result<()>;

    /// Append to one replica
    fn append_replica(&self, node: &str, entry: &LedgerEntry) -> Result<()>;

    /// All entries of one replica, oldest first
    fn list_by_node(&self, node: &str) -> Result<Vec<LedgerEntry>>;

    /// Records of one replica, oldest first
    fn records(&self, node: &str) -> Result<Vec<Record>> {
        Ok(self
            .list_by_node(node)?
            .into_iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Record(record) => Some(record),
                LedgerEntry::Verification(_) => None,
            })
            .collect())
    }

    /// Every copy of a record id, in replica order then append order
    fn list_by_id(&self, id: &str) -> Result<Vec<ReplicaRecord>> {
        let mut found = Vec::new();
        for node in self.replicas() {
            for record in self.records(&node)? {
                if record.id == id {
                    found.push(ReplicaRecord {
                        node: node.clone(),
                        record,
                    });
                }
            }
        }
        Ok(found)
    }
}

/// In-memory ledger
#[derive(Debug)]
pub struct MemoryLedger {
    order: Vec<String>,
    replicas: RwLock<BTreeMap<String, Vec<LedgerEntry>>>,
}

impl MemoryLedger {
    pub fn new<I, S>(replicas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = replicas.into_iter().map(Into::into).collect();
        let replicas = order.iter().map(|node| (node.clone(), Vec::new())).collect();
        Self {
            order,
            replicas: RwLock::new(replicas),
        }
    }
}

impl Ledger for MemoryLedger {
    fn replicas(&self) -> Vec<String> {
        self.order.clone()
    }

    fn append_committed(&self, record: &Record, logs: &[(String, VerificationLog)]) -> Result<()> {
        let mut replicas = self.replicas.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((node, _)) = logs.iter().find(|(node, _)| !replicas.contains_key(node)) {
            return Err(StorageError::UnknownReplica(node.clone()));
        }

        for entries in replicas.values_mut() {
            entries.push(LedgerEntry::Record(record.clone()));
        }
        for (node, log) in logs {
            if let Some(entries) = replicas.get_mut(node) {
                entries.push(LedgerEntry::Verification(log.clone()));
            }
        }
        Ok(())
    }

    fn append_replica(&self, node: &str, entry: &LedgerEntry) -> Result<()> {
        let mut replicas = self.replicas.write().unwrap_or_else(PoisonError::into_inner);
        let log = replicas
            .get_mut(node)
            .ok_or_else(|| StorageError::UnknownReplica(node.to_string()))?;
        log.push(entry.clone());
        Ok(())
    }

    fn list_by_node(&self, node: &str) -> Result<Vec<LedgerEntry>> {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
            .ok_or_else(|| StorageError::UnknownReplica(node.to_string()))
    }
}

/// Column family prefix for replica logs
const CF_REPLICA_PREFIX: &str = "replica:";

/// RocksDB-backed ledger, one column family per replica
///
/// Keys are big-endian sequence numbers so iteration order is append order.
pub struct RocksLedger {
    db: DB,
    order: Vec<String>,
    next_seq: Mutex<HashMap<String, u64>>,
    _temp_dir: Option<TempDir>,
}

impl RocksLedger {
    /// Open (or create) the ledger with one replica per validator
    pub fn open(path: &Path, replicas: &[String]) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs: Vec<ColumnFamilyDescriptor> = replicas
            .iter()
            .map(|node| ColumnFamilyDescriptor::new(Self::cf_name(node), Options::default()))
            .collect();
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let mut ledger = Self {
            db,
            order: replicas.to_vec(),
            next_seq: Mutex::new(HashMap::new()),
            _temp_dir: None,
        };
        ledger.load_sequences()?;
        Ok(ledger)
    }

    /// Ledger in a temporary directory, removed on drop
    pub fn new_temp(replicas: &[String]) -> Result<Self> {
        let temp_dir = tempfile::tempdir().map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let mut ledger = Self::open(temp_dir.path(), replicas)?;
        ledger._temp_dir = Some(temp_dir);
        Ok(ledger)
    }

    fn cf_name(node: &str) -> String {
        format!("{}{}", CF_REPLICA_PREFIX, node)
    }

    fn get_cf(&self, node: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(&Self::cf_name(node))
            .ok_or_else(|| StorageError::UnknownReplica(node.to_string()))
    }

    /// Resume sequence numbers after the last stored key of each replica
    fn load_sequences(&mut self) -> Result<()> {
        let mut next = HashMap::new();
        for node in &self.order {
            let cf = self.get_cf(node)?;
            let seq = match self.db.iterator_cf(cf, IteratorMode::End).next() {
                Some(item) => {
                    let (key, _) = item?;
                    Self::decode_seq(&key)? + 1
                }
                None => 0,
            };
            next.insert(node.clone(), seq);
        }
        self.next_seq = Mutex::new(next);
        Ok(())
    }

    fn decode_seq(key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| StorageError::InvalidData(format!("Bad sequence key of {} bytes", key.len())))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl Ledger for RocksLedger {
    fn replicas(&self) -> Vec<String> {
        self.order.clone()
    }

    fn append_committed(&self, record: &Record, logs: &[(String, VerificationLog)]) -> Result<()> {
        let value = serde_json::to_vec(&LedgerEntry::Record(record.clone()))?;
        let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        let mut staged = next.clone();

        let mut batch = WriteBatch::default();
        for node in &self.order {
            let seq = staged.entry(node.clone()).or_insert(0);
            batch.put_cf(self.get_cf(node)?, seq.to_be_bytes(), &value);
            *seq += 1;
        }
        for (node, log) in logs {
            let cf = self.get_cf(node)?;
            let value = serde_json::to_vec(&LedgerEntry::Verification(log.clone()))?;
            let seq = staged.entry(node.clone()).or_insert(0);
            batch.put_cf(cf, seq.to_be_bytes(), value);
            *seq += 1;
        }
        self.db.write(batch)?;

        *next = staged;
        debug!(replicas = self.order.len(), logs = logs.len(), "Committed record appended");
        Ok(())
    }

    fn append_replica(&self, node: &str, entry: &LedgerEntry) -> Result<()> {
        let cf = self.get_cf(node)?;
        let value = serde_json::to_vec(entry)?;
        let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);

        let seq = next.entry(node.to_string()).or_insert(0);
        self.db.put_cf(cf, seq.to_be_bytes(), value)?;
        *seq += 1;
        Ok(())
    }

    fn list_by_node(&self, node: &str) -> Result<Vec<LedgerEntry>> {
        let cf = self.get_cf(node)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}
