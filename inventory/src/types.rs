/// Ledger data types
///
/// A record is signed over its canonical string `"{id},{qty},{price}"`.
/// Each replica keeps an append-only sequence of ledger entries: committed
/// records plus the verification log each peer wrote for them.

use consensus::crypto::bigint::decimal;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Canonical signing string of a record
pub fn canonical_string(id: &str, qty: u64, price: u64) -> String {
    format!("{},{},{}", id, qty, price)
}

/// Committed inventory record as stored by every replica
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub qty: u64,
    pub price: u64,
    /// Validator that proposed and signed the record
    #[serde(alias = "location")]
    pub origin: String,
    #[serde(with = "decimal")]
    pub signature: BigUint,
}

impl Record {
    pub fn canonical_string(&self) -> String {
        canonical_string(&self.id, self.qty, self.price)
    }
}

/// Record fields as submitted by a client, before validation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub qty: Option<u64>,
    #[serde(default)]
    pub price: Option<u64>,
}

impl RecordFields {
    pub fn new(id: impl Into<String>, qty: u64, price: u64) -> Self {
        Self {
            id: Some(id.into()),
            qty: Some(qty),
            price: Some(price),
        }
    }

    /// Check that every field is present and the id is usable in the canonical string
    pub fn validate(&self) -> Result<RecordDraft, String> {
        let id = match self.id.as_deref().map(str::trim) {
            None | Some("") => return Err("item id is missing".to_string()),
            Some(id) if id.contains(',') => {
                return Err(format!("item id {:?} must not contain ','", id))
            }
            Some(id) => id.to_string(),
        };
        let qty = self.qty.ok_or_else(|| format!("quantity of item {} is missing", id))?;
        let price = self.price.ok_or_else(|| format!("price of item {} is missing", id))?;

        Ok(RecordDraft { id, qty, price })
    }
}

/// Validated record awaiting signature and consensus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDraft {
    pub id: String,
    pub qty: u64,
    pub price: u64,
}

impl RecordDraft {
    pub fn canonical_string(&self) -> String {
        canonical_string(&self.id, self.qty, self.price)
    }

    pub fn into_record(self, origin: impl Into<String>, signature: BigUint) -> Record {
        Record {
            id: self.id,
            qty: self.qty,
            price: self.price,
            origin: origin.into(),
            signature,
        }
    }
}

/// A client's request to add a record through a proposer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub proposer: String,
    pub record: RecordFields,
}

impl SubmitRequest {
    pub fn new(proposer: impl Into<String>, record: RecordFields) -> Self {
        Self {
            proposer: proposer.into(),
            record,
        }
    }
}

/// One validator's verdict on a committed record, written to its own replica
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationLog {
    pub record_id: String,
    pub signed_from: String,
    #[serde(with = "decimal")]
    pub signature: BigUint,
    /// `None` for the proposer, which does not vote on its own record
    pub verified: Option<bool>,
}

/// One entry of a replica's append-only log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Record(Record),
    Verification(VerificationLog),
}

impl LedgerEntry {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            LedgerEntry::Record(record) => Some(record),
            LedgerEntry::Verification(_) => None,
        }
    }
}

/// A record as held by one replica
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub node: String,
    pub record: Record,
}

/// How one validator voted on a queried value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBallot {
    pub node: String,
    /// Quantity in this node's replica, if it holds the item
    pub quantity: Option<u64>,
    pub approve: bool,
}
