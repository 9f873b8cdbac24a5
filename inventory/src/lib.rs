// Validator Ledger Inventory Service
//
// Records are proposed by a validator, voted on by its peers and replicated
// to every validator's ledger. Quantity queries are answered with a Harn
// multi-signature over the agreed value, sealed for the reader.

pub mod config;
pub mod error;
pub mod query;
pub mod storage;
pub mod submit;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, KeyDirectory, KeySource, Network, NetworkConfig, ProtocolConfig, ValidatorNode, ValueSelection};
pub use error::{InventoryError, Result};
pub use query::{QueryPipeline, QueryReport};
pub use storage::{Ledger, MemoryLedger, RocksLedger, StorageError};
pub use submit::{SubmitReceipt, SubmitService};
pub use types::{
    canonical_string, LedgerEntry, NodeBallot, Record, RecordDraft, RecordFields, ReplicaRecord,
    SubmitRequest, VerificationLog,
};
