/// Error taxonomy of the submission and query services

use crate::config::ConfigError;
use crate::storage::StorageError;
use crate::types::NodeBallot;
use consensus::crypto::RsaError;
use consensus::ConsensusOutcome;
use num_bigint::BigUint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Consensus failed: {} of {} required votes", .outcome.approvals(), .outcome.quorum)]
    ConsensusFailed { outcome: Box<ConsensusOutcome> },

    #[error("Consensus insufficient: {approvals} approvals, need {quorum}")]
    ConsensusInsufficient {
        approvals: usize,
        quorum: usize,
        ballots: Vec<NodeBallot>,
    },

    #[error("Aggregate signature does not verify: S^e = {lhs}, prod(ID) * T^h = {rhs}")]
    VerificationMismatch { lhs: BigUint, rhs: BigUint },

    #[error("Item {0} not found in any ledger")]
    NotFound(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] RsaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Submission task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, InventoryError>;

impl InventoryError {
    /// Stable, machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            InventoryError::Configuration(_) => "configuration_error",
            InventoryError::Validation(_) => "validation_error",
            InventoryError::ConsensusFailed { .. } => "consensus_failed",
            InventoryError::ConsensusInsufficient { .. } => "consensus_insufficient",
            InventoryError::VerificationMismatch { .. } => "verification_mismatch",
            InventoryError::NotFound(_) => "not_found",
            InventoryError::Encoding(_) => "encoding_error",
            InventoryError::Storage(_) => "storage_error",
            InventoryError::Task(_) => "task_failed",
        }
    }
}
