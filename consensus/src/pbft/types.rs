/// Core data structures of the record consensus round
///
/// Proposal, Vote, per-validator verification detail and the round outcome.

use crate::crypto::bigint::decimal;
use crate::crypto::hash::HashFunction;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Round state machine:
/// `Proposed -> Prepared -> Committed`, or `Proposed/Prepared -> Rejected`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Proposed,
    Prepared,
    Committed,
    Rejected,
}

/// Voting phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Commit,
}

/// A record signed by its proposer, awaiting validation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposer: String,
    /// Canonical record string
    pub payload: String,
    #[serde(with = "decimal")]
    pub signature: BigUint,
}

impl Proposal {
    pub fn new(proposer: impl Into<String>, payload: impl Into<String>, signature: BigUint) -> Self {
        Self {
            proposer: proposer.into(),
            payload: payload.into(),
            signature,
        }
    }

    /// Integer digest of the payload
    pub fn digest(&self, hash: HashFunction) -> BigUint {
        hash.digest_integer(self.payload.as_bytes())
    }
}

/// A single validator's decision in one phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub phase: Phase,
    pub voter: String,
    pub decision: bool,
}

impl Vote {
    pub fn new(phase: Phase, voter: impl Into<String>, decision: bool) -> Self {
        Self {
            phase,
            voter: voter.into(),
            decision,
        }
    }
}

/// What a validator computed while checking the proposer's signature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationDetail {
    /// The proposer does not vote on its own submission
    Abstained { note: String },
    Checked {
        #[serde(with = "decimal")]
        expected_hash: BigUint,
        #[serde(with = "decimal")]
        recovered: BigUint,
        #[serde(with = "decimal")]
        modulus: BigUint,
        matched: bool,
    },
}

impl VerificationDetail {
    pub fn abstained() -> Self {
        VerificationDetail::Abstained {
            note: "Proposer does not verify its own signature.".to_string(),
        }
    }

    /// `None` for an abstention
    pub fn matched(&self) -> Option<bool> {
        match self {
            VerificationDetail::Abstained { .. } => None,
            VerificationDetail::Checked { matched, .. } => Some(*matched),
        }
    }
}

/// Result of one consensus round, kept whole for audit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub state: RoundState,
    pub proposer: String,
    pub quorum: usize,
    pub prepare_votes: Vec<String>,
    pub commit_votes: Vec<String>,
    pub votes: Vec<Vote>,
    pub details: BTreeMap<String, VerificationDetail>,
    #[serde(default)]
    pub timed_out: bool,
}

impl ConsensusOutcome {
    pub fn is_committed(&self) -> bool {
        self.state == RoundState::Committed
    }

    /// Per-validator verdicts (`None` for abstentions)
    pub fn verifications(&self) -> BTreeMap<String, Option<bool>> {
        self.details
            .iter()
            .map(|(validator, detail)| (validator.clone(), detail.matched()))
            .collect()
    }

    /// Number of prepare votes
    pub fn approvals(&self) -> usize {
        self.prepare_votes.len()
    }
}
