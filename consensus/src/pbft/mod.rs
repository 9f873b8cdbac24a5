// Two-phase BFT vote over a single proposed record
// Every validator except the proposer checks the proposer's RSA signature;
// the commit phase mirrors the prepare votes. With N validators the round
// tolerates f = (N-1)/3 faults and commits with Q = 2f+1 votes.

pub mod types;

pub use types::{ConsensusOutcome, Phase, Proposal, RoundState, VerificationDetail, Vote};

use crate::crypto::hash::HashFunction;
use crate::crypto::keys::RsaPublicKey;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Coordinator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Validator set is empty")]
    EmptyValidatorSet,

    #[error("Validator {0} is listed more than once")]
    DuplicateValidator(String),

    #[error("Proposer {0} is not a validator")]
    UnknownProposer(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Maximum Byzantine faults tolerated by `n` validators
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Votes needed to commit (2f + 1)
pub fn quorum_size(n: usize) -> usize {
    2 * max_faulty(n) + 1
}

/// How one validator checks a proposal
pub trait ProposalVerifier {
    fn check(&self, validator: &str, proposal: &Proposal, proposer_key: &RsaPublicKey) -> VerificationDetail;
}

/// Honest check: recover the digest with the proposer's public key
#[derive(Clone, Copy, Debug, Default)]
pub struct RsaProposalVerifier {
    hash: HashFunction,
}

impl RsaProposalVerifier {
    pub fn new(hash: HashFunction) -> Self {
        Self { hash }
    }
}

impl ProposalVerifier for RsaProposalVerifier {
    fn check(&self, _validator: &str, proposal: &Proposal, proposer_key: &RsaPublicKey) -> VerificationDetail {
        let expected_hash = proposal.digest(self.hash);
        let recovered = proposer_key.recover(&proposal.signature);
        let matched = recovered == expected_hash;
        VerificationDetail::Checked {
            expected_hash,
            recovered,
            modulus: proposer_key.n.clone(),
            matched,
        }
    }
}

/// Runs prepare/commit rounds for a fixed validator set
#[derive(Clone, Debug)]
pub struct Coordinator {
    validators: Vec<String>,
    f: usize,
    quorum_size: usize,
}

impl Coordinator {
    /// Create a coordinator for an ordered, duplicate-free validator set
    pub fn new(validators: Vec<String>) -> Result<Self> {
        if validators.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }
        let mut seen = HashSet::new();
        for v in &validators {
            if !seen.insert(v.as_str()) {
                return Err(ConsensusError::DuplicateValidator(v.clone()));
            }
        }

        let n = validators.len();
        Ok(Self {
            f: max_faulty(n),
            quorum_size: quorum_size(n),
            validators,
        })
    }

    pub fn validators(&self) -> &[String] {
        &self.validators
    }

    pub fn max_faulty(&self) -> usize {
        self.f
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    /// Run one round to completion
    pub fn run(
        &self,
        proposal: &Proposal,
        proposer_key: &RsaPublicKey,
        verifier: &dyn ProposalVerifier,
    ) -> Result<ConsensusOutcome> {
        if !self.validators.iter().any(|v| *v == proposal.proposer) {
            return Err(ConsensusError::UnknownProposer(proposal.proposer.clone()));
        }

        let mut state = RoundState::Proposed;
        let (prepare, details) = self.prepare(proposal, proposer_key, verifier);
        let prepare_votes = Self::approving(&prepare);

        if prepare_votes.len() >= self.quorum_size {
            state = RoundState::Prepared;
        }

        // Commit mirrors prepare
        let commit: Vec<Vote> = prepare
            .iter()
            .map(|v| Vote::new(Phase::Commit, v.voter.clone(), v.decision))
            .collect();
        let commit_votes = Self::approving(&commit);

        state = match state {
            RoundState::Prepared if commit_votes.len() >= self.quorum_size => RoundState::Committed,
            _ => RoundState::Rejected,
        };

        match state {
            RoundState::Committed => info!(
                proposer = %proposal.proposer,
                votes = prepare_votes.len(),
                quorum = self.quorum_size,
                "Consensus reached"
            ),
            _ => warn!(
                proposer = %proposal.proposer,
                votes = prepare_votes.len(),
                quorum = self.quorum_size,
                "Consensus not reached"
            ),
        }

        let mut votes = prepare;
        votes.extend(commit);

        Ok(ConsensusOutcome {
            state,
            proposer: proposal.proposer.clone(),
            quorum: self.quorum_size,
            prepare_votes,
            commit_votes,
            votes,
            details,
            timed_out: false,
        })
    }

    /// Run one round; a round finishing after `deadline` is rejected
    pub fn run_until(
        &self,
        proposal: &Proposal,
        proposer_key: &RsaPublicKey,
        verifier: &dyn ProposalVerifier,
        deadline: Instant,
    ) -> Result<ConsensusOutcome> {
        let mut outcome = self.run(proposal, proposer_key, verifier)?;
        if Instant::now() > deadline {
            warn!(proposer = %proposal.proposer, "Consensus round exceeded its deadline");
            outcome.state = RoundState::Rejected;
            outcome.timed_out = true;
        }
        Ok(outcome)
    }

    /// Prepare phase: each non-proposer validator checks the signature
    fn prepare(
        &self,
        proposal: &Proposal,
        proposer_key: &RsaPublicKey,
        verifier: &dyn ProposalVerifier,
    ) -> (Vec<Vote>, BTreeMap<String, VerificationDetail>) {
        let mut votes = Vec::with_capacity(self.validators.len());
        let mut details = BTreeMap::new();

        for validator in &self.validators {
            if *validator == proposal.proposer {
                details.insert(validator.clone(), VerificationDetail::abstained());
                continue;
            }

            let detail = verifier.check(validator, proposal, proposer_key);
            let decision = detail.matched().unwrap_or(false);
            debug!(validator = %validator, decision, "Prepare vote");

            votes.push(Vote::new(Phase::Prepare, validator.clone(), decision));
            details.insert(validator.clone(), detail);
        }

        (votes, details)
    }

    fn approving(votes: &[Vote]) -> Vec<String> {
        votes
            .iter()
            .filter(|v| v.decision)
            .map(|v| v.voter.clone())
            .collect()
    }
}
