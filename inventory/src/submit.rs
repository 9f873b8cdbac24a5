/// Record submission
///
/// The proposer signs the canonical record string, checks its own signature,
/// then the validators vote. Only a committed round reaches the ledger: the
/// record is appended to every replica together with each validator's logged
/// verdict, in a single write.
/// Rounds on the same record id are serialized.

use crate::config::{ConfigError, Network};
use crate::error::{InventoryError, Result};
use crate::storage::Ledger;
use crate::types::{Record, RecordDraft, SubmitRequest, VerificationLog};
use consensus::crypto::bigint::decimal;
use consensus::pbft::{ProposalVerifier, RsaProposalVerifier};
use consensus::{ConsensusOutcome, Proposal};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What a committed submission produced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub record: Record,
    pub record_string: String,
    #[serde(with = "decimal")]
    pub digest: BigUint,
    pub outcome: ConsensusOutcome,
}

impl SubmitReceipt {
    /// Per-peer verdicts (`None` for the proposer)
    pub fn verifications(&self) -> BTreeMap<String, Option<bool>> {
        self.outcome.verifications()
    }
}

/// One mutex per record id under submission
#[derive(Debug, Default)]
struct RecordLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    fn slot(&self, id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.to_string()).or_default())
    }

    /// Forget the slot once nobody else holds it
    fn release(&self, id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(id);
        }
    }
}

/// A signed proposal ready for voting
struct SignedDraft {
    draft: RecordDraft,
    proposal: Proposal,
    digest: BigUint,
}

/// Accepts records from proposers and replicates the committed ones
pub struct SubmitService<L: Ledger> {
    network: Arc<Network>,
    ledger: Arc<L>,
    verifier: Box<dyn ProposalVerifier + Send + Sync>,
    locks: RecordLocks,
}

impl<L: Ledger> SubmitService<L> {
    pub fn new(network: Arc<Network>, ledger: Arc<L>) -> Self {
        let verifier = RsaProposalVerifier::new(network.protocol().hash);
        Self {
            network,
            ledger,
            verifier: Box::new(verifier),
            locks: RecordLocks::default(),
        }
    }

    /// Replace how validators check proposals
    pub fn with_verifier(mut self, verifier: impl ProposalVerifier + Send + Sync + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Submit without a deadline
    pub fn submit(&self, request: &SubmitRequest) -> Result<SubmitReceipt> {
        self.submit_before(request, None)
    }

    /// Submit; a round finishing after `deadline` is rejected and nothing is appended
    pub fn submit_before(&self, request: &SubmitRequest, deadline: Option<Instant>) -> Result<SubmitReceipt> {
        let signed = self.sign(request)?;
        let id = signed.draft.id.clone();

        let slot = self.locks.slot(&id);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.decide(signed, deadline)
        };
        drop(slot);
        self.locks.release(&id);
        result
    }

    /// Validate the fields, sign the canonical string and check the signature locally
    fn sign(&self, request: &SubmitRequest) -> Result<SignedDraft> {
        let draft = request.record.validate().map_err(InventoryError::Validation)?;
        let proposer = self.network.validator(&request.proposer)?;

        let record_string = draft.canonical_string();
        let digest = self.network.protocol().hash.digest_integer(record_string.as_bytes());
        let signature = proposer.key.sign_digest(&digest)?;

        if !proposer.key.public_key().verify_digest(&signature, &digest) {
            return Err(ConfigError::SelfVerificationFailed(proposer.name.clone()).into());
        }

        Ok(SignedDraft {
            proposal: Proposal::new(proposer.name.clone(), record_string, signature),
            draft,
            digest,
        })
    }

    /// Run the round and append on commit
    fn decide(&self, signed: SignedDraft, deadline: Option<Instant>) -> Result<SubmitReceipt> {
        let SignedDraft { draft, proposal, digest } = signed;
        let proposer_key = self.network.validator(&proposal.proposer)?.key.public_key();
        let coordinator = self.network.coordinator();

        let outcome = match deadline {
            Some(deadline) => coordinator.run_until(&proposal, &proposer_key, self.verifier.as_ref(), deadline),
            None => coordinator.run(&proposal, &proposer_key, self.verifier.as_ref()),
        }
        .map_err(ConfigError::from)?;

        if !outcome.is_committed() {
            warn!(
                record = %proposal.payload,
                votes = outcome.approvals(),
                timed_out = outcome.timed_out,
                "Record rejected"
            );
            return Err(InventoryError::ConsensusFailed {
                outcome: Box::new(outcome),
            });
        }

        let record = draft.into_record(proposal.proposer.clone(), proposal.signature.clone());
        let logs: Vec<(String, VerificationLog)> = outcome
            .verifications()
            .into_iter()
            .map(|(node, verified)| {
                let log = VerificationLog {
                    record_id: record.id.clone(),
                    signed_from: record.origin.clone(),
                    signature: record.signature.clone(),
                    verified,
                };
                (node, log)
            })
            .collect();
        self.ledger.append_committed(&record, &logs)?;

        info!(
            record = %proposal.payload,
            proposer = %proposal.proposer,
            votes = outcome.approvals(),
            "Record committed"
        );

        Ok(SubmitReceipt {
            record,
            record_string: proposal.payload,
            digest,
            outcome,
        })
    }
}

impl<L: Ledger + 'static> SubmitService<L> {
    /// Submit on the blocking pool with a deadline of `timeout` from now
    pub async fn submit_within(self: Arc<Self>, request: SubmitRequest, timeout: Duration) -> Result<SubmitReceipt> {
        let deadline = Instant::now() + timeout;
        tokio::task::spawn_blocking(move || self.submit_before(&request, Some(deadline))).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::storage::MemoryLedger;
    use crate::types::{LedgerEntry, RecordFields};
    use consensus::crypto::RsaPublicKey;
    use consensus::pbft::VerificationDetail;
    use consensus::RoundState;
    use testutil::fixtures;

    fn service() -> SubmitService<MemoryLedger> {
        let config: NetworkConfig = serde_json::from_value(fixtures::default_network_json()).unwrap();
        let network = Arc::new(config.build().unwrap());
        let ledger = Arc::new(MemoryLedger::new(network.validator_names()));
        SubmitService::new(network, ledger)
    }

    /// Validators that always vote against
    struct Dissenting(&'static [&'static str]);

    impl ProposalVerifier for Dissenting {
        fn check(&self, validator: &str, proposal: &Proposal, key: &RsaPublicKey) -> VerificationDetail {
            let honest = RsaProposalVerifier::default().check(validator, proposal, key);
            match honest {
                VerificationDetail::Checked { expected_hash, recovered, modulus, .. }
                    if self.0.iter().any(|v| *v == validator) =>
                {
                    VerificationDetail::Checked { expected_hash, recovered, modulus, matched: false }
                }
                other => other,
            }
        }
    }

    #[test]
    fn test_committed_record_is_replicated_with_logs() {
        let service = service();
        let receipt = service
            .submit(&SubmitRequest::new("NodeA", RecordFields::new("001", 32, 12)))
            .unwrap();

        assert_eq!(receipt.record_string, "001,32,12");
        assert_eq!(receipt.outcome.state, RoundState::Committed);
        assert_eq!(receipt.verifications()["NodeA"], None);
        assert_eq!(receipt.verifications()["NodeB"], Some(true));

        let ledger = service.ledger();
        for node in fixtures::VALIDATORS {
            assert_eq!(ledger.records(node).unwrap(), vec![receipt.record.clone()]);
        }
        let verdict = |node: &str| match ledger.list_by_node(node).unwrap().as_slice() {
            [LedgerEntry::Record(_), LedgerEntry::Verification(log)] => log.verified,
            other => panic!("unexpected replica contents: {other:?}"),
        };
        assert_eq!(verdict("NodeA"), None);
        assert_eq!(verdict("NodeD"), Some(true));
    }

    #[test]
    fn test_failed_commit_write_leaves_no_record() {
        let config: NetworkConfig = serde_json::from_value(fixtures::default_network_json()).unwrap();
        let network = Arc::new(config.build().unwrap());
        // NodeD has no replica, so its verification log cannot be written
        let ledger = Arc::new(MemoryLedger::new(["NodeA", "NodeB", "NodeC"]));
        let service = SubmitService::new(network, ledger);

        let err = service
            .submit(&SubmitRequest::new("NodeA", RecordFields::new("001", 32, 12)))
            .unwrap_err();
        assert_eq!(err.kind(), "storage_error");
        assert!(service.ledger().list_by_id("001").unwrap().is_empty());
        for node in ["NodeA", "NodeB", "NodeC"] {
            assert!(service.ledger().list_by_node(node).unwrap().is_empty());
        }
    }

    #[test]
    fn test_invalid_fields_never_reach_consensus() {
        let service = service();
        let mut fields = RecordFields::new("001", 32, 12);
        fields.qty = None;

        let err = service.submit(&SubmitRequest::new("NodeA", fields)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(service.ledger().list_by_id("001").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_proposer_is_configuration_error() {
        let service = service();
        let err = service
            .submit(&SubmitRequest::new("NodeZ", RecordFields::new("001", 32, 12)))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Configuration(ConfigError::UnknownNode(_))));
    }

    #[test]
    fn test_rejected_round_appends_nothing() {
        let service = service().with_verifier(Dissenting(&["NodeC"]));
        let err = service
            .submit(&SubmitRequest::new("NodeA", RecordFields::new("001", 32, 12)))
            .unwrap_err();

        match err {
            InventoryError::ConsensusFailed { outcome } => {
                assert_eq!(outcome.state, RoundState::Rejected);
                assert_eq!(outcome.prepare_votes, vec!["NodeB", "NodeD"]);
                assert_eq!(outcome.verifications()["NodeC"], Some(false));
            }
            other => panic!("unexpected error: {other}"),
        }
        for node in fixtures::VALIDATORS {
            assert!(service.ledger().list_by_node(node).unwrap().is_empty());
        }
    }

    #[test]
    fn test_expired_deadline_appends_nothing() {
        let service = service();
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = service
            .submit_before(&SubmitRequest::new("NodeB", RecordFields::new("002", 20, 7)), Some(deadline))
            .unwrap_err();

        assert!(matches!(err, InventoryError::ConsensusFailed { ref outcome } if outcome.timed_out));
        assert!(service.ledger().list_by_id("002").unwrap().is_empty());
    }

    #[test]
    fn test_record_locks_are_released() {
        let service = service();
        service
            .submit(&SubmitRequest::new("NodeA", RecordFields::new("001", 32, 12)))
            .unwrap();
        assert!(service.locks.slots.lock().unwrap().is_empty());
    }
}
