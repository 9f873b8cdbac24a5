/// Query pipeline
///
/// Answering a quantity query for an item id:
/// 1. locate the item in every replica (first copy per node)
/// 2. pick the agreed value (first match or majority)
/// 3. optionally re-run the record consensus on the chosen copy
/// 4. ballot each validator on the agreed value and select signers
/// 5. Harn multi-sign the value and verify the aggregate
/// 6. seal the value for the reader and open it again
///
/// Every step's output is kept in the `QueryReport`.

use crate::config::{ConfigError, Network, ValueSelection};
use crate::error::{InventoryError, Result};
use crate::storage::Ledger;
use crate::types::{NodeBallot, Record};
use consensus::crypto::bigint::decimal;
use consensus::crypto::{rsa, AggregateSignature, Ballot, HarnError, MultiSigAggregator, RsaError, RsaPublicKey, SecretCache, Verification};
use consensus::pbft::{ProposalVerifier, RsaProposalVerifier};
use consensus::{ConsensusOutcome, Proposal};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Full audit trail of one answered query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReport {
    pub item_id: String,
    pub quantity: u64,
    pub selection: ValueSelection,
    /// Copy of the record the agreed value was taken from
    pub record: Record,
    /// Present when the consensus gate ran
    pub consensus: Option<ConsensusOutcome>,
    pub ballots: Vec<NodeBallot>,
    pub aggregate: AggregateSignature,
    pub verification: Verification,
    #[serde(with = "decimal")]
    pub encrypted_quantity: BigUint,
    pub decrypted_quantity: u64,
    pub authority: RsaPublicKey,
    pub reader: RsaPublicKey,
}

impl QueryReport {
    /// Names of the signers that contributed to the aggregate
    pub fn signers(&self) -> &[String] {
        &self.aggregate.signers
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// First copy of the item held by each validator, in validator order
type LocalViews = Vec<(String, Option<Record>)>;

/// Answers quantity queries over the replicated ledger
pub struct QueryPipeline<L: Ledger> {
    network: Arc<Network>,
    ledger: Arc<L>,
    verifier: Box<dyn ProposalVerifier + Send + Sync>,
    cache: SecretCache,
}

impl<L: Ledger> QueryPipeline<L> {
    pub fn new(network: Arc<Network>, ledger: Arc<L>) -> Self {
        let verifier = RsaProposalVerifier::new(network.protocol().hash);
        Self {
            network,
            ledger,
            verifier: Box::new(verifier),
            cache: SecretCache::new(),
        }
    }

    /// Replace how validators check the record during the consensus gate
    pub fn with_verifier(mut self, verifier: impl ProposalVerifier + Send + Sync + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    /// Number of extracted secrets currently cached
    pub fn cached_secrets(&self) -> usize {
        self.cache.len()
    }

    pub fn query(&self, item_id: &str) -> Result<QueryReport> {
        let id = item_id.trim();
        if id.is_empty() {
            return Err(InventoryError::Validation("item id is missing".to_string()));
        }

        let views = self.local_views(id)?;
        let selection = self.network.protocol().value_selection;
        let (quantity, record) = select_value(&views, selection)
            .ok_or_else(|| InventoryError::NotFound(id.to_string()))?;
        debug!(item = id, quantity, source = %record.origin, "Agreed value selected");

        let consensus = if self.network.protocol().consensus_gate {
            Some(self.consensus_gate(&record)?)
        } else {
            None
        };

        let ballots = self.ballots(&views, quantity);
        let aggregate = self.multi_sign(&ballots, quantity)?;
        let verification = self.aggregator().verify(&aggregate);
        if !verification.valid {
            warn!(item = id, "Aggregate signature mismatch");
            return Err(InventoryError::VerificationMismatch {
                lhs: verification.lhs,
                rhs: verification.rhs,
            });
        }

        let reader = self.network.reader();
        let encrypted_quantity = rsa::encrypt_quantity(quantity, &reader.public_key())?;
        let decrypted_quantity = rsa::decrypt_quantity(&encrypted_quantity, reader)?;
        if decrypted_quantity != quantity {
            return Err(RsaError::DecodingFailed.into());
        }

        info!(
            item = id,
            quantity,
            signers = aggregate.signers.len(),
            "Query answered"
        );

        Ok(QueryReport {
            item_id: id.to_string(),
            quantity,
            selection,
            record,
            consensus,
            ballots,
            aggregate,
            verification,
            encrypted_quantity,
            decrypted_quantity,
            authority: self.network.authority().public_key(),
            reader: reader.public_key(),
        })
    }

    fn local_views(&self, id: &str) -> Result<LocalViews> {
        let mut first: HashMap<String, Record> = HashMap::new();
        for copy in self.ledger.list_by_id(id)? {
            first.entry(copy.node).or_insert(copy.record);
        }

        Ok(self
            .network
            .validator_names()
            .into_iter()
            .map(|node| {
                let record = first.remove(&node);
                (node, record)
            })
            .collect())
    }

    /// Re-validate the chosen copy's signature through a full round
    fn consensus_gate(&self, record: &Record) -> Result<ConsensusOutcome> {
        let origin = self.network.validator(&record.origin).map_err(|_| {
            InventoryError::Validation(format!(
                "record {} names unknown origin {}",
                record.id, record.origin
            ))
        })?;

        let proposal = Proposal::new(record.origin.clone(), record.canonical_string(), record.signature.clone());
        let outcome = self
            .network
            .coordinator()
            .run(&proposal, &origin.key.public_key(), self.verifier.as_ref())
            .map_err(ConfigError::from)?;

        if !outcome.is_committed() {
            return Err(InventoryError::ConsensusFailed {
                outcome: Box::new(outcome),
            });
        }
        Ok(outcome)
    }

    fn ballots(&self, views: &LocalViews, quantity: u64) -> Vec<NodeBallot> {
        views
            .iter()
            .map(|(node, record)| {
                let held = record.as_ref().map(|r| r.qty);
                NodeBallot {
                    node: node.clone(),
                    quantity: held,
                    approve: held == Some(quantity),
                }
            })
            .collect()
    }

    fn aggregator(&self) -> MultiSigAggregator<'_> {
        let aggregator = MultiSigAggregator::new(self.network.authority(), self.network.protocol().hash);
        if self.network.protocol().cache_secrets {
            aggregator.with_cache(&self.cache)
        } else {
            aggregator
        }
    }

    fn multi_sign(&self, ballots: &[NodeBallot], quantity: u64) -> Result<AggregateSignature> {
        let mut harn_ballots = Vec::with_capacity(ballots.len());
        for ballot in ballots {
            let node = self.network.validator(&ballot.node)?;
            harn_ballots.push(Ballot {
                signer: &node.signer,
                approve: ballot.approve,
            });
        }

        let policy = self.network.protocol().aggregation;
        let signers = policy
            .select(&harn_ballots, self.network.quorum_size())
            .map_err(|err| match err {
                HarnError::ConsensusInsufficient { approvals, quorum } => {
                    InventoryError::ConsensusInsufficient {
                        approvals,
                        quorum,
                        ballots: ballots.to_vec(),
                    }
                }
                other => ConfigError::from(other).into(),
            })?;

        let aggregate = self
            .aggregator()
            .sign(&signers, &quantity.to_string())
            .map_err(ConfigError::from)?;
        Ok(aggregate)
    }
}

/// Agreed quantity and the copy it came from; `None` when no validator holds the item
fn select_value(views: &LocalViews, selection: ValueSelection) -> Option<(u64, Record)> {
    let held = views.iter().filter_map(|(_, record)| record.as_ref());

    match selection {
        ValueSelection::FirstMatch => held.cloned().next().map(|r| (r.qty, r)),
        ValueSelection::Majority => {
            // (quantity, count, first copy), in order of first appearance
            let mut tally: Vec<(u64, usize, &Record)> = Vec::new();
            for record in held {
                match tally.iter_mut().find(|(qty, _, _)| *qty == record.qty) {
                    Some(entry) => entry.1 += 1,
                    None => tally.push((record.qty, 1, record)),
                }
            }

            let mut best: Option<&(u64, usize, &Record)> = None;
            for entry in &tally {
                if best.map_or(true, |b| entry.1 > b.1) {
                    best = Some(entry);
                }
            }
            best.map(|(qty, _, record)| (*qty, (*record).clone()))
        }
    }
}
