// Integration tests for the submission and query pipeline
// Tests the complete workflow: submit, replicate, diverge, query, verify, seal

use inventory::{
    InventoryError, Ledger, LedgerEntry, MemoryLedger, Network, NetworkConfig, QueryPipeline,
    Record, RecordFields, RocksLedger, SubmitRequest, SubmitService,
};
use num_bigint::BigUint;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use testutil::fixtures;

fn network(protocol: serde_json::Value) -> Arc<Network> {
    let config: NetworkConfig = serde_json::from_value(fixtures::network_json(protocol)).unwrap();
    Arc::new(config.build().unwrap())
}

fn memory_ledger(network: &Network) -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::new(network.validator_names()))
}

fn submit(service: &SubmitService<impl Ledger>, node: &str, id: &str, qty: u64, price: u64) -> Record {
    service
        .submit(&SubmitRequest::new(node, RecordFields::new(id, qty, price)))
        .unwrap()
        .record
}

/// Seed one replica with a diverging copy ahead of anything submitted later
fn diverge(ledger: &impl Ledger, node: &str, id: &str, qty: u64) {
    let copy = Record {
        id: id.to_string(),
        qty,
        price: 12,
        origin: node.to_string(),
        signature: BigUint::from(1u32),
    };
    ledger.append_replica(node, &LedgerEntry::Record(copy)).unwrap();
}

#[test]
fn test_submit_then_query() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    submit(&service, "NodeA", "001", 32, 12);

    let report = QueryPipeline::new(network, ledger).query("001").unwrap();

    assert_eq!(report.quantity, 32);
    assert_eq!(report.record.canonical_string(), "001,32,12");
    assert_eq!(report.signers(), fixtures::VALIDATORS.to_vec());
    assert!(report.verification.valid);
    assert_eq!(report.verification.lhs, report.verification.rhs);
    assert_eq!(report.decrypted_quantity, 32);
    assert_ne!(report.encrypted_quantity, BigUint::from(32u32));

    let gate = report.consensus.as_ref().unwrap();
    assert!(gate.is_committed());
    assert_eq!(gate.proposer, "NodeA");
}

#[test]
fn test_random_records_are_answered() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    let pipeline = QueryPipeline::new(network, ledger);

    for (round, node) in fixtures::VALIDATORS.iter().enumerate() {
        let id = testutil::random_item_id();
        let qty = testutil::random_quantity();
        submit(&service, node, &id, qty, round as u64);

        let report = pipeline.query(&id).unwrap();
        assert_eq!(report.quantity, qty);
        assert_eq!(report.decrypted_quantity, qty);
    }
}

#[test]
fn test_majority_excludes_divergent_replica() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    diverge(ledger.as_ref(), "NodeD", "001", 20);
    submit(&service, "NodeA", "001", 32, 12);

    let report = QueryPipeline::new(network, ledger).query("001").unwrap();

    assert_eq!(report.quantity, 32);
    assert_eq!(report.signers(), ["NodeA", "NodeB", "NodeC"]);
    assert_eq!(report.aggregate.identities.len(), 3);
    assert!(report.verification.valid);

    let dissent = report.ballots.iter().find(|b| b.node == "NodeD").unwrap();
    assert_eq!(dissent.quantity, Some(20));
    assert!(!dissent.approve);
}

#[test]
fn test_unconditional_aggregation_includes_every_signer() {
    let network = network(json!({ "aggregation": "unconditional" }));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    diverge(ledger.as_ref(), "NodeD", "001", 20);
    submit(&service, "NodeB", "001", 32, 12);

    let report = QueryPipeline::new(network, ledger).query("001").unwrap();

    assert_eq!(report.signers().len(), 4);
    assert!(report.verification.valid);
}

#[test]
fn test_too_few_approvals_is_insufficient() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    diverge(ledger.as_ref(), "NodeC", "001", 20);
    diverge(ledger.as_ref(), "NodeD", "001", 20);
    submit(&service, "NodeA", "001", 32, 12);

    // 32 and 20 tie; 32 is seen first
    let err = QueryPipeline::new(network, ledger).query("001").unwrap_err();
    match err {
        InventoryError::ConsensusInsufficient {
            approvals,
            quorum,
            ballots,
        } => {
            assert_eq!(approvals, 2);
            assert_eq!(quorum, 3);
            assert_eq!(ballots.iter().filter(|b| b.approve).count(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_item_is_not_found() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    submit(&service, "NodeA", "001", 32, 12);

    let pipeline = QueryPipeline::new(network, ledger);
    let err = pipeline.query("404").unwrap_err();
    assert!(matches!(err, InventoryError::NotFound(ref id) if id == "404"));
    assert_eq!(err.kind(), "not_found");
    assert_eq!(pipeline.cached_secrets(), 0);
}

#[test]
fn test_consensus_gate_catches_forged_record() {
    let forged = Record {
        id: "003".to_string(),
        qty: 50,
        price: 9,
        origin: "NodeC".to_string(),
        signature: BigUint::from(123_456_789u64),
    };

    let gated = network(json!({}));
    let ledger = memory_ledger(&gated);
    ledger.append_committed(&forged, &[]).unwrap();
    let err = QueryPipeline::new(gated, ledger).query("003").unwrap_err();
    match err {
        InventoryError::ConsensusFailed { outcome } => {
            assert_eq!(outcome.proposer, "NodeC");
            assert!(outcome.prepare_votes.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }

    let ungated = network(json!({ "consensus_gate": false }));
    let ledger = memory_ledger(&ungated);
    ledger.append_committed(&forged, &[]).unwrap();
    let report = QueryPipeline::new(ungated, ledger).query("003").unwrap();
    assert!(report.consensus.is_none());
    assert_eq!(report.quantity, 50);
}

#[test]
fn test_first_copy_wins_per_replica() {
    for selection in ["first_match", "majority"] {
        let network = network(json!({ "value_selection": selection }));
        let ledger = memory_ledger(&network);
        let service = SubmitService::new(network.clone(), ledger.clone());
        submit(&service, "NodeA", "001", 32, 12);
        submit(&service, "NodeB", "001", 31, 12);

        let report = QueryPipeline::new(network, ledger).query("001").unwrap();
        assert_eq!(report.quantity, 32);
        assert_eq!(report.record.origin, "NodeA");
        assert_eq!(report.signers().len(), 4);
    }
}

#[test]
fn test_secrets_are_cached_across_queries() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    submit(&service, "NodeA", "001", 32, 12);
    submit(&service, "NodeB", "002", 20, 7);

    let pipeline = QueryPipeline::new(network, ledger);
    let first = pipeline.query("001").unwrap();
    assert_eq!(pipeline.cached_secrets(), 4);
    let second = pipeline.query("002").unwrap();
    assert_eq!(pipeline.cached_secrets(), 4);

    let secret = |report: &inventory::QueryReport| report.aggregate.partials[0].secret.clone();
    assert_eq!(secret(&first), secret(&second));
}

#[test]
fn test_blake3_protocol_end_to_end() {
    let network = network(json!({ "hash": "blake3" }));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    submit(&service, "NodeD", "009", 7, 3);

    let report = QueryPipeline::new(network, ledger).query("009").unwrap();
    assert_eq!(report.decrypted_quantity, 7);
    assert!(report.verification.valid);
}

#[test]
fn test_md5_protocol_end_to_end() {
    let network = network(json!({ "hash": "md5" }));
    let ledger = memory_ledger(&network);
    let service = SubmitService::new(network.clone(), ledger.clone());
    let receipt = service
        .submit(&SubmitRequest::new("NodeB", RecordFields::new("001", 32, 12)))
        .unwrap();
    assert!(receipt.digest.bits() <= 128);

    let report = QueryPipeline::new(network, ledger).query("001").unwrap();
    assert_eq!(report.quantity, 32);
    assert_eq!(report.decrypted_quantity, 32);
    assert!(report.consensus.as_ref().unwrap().is_committed());
    assert!(report.verification.valid);
    assert_eq!(report.verification.lhs, report.verification.rhs);
}

#[test]
fn test_concurrent_submissions_stay_ordered() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = Arc::new(SubmitService::new(network.clone(), ledger.clone()));

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let service = Arc::clone(&service);
            let node = fixtures::VALIDATORS[(i % 4) as usize];
            thread::spawn(move || {
                service
                    .submit(&SubmitRequest::new(node, RecordFields::new("007", 100 + i, 5)))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reference = ledger.records("NodeA").unwrap();
    assert_eq!(reference.len(), 8);
    for node in fixtures::VALIDATORS {
        assert_eq!(ledger.records(node).unwrap(), reference);
    }

    let report = QueryPipeline::new(network, ledger).query("007").unwrap();
    assert_eq!(report.quantity, reference[0].qty);
    assert_eq!(report.signers().len(), 4);
}

#[test]
fn test_rocks_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let network = network(json!({}));
    {
        let ledger = Arc::new(RocksLedger::open(dir.path(), &network.validator_names()).unwrap());
        let service = SubmitService::new(network.clone(), ledger);
        submit(&service, "NodeC", "001", 32, 12);
    }

    let ledger = Arc::new(RocksLedger::open(dir.path(), &network.validator_names()).unwrap());
    assert_eq!(ledger.list_by_node("NodeA").unwrap().len(), 2);
    assert_eq!(ledger.list_by_node("NodeC").unwrap().len(), 2);

    let report = QueryPipeline::new(network, ledger).query("001").unwrap();
    assert_eq!(report.quantity, 32);
    assert_eq!(report.record.origin, "NodeC");
}

#[tokio::test]
async fn test_submission_deadline() {
    let network = network(json!({}));
    let ledger = memory_ledger(&network);
    let service = Arc::new(SubmitService::new(network, ledger.clone()));

    let request = SubmitRequest::new("NodeA", RecordFields::new("001", 32, 12));
    let err = Arc::clone(&service)
        .submit_within(request.clone(), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::ConsensusFailed { ref outcome } if outcome.timed_out));
    assert!(ledger.list_by_id("001").unwrap().is_empty());

    let receipt = service
        .submit_within(request, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(receipt.outcome.is_committed());
    assert_eq!(ledger.list_by_id("001").unwrap().len(), 4);
}
