//! inventory-node: submit and query records on the validator ledger
//!
//! Every command prints a JSON document on stdout. Service errors are printed
//! as `{"error": <kind>, "message": ...}` and exit with status 2.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use inventory::{
    InventoryError, KeyDirectory, NetworkConfig, QueryPipeline, RecordFields, RocksLedger,
    SubmitRequest, SubmitService,
};

/// Validator ledger node
#[derive(Parser, Debug)]
#[command(name = "inventory-node")]
#[command(about = "Submit and query inventory records on the validator ledger")]
struct Args {
    /// Network configuration file
    #[arg(short, long, default_value = "network.json")]
    config: PathBuf,

    /// Ledger database directory
    #[arg(short, long, default_value = "ledger-db")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Propose a record through a validator
    Submit {
        /// Proposing validator
        #[arg(long)]
        node: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        qty: u64,
        #[arg(long)]
        price: u64,
        /// Reject the round if it takes longer than this
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
    /// Answer a quantity query with a verified multi-signature
    Query {
        #[arg(long)]
        id: String,
    },
    /// Key file maintenance
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },
}

#[derive(Subcommand, Debug)]
enum KeysCommand {
    /// Validate key files and rewrite them with n, phi(n) and d
    Normalize {
        /// Directory holding <node>.json
        #[arg(long)]
        dir: PathBuf,
        /// Nodes to normalize
        #[arg(required = true)]
        nodes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Keys {
            action: KeysCommand::Normalize { dir, nodes },
        } => {
            let keys = KeyDirectory::new(dir);
            let mut written = Vec::with_capacity(nodes.len());
            for node in &nodes {
                let pair = keys.normalize(node)?;
                written.push(json!({
                    "node": node,
                    "path": keys.path_for(node),
                    "bits": pair.bits(),
                }));
            }
            println!("{}", serde_json::to_string_pretty(&written)?);
        }
        Command::Submit {
            node,
            id,
            qty,
            price,
            timeout_ms,
        } => {
            let (network, ledger) = open(&args.config, &args.ledger)?;
            let service = Arc::new(SubmitService::new(network, ledger));
            let request = SubmitRequest::new(node, RecordFields::new(id, qty, price));

            match service.submit_within(request, Duration::from_millis(timeout_ms)).await {
                Ok(receipt) => println!("{}", serde_json::to_string_pretty(&receipt)?),
                Err(err) => fail(err)?,
            }
        }
        Command::Query { id } => {
            let (network, ledger) = open(&args.config, &args.ledger)?;
            let pipeline = QueryPipeline::new(network, ledger);

            match pipeline.query(&id) {
                Ok(report) => println!("{}", report.to_json()?),
                Err(err) => fail(err)?,
            }
        }
    }

    Ok(())
}

fn open(
    config: &std::path::Path,
    ledger: &std::path::Path,
) -> anyhow::Result<(Arc<inventory::Network>, Arc<RocksLedger>)> {
    let network = NetworkConfig::load(config)
        .and_then(|cfg| cfg.build())
        .with_context(|| format!("loading network from {}", config.display()))?;
    let ledger = RocksLedger::open(ledger, &network.validator_names())
        .with_context(|| format!("opening ledger at {}", ledger.display()))?;
    Ok((Arc::new(network), Arc::new(ledger)))
}

/// Print a service error as JSON and exit
fn fail(err: InventoryError) -> anyhow::Result<()> {
    let mut doc = json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    match &err {
        InventoryError::ConsensusFailed { outcome } => {
            doc["outcome"] = serde_json::to_value(outcome)?;
        }
        InventoryError::ConsensusInsufficient { ballots, .. } => {
            doc["ballots"] = serde_json::to_value(ballots)?;
        }
        _ => {}
    }
    println!("{}", serde_json::to_string_pretty(&doc)?);
    std::process::exit(2);
}
