//! Validator ledger consensus layer
//!
//! This crate implements the protocol core shared by every validator:
//! - RSA-style key material, signing and sealing
//! - Two-phase (prepare/commit) BFT vote over a single proposed record
//! - Harn identity-based multi-signatures over a queried value

pub mod crypto;
pub mod pbft;

pub use crypto::{
    AggregateSignature, Authority, HashFunction, KeyFile, MultiSigAggregator, RsaKeyPair,
    RsaPublicKey, Signer, Verification,
};
pub use pbft::{Coordinator, ConsensusError, ConsensusOutcome, Proposal, RoundState};
