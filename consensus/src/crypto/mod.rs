//! Cryptography module for the validator ledger
//!
//! Implements:
//! - RSA key material (derivation and validation of n, phi, d)
//! - RSA signing, verification, encryption and decryption over big integers
//! - Harn identity-based multi-signatures (secret extraction, partials, aggregation)
//! - Digest functions feeding record signatures and the Harn challenge

pub mod bigint;
pub mod harn;
pub mod hash;
pub mod keys;
pub mod rsa;

pub use harn::{
    AggregateSignature, AggregationPolicy, Authority, Ballot, HarnError, MultiSigAggregator,
    PartialSignature, SecretCache, Signer, SigningSession, Verification,
};
pub use hash::{Hash, HashFunction};
pub use keys::{KeyError, KeyFile, RsaKeyPair, RsaPublicKey};
pub use rsa::RsaError;
