/// Harn identity-based multi-signature
///
/// The identity authority (PKG) holds an RSA key (e, n, d). Each signer i
/// has a public identity ID_i and a secret nonce r_i:
///
/// - secret extraction:  g_i = ID_i^d mod n
/// - commitment:         t_i = r_i^e mod n,   T = prod(t_i) mod n
/// - challenge:          h   = Hash(decimal(T) || m)
/// - partial signature:  s_i = g_i * r_i^h mod n
/// - aggregate:          S   = prod(s_i) mod n
/// - verification:       S^e == prod(ID_i) * T^h  (mod n)
///
/// T, S and prod(ID_i) are always taken over the same signer set: a session
/// is opened from one slice of signers and the aggregate carries the
/// identities it was built from.

use super::bigint::{decimal, decimal_vec};
use super::hash::HashFunction;
use super::keys::{RsaKeyPair, RsaPublicKey};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnError {
    #[error("No signers selected")]
    EmptySignerSet,

    #[error("Signer {0} appears more than once")]
    DuplicateSigner(String),

    #[error("Identity of {0} must satisfy 0 < ID < n")]
    IdentityOutOfRange(String),

    #[error("Nonce of {0} must satisfy 1 < r < n")]
    NonceOutOfRange(String),

    #[error("Consensus insufficient: {approvals} approvals, need {quorum}")]
    ConsensusInsufficient { approvals: usize, quorum: usize },
}

pub type Result<T> = std::result::Result<T, HarnError>;

/// Identity authority (Private Key Generator)
#[derive(Clone, Debug)]
pub struct Authority {
    key: RsaKeyPair,
    version: u64,
}

impl Authority {
    pub fn with_version(key: RsaKeyPair, version: u64) -> Self {
        Self { key, version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn modulus(&self) -> &BigUint {
        self.key.modulus()
    }

    pub fn public_exponent(&self) -> &BigUint {
        self.key.public_exponent()
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.public_key()
    }

    /// `g = ID^d mod n`
    pub fn extract_secret(&self, identity: &BigUint) -> BigUint {
        identity.modpow(self.key.private_exponent(), self.key.modulus())
    }

    /// Check that a signer's parameters live in the authority's group
    pub fn check_signer(&self, signer: &Signer) -> Result<()> {
        let n = self.modulus();
        if signer.identity.is_zero() || signer.identity >= *n {
            return Err(HarnError::IdentityOutOfRange(signer.name.clone()));
        }
        if signer.nonce <= BigUint::one() || signer.nonce >= *n {
            return Err(HarnError::NonceOutOfRange(signer.name.clone()));
        }
        Ok(())
    }
}

/// A participant in the multi-signature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub name: String,
    #[serde(with = "decimal")]
    pub identity: BigUint,
    #[serde(with = "decimal")]
    pub nonce: BigUint,
}

impl Signer {
    pub fn new(name: impl Into<String>, identity: BigUint, nonce: BigUint) -> Self {
        Self {
            name: name.into(),
            identity,
            nonce,
        }
    }

    /// Draw a nonce uniformly-ish in [2, n)
    pub fn with_random_nonce(name: impl Into<String>, identity: BigUint, modulus: &BigUint) -> Self {
        let mut bytes = vec![0u8; (modulus.bits() as usize + 7) / 8 + 8];
        let two = BigUint::from(2u32);
        let nonce = loop {
            rand::thread_rng().fill_bytes(&mut bytes);
            let candidate = BigUint::from_bytes_be(&bytes) % modulus;
            if candidate >= two {
                break candidate;
            }
        };
        Self::new(name, identity, nonce)
    }
}

/// Whether a signer's local view agrees with the value being signed
#[derive(Clone, Debug)]
pub struct Ballot<'a> {
    pub signer: &'a Signer,
    pub approve: bool,
}

/// Which signers contribute to the aggregate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Only approving signers, and at least a quorum of them
    #[default]
    VoteGated,
    /// Every signer, regardless of ballot
    Unconditional,
}

impl AggregationPolicy {
    /// Pick the signer set for one session
    pub fn select<'a>(self, ballots: &[Ballot<'a>], quorum: usize) -> Result<Vec<&'a Signer>> {
        match self {
            AggregationPolicy::Unconditional => Ok(ballots.iter().map(|b| b.signer).collect()),
            AggregationPolicy::VoteGated => {
                let approved: Vec<&Signer> = ballots
                    .iter()
                    .filter(|b| b.approve)
                    .map(|b| b.signer)
                    .collect();
                if approved.len() < quorum {
                    return Err(HarnError::ConsensusInsufficient {
                        approvals: approved.len(),
                        quorum,
                    });
                }
                Ok(approved)
            }
        }
    }
}

/// Per-signer values of one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub signer: String,
    #[serde(with = "decimal")]
    pub identity: BigUint,
    #[serde(with = "decimal")]
    pub nonce: BigUint,
    /// g_i
    #[serde(with = "decimal")]
    pub secret: BigUint,
    /// t_i
    #[serde(with = "decimal")]
    pub commitment: BigUint,
    /// s_i
    #[serde(with = "decimal")]
    pub signature: BigUint,
}

/// Commitments and partial signatures before aggregation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningSession {
    pub message: String,
    /// T
    pub commitment: BigUint,
    /// h
    pub challenge: BigUint,
    pub partials: Vec<PartialSignature>,
}

/// Aggregate multi-signature over one message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSignature {
    pub message: String,
    pub signers: Vec<String>,
    #[serde(with = "decimal_vec")]
    pub identities: Vec<BigUint>,
    /// S
    #[serde(with = "decimal")]
    pub signature: BigUint,
    /// T
    #[serde(with = "decimal")]
    pub commitment: BigUint,
    /// h
    #[serde(with = "decimal")]
    pub challenge: BigUint,
    pub partials: Vec<PartialSignature>,
}

/// Both sides of the verification equation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(with = "decimal")]
    pub lhs: BigUint,
    #[serde(with = "decimal")]
    pub rhs: BigUint,
    pub valid: bool,
}

/// Cache of extracted secrets keyed by (signer, authority key version)
#[derive(Debug, Default)]
pub struct SecretCache {
    entries: RwLock<HashMap<(String, u64), BigUint>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `g` for this signer under this authority, extracting on miss
    pub fn get_or_extract(&self, authority: &Authority, signer: &Signer) -> BigUint {
        let key = (signer.name.clone(), authority.version());
        if let Some(secret) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return secret.clone();
        }

        let secret = authority.extract_secret(&signer.identity);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, secret.clone());
        secret
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives secret extraction, commitments, partial signatures and aggregation
pub struct MultiSigAggregator<'a> {
    authority: &'a Authority,
    hash: HashFunction,
    cache: Option<&'a SecretCache>,
}

impl<'a> MultiSigAggregator<'a> {
    pub fn new(authority: &'a Authority, hash: HashFunction) -> Self {
        Self {
            authority,
            hash,
            cache: None,
        }
    }

    /// Reuse extracted secrets across sessions
    pub fn with_cache(mut self, cache: &'a SecretCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// g_i
    pub fn secret(&self, signer: &Signer) -> BigUint {
        match self.cache {
            Some(cache) => cache.get_or_extract(self.authority, signer),
            None => self.authority.extract_secret(&signer.identity),
        }
    }

    /// t_i = r_i^e mod n
    pub fn commitment(&self, nonce: &BigUint) -> BigUint {
        nonce.modpow(self.authority.public_exponent(), self.authority.modulus())
    }

    /// h = Hash(decimal(T) || message)
    pub fn challenge(&self, commitment: &BigUint, message: &str) -> BigUint {
        self.hash.challenge(commitment, message)
    }

    /// s_i = g_i * r_i^h mod n
    pub fn partial_signature(&self, secret: &BigUint, nonce: &BigUint, challenge: &BigUint) -> BigUint {
        let n = self.authority.modulus();
        (secret * nonce.modpow(challenge, n)) % n
    }

    /// Product of `values` modulo the authority modulus
    pub fn product<'v>(&self, values: impl IntoIterator<Item = &'v BigUint>) -> BigUint {
        let n = self.authority.modulus();
        values
            .into_iter()
            .fold(BigUint::one(), |acc, v| (acc * v) % n)
    }

    /// Commitment phase and partial signatures for one signer set
    pub fn open_session(&self, signers: &[&Signer], message: &str) -> Result<SigningSession> {
        if signers.is_empty() {
            return Err(HarnError::EmptySignerSet);
        }
        let mut seen = HashSet::new();
        for signer in signers {
            if !seen.insert(signer.name.as_str()) {
                return Err(HarnError::DuplicateSigner(signer.name.clone()));
            }
            self.authority.check_signer(signer)?;
        }

        let commitments: Vec<BigUint> = signers.iter().map(|s| self.commitment(&s.nonce)).collect();
        let commitment = self.product(&commitments);
        let challenge = self.challenge(&commitment, message);

        let partials = signers
            .iter()
            .zip(commitments)
            .map(|(signer, t)| {
                let secret = self.secret(signer);
                let signature = self.partial_signature(&secret, &signer.nonce, &challenge);
                PartialSignature {
                    signer: signer.name.clone(),
                    identity: signer.identity.clone(),
                    nonce: signer.nonce.clone(),
                    secret,
                    commitment: t,
                    signature,
                }
            })
            .collect();

        debug!(signers = signers.len(), %commitment, "Opened multi-signature session");

        Ok(SigningSession {
            message: message.to_string(),
            commitment,
            challenge,
            partials,
        })
    }

    /// Combine the session's partial signatures
    pub fn aggregate(&self, session: SigningSession) -> AggregateSignature {
        let signature = self.product(session.partials.iter().map(|p| &p.signature));
        AggregateSignature {
            message: session.message,
            signers: session.partials.iter().map(|p| p.signer.clone()).collect(),
            identities: session.partials.iter().map(|p| p.identity.clone()).collect(),
            signature,
            commitment: session.commitment,
            challenge: session.challenge,
            partials: session.partials,
        }
    }

    /// Open a session and aggregate it
    pub fn sign(&self, signers: &[&Signer], message: &str) -> Result<AggregateSignature> {
        Ok(self.aggregate(self.open_session(signers, message)?))
    }

    /// Check `S^e == prod(ID_i) * T^h (mod n)`, recomputing h from T and the message
    pub fn verify(&self, aggregate: &AggregateSignature) -> Verification {
        let n = self.authority.modulus();
        let challenge = self.challenge(&aggregate.commitment, &aggregate.message);

        let lhs = aggregate.signature.modpow(self.authority.public_exponent(), n);
        let identities = self.product(&aggregate.identities);
        let rhs = (identities * aggregate.commitment.modpow(&challenge, n)) % n;
        let valid = lhs == rhs;

        debug!(valid, signers = aggregate.signers.len(), "Verified aggregate signature");

        Verification { lhs, rhs, valid }
    }
}
