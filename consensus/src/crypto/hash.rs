//! Digest functions for the validator ledger
//!
//! Supports:
//! - SHA-256 (default)
//! - BLAKE3 (faster alternative; every validator must agree on the choice)
//! - MD5 (legacy deployments; weak, kept only as a protocol input)
//!
//! Digests are consumed as big-endian integers: record signatures sign the
//! digest of the canonical record string, and the Harn challenge is the
//! digest of `decimal(T) || message`.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest output; its width depends on the function that produced it
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(Vec<u8>);

impl Hash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Interpret the digest as a big-endian unsigned integer
    pub fn to_integer(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

/// Hash function selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFunction {
    /// SHA-256
    #[default]
    Sha256,
    /// BLAKE3
    Blake3,
    /// MD5
    Md5,
}

impl HashFunction {
    /// Bit width of the digests this function produces
    pub fn output_bits(self) -> u64 {
        match self {
            HashFunction::Sha256 | HashFunction::Blake3 => 256,
            HashFunction::Md5 => 128,
        }
    }

    pub fn digest(self, data: &[u8]) -> Hash {
        match self {
            HashFunction::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(data);
                Hash(hasher.finalize().to_vec())
            }
            HashFunction::Blake3 => Hash(blake3::hash(data).as_bytes().to_vec()),
            HashFunction::Md5 => {
                use md5::{Digest, Md5};
                let mut hasher = Md5::new();
                hasher.update(data);
                Hash(hasher.finalize().to_vec())
            }
        }
    }

    /// Digest `data` and return it as an integer
    pub fn digest_integer(self, data: &[u8]) -> BigUint {
        self.digest(data).to_integer()
    }

    /// Harn challenge `h = Hash(decimal(T) || message)`
    pub fn challenge(self, commitment: &BigUint, message: &str) -> BigUint {
        let input = format!("{}{}", commitment, message);
        self.digest_integer(input.as_bytes())
    }
}
