/// RSA key material for validators, the identity authority and the reader
///
/// A key file carries at least the primes and public exponent. Derived
/// fields (n, phi(n), d) are computed when absent and checked when present,
/// so both the short and the full shape load into the same `RsaKeyPair`.

use super::bigint::{decimal, decimal_option};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid prime factor: {0}")]
    InvalidFactor(&'static str),

    #[error("Public exponent {0} is not invertible modulo phi(n)")]
    NotInvertible(BigUint),

    #[error("Key field {field} does not match the value derived from p, q, e")]
    Mismatch { field: &'static str },

    #[error("Cannot access key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed key file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, KeyError>;

/// On-disk key parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    #[serde(with = "decimal")]
    pub p: BigUint,
    #[serde(with = "decimal")]
    pub q: BigUint,
    #[serde(with = "decimal")]
    pub e: BigUint,
    #[serde(default, with = "decimal_option", skip_serializing_if = "Option::is_none")]
    pub n: Option<BigUint>,
    #[serde(
        default,
        rename = "phi(n)",
        alias = "phi",
        alias = "phi_n",
        with = "decimal_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub phi: Option<BigUint>,
    #[serde(default, with = "decimal_option", skip_serializing_if = "Option::is_none")]
    pub d: Option<BigUint>,
}

impl KeyFile {
    /// Short {p, q, e} shape
    pub fn from_primes(p: BigUint, q: BigUint, e: BigUint) -> Self {
        Self { p, q, e, n: None, phi: None, d: None }
    }

    /// Read a key file, tolerating a leading UTF-8 byte order mark
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        serde_json::from_str(text).map_err(|source| KeyError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the key file as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|source| KeyError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// RSA public key (e, n)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaPublicKey {
    #[serde(with = "decimal")]
    pub e: BigUint,
    #[serde(with = "decimal")]
    pub n: BigUint,
}

impl RsaPublicKey {
    pub fn new(e: BigUint, n: BigUint) -> Self {
        Self { e, n }
    }

    /// Modulus width in bits
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }
}

/// Validated RSA key pair with all derived parameters
#[derive(Clone, PartialEq, Eq)]
pub struct RsaKeyPair {
    p: BigUint,
    q: BigUint,
    e: BigUint,
    n: BigUint,
    phi: BigUint,
    d: BigUint,
}

impl RsaKeyPair {
    /// Derive n, phi(n) and d from the primes and public exponent
    pub fn from_primes(p: BigUint, q: BigUint, e: BigUint) -> Result<Self> {
        let two = BigUint::from(2u32);
        if p < two {
            return Err(KeyError::InvalidFactor("p must be at least 2"));
        }
        if q < two {
            return Err(KeyError::InvalidFactor("q must be at least 2"));
        }
        if p == q {
            return Err(KeyError::InvalidFactor("p and q must be distinct"));
        }

        let n = &p * &q;
        let phi = (&p - 1u32) * (&q - 1u32);
        if e <= BigUint::one() || e >= phi {
            return Err(KeyError::NotInvertible(e));
        }
        let d = match e.modinv(&phi) {
            Some(d) => d,
            None => return Err(KeyError::NotInvertible(e)),
        };

        Ok(Self { p, q, e, n, phi, d })
    }

    /// Load from either key-file shape, validating any derived fields present
    pub fn from_key_file(file: &KeyFile) -> Result<Self> {
        let mut pair = Self::from_primes(file.p.clone(), file.q.clone(), file.e.clone())?;

        if let Some(n) = &file.n {
            if *n != pair.n {
                return Err(KeyError::Mismatch { field: "n" });
            }
        }
        if let Some(phi) = &file.phi {
            if *phi != pair.phi {
                return Err(KeyError::Mismatch { field: "phi(n)" });
            }
        }
        if let Some(d) = &file.d {
            if d.is_zero() || (&pair.e * d) % &pair.phi != BigUint::one() {
                return Err(KeyError::Mismatch { field: "d" });
            }
            pair.d = d.clone();
        }

        Ok(pair)
    }

    /// Full {p, q, e, n, phi(n), d} shape
    pub fn to_key_file(&self) -> KeyFile {
        KeyFile {
            p: self.p.clone(),
            q: self.q.clone(),
            e: self.e.clone(),
            n: Some(self.n.clone()),
            phi: Some(self.phi.clone()),
            d: Some(self.d.clone()),
        }
    }

    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::new(self.e.clone(), self.n.clone())
    }

    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    pub fn public_exponent(&self) -> &BigUint {
        &self.e
    }

    pub fn private_exponent(&self) -> &BigUint {
        &self.d
    }

    pub fn phi(&self) -> &BigUint {
        &self.phi
    }

    /// Modulus width in bits
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("e", &self.e)
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}
