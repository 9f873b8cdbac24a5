/// RSA signing, verification and sealing over big integers
///
/// Signatures operate on integer digests. Encryption operates on text: the
/// message bytes are read as a big-endian integer, which must stay below the
/// modulus or the ciphertext could never be decoded.

use super::keys::{RsaKeyPair, RsaPublicKey};
use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RsaError {
    #[error("Digest of {digest_bits} bits does not fit a {modulus_bits}-bit modulus")]
    MessageOutOfRange { digest_bits: u64, modulus_bits: u64 },

    #[error("Encoded message of {message_bits} bits does not fit a {modulus_bits}-bit modulus")]
    EncodingOverflow { message_bits: u64, modulus_bits: u64 },

    #[error("Recovered plaintext is not a valid encoding")]
    DecodingFailed,
}

pub type Result<T> = std::result::Result<T, RsaError>;

/// `message_hash^d mod n`
pub fn sign(message_hash: &BigUint, d: &BigUint, n: &BigUint) -> Result<BigUint> {
    if message_hash >= n {
        return Err(RsaError::MessageOutOfRange {
            digest_bits: message_hash.bits(),
            modulus_bits: n.bits(),
        });
    }
    Ok(message_hash.modpow(d, n))
}

/// `signature^e mod n == expected_hash`
pub fn verify(signature: &BigUint, e: &BigUint, n: &BigUint, expected_hash: &BigUint) -> bool {
    signature.modpow(e, n) == *expected_hash
}

/// Big-endian integer value of the message bytes
pub fn encode_message(message: &str) -> BigUint {
    BigUint::from_bytes_be(message.as_bytes())
}

/// Inverse of `encode_message`
pub fn decode_message(value: &BigUint) -> Result<String> {
    if value.is_zero() {
        return Ok(String::new());
    }
    String::from_utf8(value.to_bytes_be()).map_err(|_| RsaError::DecodingFailed)
}

/// Encrypt text for the holder of `(e, n)`
pub fn encrypt(message: &str, e: &BigUint, n: &BigUint) -> Result<BigUint> {
    let m = encode_message(message);
    if m >= *n {
        return Err(RsaError::EncodingOverflow {
            message_bits: m.bits(),
            modulus_bits: n.bits(),
        });
    }
    Ok(m.modpow(e, n))
}

/// Decrypt text sealed with `encrypt`
pub fn decrypt(ciphertext: &BigUint, d: &BigUint, n: &BigUint) -> Result<String> {
    decode_message(&ciphertext.modpow(d, n))
}

/// Seal a quantity as its decimal text
pub fn encrypt_quantity(quantity: u64, key: &RsaPublicKey) -> Result<BigUint> {
    encrypt(&quantity.to_string(), &key.e, &key.n)
}

/// Open a sealed quantity back into the numeric domain
pub fn decrypt_quantity(ciphertext: &BigUint, key: &RsaKeyPair) -> Result<u64> {
    let text = decrypt(ciphertext, key.private_exponent(), key.modulus())?;
    text.parse().map_err(|_| RsaError::DecodingFailed)
}

impl RsaKeyPair {
    /// Sign an integer digest with this key
    pub fn sign_digest(&self, digest: &BigUint) -> Result<BigUint> {
        sign(digest, self.private_exponent(), self.modulus())
    }
}

impl RsaPublicKey {
    /// Check a signature over an integer digest
    pub fn verify_digest(&self, signature: &BigUint, digest: &BigUint) -> bool {
        verify(signature, &self.e, &self.n, digest)
    }

    /// Value recovered from a signature with this key
    pub fn recover(&self, signature: &BigUint) -> BigUint {
        signature.modpow(&self.e, &self.n)
    }
}
