//! Decimal text encoding for big integers
//!
//! Key files and audit documents carry integers as decimal strings so they
//! survive JSON tooling that truncates large numbers. Small values may also
//! appear as plain JSON integers.

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Text(String),
    Small(u64),
}

impl Repr {
    fn into_biguint(self) -> Result<BigUint, String> {
        match self {
            Repr::Small(value) => Ok(BigUint::from(value)),
            Repr::Text(text) => parse_decimal(&text)
                .ok_or_else(|| format!("invalid decimal integer: {:?}", text)),
        }
    }
}

/// Parse an unsigned decimal integer, ignoring surrounding whitespace
pub fn parse_decimal(text: &str) -> Option<BigUint> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(trimmed.as_bytes(), 10)
}

/// `#[serde(with = "decimal")]` for `BigUint`
pub mod decimal {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        Repr::deserialize(deserializer)?
            .into_biguint()
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "decimal_option")]` for `Option<BigUint>`
pub mod decimal_option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        Option::<Repr>::deserialize(deserializer)?
            .map(Repr::into_biguint)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "decimal_vec")]` for `Vec<BigUint>`
pub mod decimal_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(values: &[BigUint], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_str_radix(10))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<BigUint>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(Repr::into_biguint)
            .collect::<Result<_, _>>()
            .map_err(serde::de::Error::custom)
    }
}
