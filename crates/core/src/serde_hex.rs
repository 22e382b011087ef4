//! Serde helpers for the `0x`-hex fields of the distribution document.
//!
//! Use with `#[serde(with = "dropcraft_core::serde_hex::amount")]` etc.

/// `Amount` as a minimal `0x` hex string. Decimal strings are also
/// accepted on input.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::{format_amount_hex, parse_amount, Amount};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_amount_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_amount(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte hash as a `0x` hex string.
pub mod hash {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::{format_hash, parse_hash, Hash32};

    pub fn serialize<S: Serializer>(value: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_hash(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_hash(&s).map_err(serde::de::Error::custom)
    }
}

/// List of 32-byte hashes as `0x` hex strings.
pub mod hashes {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::{format_hash, parse_hash, Hash32};

    pub fn serialize<S: Serializer>(values: &[Hash32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&format_hash(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash32>, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| parse_hash(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
