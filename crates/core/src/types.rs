use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::{InputError, Result};

/// Token amount in base units.
///
/// 256 bits wide, matching the `uint256` the claim contract decodes.
pub type Amount = primitive_types::U256;

/// 32-byte hash (leaf, node or root)
pub type Hash32 = [u8; 32];

/// Finalized contribution weights, keyed by address.
///
/// Iteration order (ascending address bytes) is the canonical order used
/// for index assignment.
pub type ContributionMap = BTreeMap<Address, Amount>;

/// keccak-256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> Hash32 {
    Keccak256::digest(data).into()
}

/// 20-byte account address.
///
/// Parsed once at ingestion (any case, with or without `0x`) and compared
/// as raw bytes from then on. Displays in EIP-55 checksummed form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Take the low 20 bytes of a 32-byte ABI word.
    pub fn from_word(word: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Self(bytes)
    }

    /// Parse a hex address.
    ///
    /// All-lowercase and all-uppercase input is accepted as is. Mixed-case
    /// input must carry a valid EIP-55 checksum.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 40 {
            return Err(InputError::InvalidAddress(format!(
                "{s}: expected 40 hex chars, got {}",
                digits.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| InputError::InvalidAddress(format!("{s}: {e}")))?;
        let address = Self(bytes);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(InputError::InvalidAddress(format!("{s}: bad EIP-55 checksum")));
        }
        Ok(address)
    }

    /// EIP-55 mixed-case representation, `0x`-prefixed.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse an amount from a decimal or `0x`-prefixed hex string.
pub fn parse_amount(s: &str) -> Result<Amount> {
    let trimmed = s.trim();
    if trimmed.starts_with('-') {
        return Err(InputError::InvalidAmount(format!("{s}: negative")));
    }
    if let Some(digits) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if digits.is_empty() || digits.len() > 64 {
            return Err(InputError::InvalidAmount(s.to_string()));
        }
        return Amount::from_str_radix(digits, 16)
            .map_err(|_| InputError::InvalidAmount(s.to_string()));
    }
    if trimmed.is_empty() {
        return Err(InputError::InvalidAmount(s.to_string()));
    }
    Amount::from_dec_str(trimmed).map_err(|_| InputError::InvalidAmount(s.to_string()))
}

/// Lowercase, minimal, `0x`-prefixed hex (`0x0` for zero).
pub fn format_amount_hex(amount: &Amount) -> String {
    format!("{:#x}", amount)
}

/// Largest `decimals` a token scale can have: `10^77` is the biggest power
/// of ten below `U256::MAX`.
pub const MAX_DECIMALS: u32 = 77;

/// Human-readable decimal with `decimals` fractional digits, trailing zeros
/// trimmed (`20000000000000000000`, 18 -> `20`). Above [`MAX_DECIMALS`] the
/// plain base-unit integer is returned.
pub fn format_units(amount: &Amount, decimals: u32) -> String {
    if decimals > MAX_DECIMALS {
        return amount.to_string();
    }
    let scale = Amount::exp10(decimals as usize);
    let whole = *amount / scale;
    let frac = *amount % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// `0x`-prefixed lowercase hex of a 32-byte hash
pub fn format_hash(hash: &Hash32) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a `0x`-prefixed (or bare) 32-byte hex hash
pub fn parse_hash(s: &str) -> Result<Hash32> {
    let digits = s.trim().strip_prefix("0x").unwrap_or(s.trim());
    let mut out = [0u8; 32];
    hex::decode_to_slice(digits, &mut out).map_err(|e| InputError::InvalidHash(format!("{s}: {e}")))?;
    Ok(out)
}

/// Checked sum of all amounts.
pub fn total(contributions: &ContributionMap) -> Result<Amount> {
    contributions
        .values()
        .try_fold(Amount::zero(), |acc, v| acc.checked_add(*v).ok_or(InputError::Overflow))
}

/// Build a finalized map from `(address, amount)` pairs.
///
/// Every address must appear exactly once; a repeated address is rejected
/// instead of being merged. Empty input is rejected.
pub fn contributions_from_pairs<I>(pairs: I) -> Result<ContributionMap>
where
    I: IntoIterator<Item = (Address, Amount)>,
{
    let mut map = ContributionMap::new();
    for (address, amount) in pairs {
        if map.insert(address, amount).is_some() {
            return Err(InputError::DuplicateAddress(address));
        }
    }
    if map.is_empty() {
        return Err(InputError::Empty);
    }
    total(&map)?;
    Ok(map)
}

/// Raw JSON object entries in document order, duplicates preserved.
struct RawEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping address to amount")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<RawEntries, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    entries.push((key, value));
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

fn amount_from_json(value: &serde_json::Value) -> Result<Amount> {
    match value {
        serde_json::Value::String(s) => parse_amount(s),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(Amount::from(v))
            } else if n.as_i64().is_some_and(|v| v < 0) {
                Err(InputError::InvalidAmount(format!("{n}: negative")))
            } else {
                Err(InputError::InvalidAmount(format!(
                    "{n}: not an exact integer, encode large amounts as strings"
                )))
            }
        }
        other => Err(InputError::InvalidAmount(other.to_string())),
    }
}

/// Parse a JSON object `{ "<address>": <amount>, ... }`.
///
/// Amounts may be JSON integers (up to `u64`) or decimal/hex strings. Two
/// keys that spell the same address in different case count as duplicates.
pub fn contributions_from_json(json: &str) -> Result<ContributionMap> {
    let raw: RawEntries = serde_json::from_str(json)
        .map_err(|e| InputError::InvalidAmount(format!("malformed contribution JSON: {e}")))?;
    let mut pairs = Vec::with_capacity(raw.0.len());
    for (key, value) in &raw.0 {
        pairs.push((Address::parse(key)?, amount_from_json(value)?));
    }
    contributions_from_pairs(pairs)
}

/// Serialize a map as `{ "<checksummed address>": "<decimal>" }`.
pub fn contributions_to_json(contributions: &ContributionMap) -> String {
    let object: serde_json::Map<String, serde_json::Value> = contributions
        .iter()
        .map(|(address, amount)| (address.to_checksum(), serde_json::Value::String(amount.to_string())))
        .collect();
    serde_json::Value::Object(object).to_string()
}
