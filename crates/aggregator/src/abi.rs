//! Minimal Solidity ABI decoding for call arguments.
//!
//! Covers the parameter types that show up in token mint and wrapper
//! calls: `address`, `uint<N>`, `int<N>`, `bool`, `bytes<N>`, `bytes`,
//! `string`, fixed arrays `T[k]` and dynamic arrays `T[]`. Tuples are not
//! supported.

use std::fmt;

use dropcraft_core::{keccak256, Address, U256};

/// ABI decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Call data truncated: need {needed} bytes at offset {offset}, have {len}")]
    Truncated { offset: usize, needed: usize, len: usize },

    #[error("Offset or length out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid {ty} value: {reason}")]
    InvalidValue { ty: String, reason: String },

    #[error("Value does not match type {0}")]
    TypeMismatch(String),
}

pub type Result<T> = std::result::Result<T, AbiError>;

/// 4-byte function selector
pub type Selector = [u8; 4];

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Uint(usize),
    Int(usize),
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
}

impl AbiType {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }
        if let Some(body) = s.strip_suffix(']') {
            let open = body
                .rfind('[')
                .ok_or_else(|| AbiError::UnsupportedType(s.to_string()))?;
            let len: usize = body[open + 1..]
                .parse()
                .map_err(|_| AbiError::UnsupportedType(s.to_string()))?;
            if len == 0 {
                return Err(AbiError::UnsupportedType(s.to_string()));
            }
            return Ok(Self::FixedArray(Box::new(Self::parse(&body[..open])?), len));
        }

        match s {
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "bytes" => Ok(Self::Bytes),
            "string" => Ok(Self::String),
            "uint" => Ok(Self::Uint(256)),
            "int" => Ok(Self::Int(256)),
            _ => {
                if let Some(bits) = s.strip_prefix("uint") {
                    Ok(Self::Uint(parse_bits(s, bits)?))
                } else if let Some(bits) = s.strip_prefix("int") {
                    Ok(Self::Int(parse_bits(s, bits)?))
                } else if let Some(size) = s.strip_prefix("bytes") {
                    match size.parse::<usize>() {
                        Ok(n) if (1..=32).contains(&n) => Ok(Self::FixedBytes(n)),
                        _ => Err(AbiError::UnsupportedType(s.to_string())),
                    }
                } else {
                    Err(AbiError::UnsupportedType(s.to_string()))
                }
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes | Self::String | Self::Array(_) => true,
            Self::FixedArray(inner, _) => inner.is_dynamic(),
            _ => false,
        }
    }

    /// Bytes this type occupies in the head of its enclosing tuple.
    pub fn head_len(&self) -> usize {
        match self {
            Self::FixedArray(inner, len) if !inner.is_dynamic() => inner.head_len() * len,
            _ => WORD,
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => f.write_str("address"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Bool => f.write_str("bool"),
            Self::FixedBytes(n) => write!(f, "bytes{n}"),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
            Self::Array(inner) => write!(f, "{inner}[]"),
            Self::FixedArray(inner, len) => write!(f, "{inner}[{len}]"),
        }
    }
}

fn parse_bits(full: &str, bits: &str) -> Result<usize> {
    match bits.parse::<usize>() {
        Ok(n) if n % 8 == 0 && (8..=256).contains(&n) => Ok(n),
        _ => Err(AbiError::UnsupportedType(full.to_string())),
    }
}

/// Split `name(type,type,...)` into its name and parameter types.
pub fn parse_signature(signature: &str) -> Result<(String, Vec<AbiType>)> {
    let malformed = || AbiError::MalformedSignature(signature.to_string());
    let open = signature.find('(').ok_or_else(malformed)?;
    let args = signature[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
    let name = &signature[..open];
    if name.is_empty() || args.contains('(') || args.contains(')') || signature.contains(' ') {
        return Err(malformed());
    }
    let params = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',').map(AbiType::parse).collect::<Result<Vec<_>>>()?
    };
    Ok((name.to_string(), params))
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    /// Two's complement word, uninterpreted
    Int(U256),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
}

impl AbiValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Decode `data` (call data without the selector) as a tuple of `types`.
pub fn decode(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>> {
    decode_tuple(types, data, 0)
}

fn word(data: &[u8], at: usize) -> Result<&[u8; 32]> {
    at.checked_add(WORD)
        .and_then(|end| data.get(at..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(AbiError::Truncated { offset: at, needed: WORD, len: data.len() })
}

/// Read a word as an offset or length bounded by the data length.
fn read_len(data: &[u8], at: usize) -> Result<usize> {
    let value = U256::from_big_endian(word(data, at)?);
    if value > U256::from(data.len()) {
        return Err(AbiError::OutOfRange(format!("{value} at offset {at}")));
    }
    Ok(value.as_usize())
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or(AbiError::Truncated { offset: at, needed: len, len: data.len() })
}

fn decode_tuple(types: &[AbiType], data: &[u8], base: usize) -> Result<Vec<AbiValue>> {
    let mut values = Vec::with_capacity(types.len());
    let mut head = base;
    for ty in types {
        let value = if ty.is_dynamic() {
            let offset = read_len(data, head)?;
            let at = base
                .checked_add(offset)
                .ok_or_else(|| AbiError::OutOfRange(format!("offset {offset}")))?;
            decode_at(ty, data, at)?
        } else {
            decode_at(ty, data, head)?
        };
        values.push(value);
        head += ty.head_len();
    }
    Ok(values)
}

fn decode_at(ty: &AbiType, data: &[u8], at: usize) -> Result<AbiValue> {
    let invalid = |reason: &str| AbiError::InvalidValue {
        ty: ty.to_string(),
        reason: reason.to_string(),
    };

    match ty {
        AbiType::Address => {
            let w = word(data, at)?;
            if w[..12].iter().any(|b| *b != 0) {
                return Err(invalid("dirty high bytes"));
            }
            Ok(AbiValue::Address(Address::from_word(w)))
        }
        AbiType::Uint(bits) => {
            let value = U256::from_big_endian(word(data, at)?);
            if value.bits() > *bits {
                return Err(invalid("exceeds type width"));
            }
            Ok(AbiValue::Uint(value))
        }
        AbiType::Int(_) => Ok(AbiValue::Int(U256::from_big_endian(word(data, at)?))),
        AbiType::Bool => {
            let value = U256::from_big_endian(word(data, at)?);
            if value.is_zero() {
                Ok(AbiValue::Bool(false))
            } else if value == U256::one() {
                Ok(AbiValue::Bool(true))
            } else {
                Err(invalid("not 0 or 1"))
            }
        }
        AbiType::FixedBytes(n) => Ok(AbiValue::FixedBytes(word(data, at)?[..*n].to_vec())),
        AbiType::Bytes => {
            let len = read_len(data, at)?;
            Ok(AbiValue::Bytes(slice(data, at + WORD, len)?.to_vec()))
        }
        AbiType::String => {
            let len = read_len(data, at)?;
            let bytes = slice(data, at + WORD, len)?;
            String::from_utf8(bytes.to_vec())
                .map(AbiValue::String)
                .map_err(|_| invalid("not UTF-8"))
        }
        AbiType::Array(inner) => {
            let len = read_len(data, at)?;
            let start = at + WORD;
            let remaining = data.len().saturating_sub(start);
            if len.saturating_mul(inner.head_len()) > remaining {
                return Err(AbiError::Truncated {
                    offset: start,
                    needed: len.saturating_mul(inner.head_len()),
                    len: data.len(),
                });
            }
            let types = vec![(**inner).clone(); len];
            Ok(AbiValue::Array(decode_tuple(&types, data, start)?))
        }
        AbiType::FixedArray(inner, len) => {
            let types = vec![(**inner).clone(); *len];
            Ok(AbiValue::Array(decode_tuple(&types, data, at)?))
        }
    }
}

/// Encode `values` as a tuple of `types`.
pub fn encode(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>> {
    if types.len() != values.len() {
        return Err(AbiError::TypeMismatch(format!(
            "{} types for {} values",
            types.len(),
            values.len()
        )));
    }
    encode_tuple(types, values)
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, values: &[AbiValue]) -> Result<Vec<u8>> {
    let (_, params) = parse_signature(signature)?;
    let mut out = selector(signature).to_vec();
    out.extend(encode(&params, values)?);
    Ok(out)
}

fn encode_tuple(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>> {
    let head_len: usize = types.iter().map(AbiType::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for (ty, value) in types.iter().zip(values) {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }
    head.extend(tail);
    Ok(head)
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

fn padded(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.resize(bytes.len().div_ceil(WORD) * WORD, 0);
    out
}

fn encode_value(ty: &AbiType, value: &AbiValue) -> Result<Vec<u8>> {
    match (ty, value) {
        (AbiType::Address, AbiValue::Address(address)) => {
            let mut out = vec![0u8; 12];
            out.extend_from_slice(address.as_bytes());
            Ok(out)
        }
        (AbiType::Uint(_), AbiValue::Uint(v)) | (AbiType::Int(_), AbiValue::Int(v)) => {
            Ok(uint_word(*v).to_vec())
        }
        (AbiType::Bool, AbiValue::Bool(b)) => Ok(uint_word(U256::from(*b as u8)).to_vec()),
        (AbiType::FixedBytes(n), AbiValue::FixedBytes(bytes)) if bytes.len() == *n => {
            Ok(padded(bytes))
        }
        (AbiType::Bytes, AbiValue::Bytes(bytes)) => {
            let mut out = uint_word(U256::from(bytes.len())).to_vec();
            out.extend(padded(bytes));
            Ok(out)
        }
        (AbiType::String, AbiValue::String(s)) => {
            let mut out = uint_word(U256::from(s.len())).to_vec();
            out.extend(padded(s.as_bytes()));
            Ok(out)
        }
        (AbiType::Array(inner), AbiValue::Array(items)) => {
            let types = vec![(**inner).clone(); items.len()];
            let mut out = uint_word(U256::from(items.len())).to_vec();
            out.extend(encode_tuple(&types, items)?);
            Ok(out)
        }
        (AbiType::FixedArray(inner, len), AbiValue::Array(items)) if items.len() == *len => {
            let types = vec![(**inner).clone(); *len];
            encode_tuple(&types, items)
        }
        _ => Err(AbiError::TypeMismatch(ty.to_string())),
    }
}
