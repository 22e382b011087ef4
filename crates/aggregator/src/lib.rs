//! DropCraft Aggregator
//!
//! Collects per-source contribution data into one finalized map:
//! decodes raw mint calls into (recipient, amount) deltas, keeps them in an
//! append-only ledger, scales each source to its token budget, merges the
//! sources and removes addresses that were already paid in an earlier
//! airdrop.

pub mod abi;
pub mod decoder;
pub mod ledger;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dropcraft_core::{
    apportion, contributions_from_json, parse_amount, total, Address, Amount, ContributionMap,
    InputError,
};

pub use abi::{AbiError, AbiType, AbiValue, Selector};
pub use decoder::{CallAction, CallDecoder, Decoded, DecoderRegistry, RecipientSource, ResolvedCall};
pub use ledger::{ContributionDelta, DeltaLedger, LedgerEntry};

/// Aggregator errors
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("ABI decoding failed: {0}")]
    Abi(#[from] AbiError),

    #[error("No decoder for selector {0}")]
    UnknownSelector(String),

    #[error("Wrapped call wraps another wrapper")]
    RedecodeDepth,

    #[error("No amount for {0}: the call carries none and the record has no fallback")]
    MissingAmount(Address),

    #[error("Invalid decoder: {0}")]
    InvalidDecoder(String),

    #[error("Invalid call data: {0}")]
    InvalidCallData(String),

    #[error("Corrupt ledger at line {line}: {reason}")]
    CorruptLedger { line: usize, reason: String },

    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

/// A transaction to credit, as exported from a block explorer or node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub from: Address,
    /// `0x`-prefixed call data
    pub input: String,
    /// Amount to use when the call itself carries none (taken from the
    /// matching transfer event)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl CallRecord {
    pub fn input_bytes(&self) -> Result<Vec<u8>> {
        let digits = self.input.trim().strip_prefix("0x").unwrap_or(self.input.trim());
        hex::decode(digits).map_err(|e| AggregatorError::InvalidCallData(format!("{}: {e}", self.label())))
    }

    pub fn fallback_amount(&self) -> Result<Option<Amount>> {
        Ok(self.amount.as_deref().map(parse_amount).transpose()?)
    }

    fn label(&self) -> String {
        self.hash.clone().unwrap_or_else(|| format!("call from {}", self.from))
    }
}

/// Outcome counts of one [`ingest_calls`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: usize,
    pub unknown_selector: usize,
    pub missing_amount: usize,
    pub failed: usize,
}

/// Load call records from a JSON array or a JSONL file.
pub fn load_calls(path: &Path) -> Result<Vec<CallRecord>> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&contents)?);
    }
    let mut calls = Vec::new();
    for line in contents.lines() {
        if !line.trim().is_empty() {
            calls.push(serde_json::from_str(line)?);
        }
    }
    Ok(calls)
}

/// Decode every call and append one delta per credited recipient.
///
/// Records that cannot be credited are counted and skipped.
pub fn ingest_calls(
    ledger: &mut DeltaLedger,
    registry: &DecoderRegistry,
    source: &str,
    calls: &[CallRecord],
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    for call in calls {
        let input = call.input_bytes()?;
        let resolved = match registry.resolve(&input, &call.from) {
            Ok(resolved) => resolved,
            Err(AggregatorError::UnknownSelector(selector)) => {
                debug!("{}: no decoder for {}", call.label(), selector);
                stats.unknown_selector += 1;
                continue;
            }
            Err(e) => {
                warn!("{}: {}", call.label(), e);
                stats.failed += 1;
                continue;
            }
        };
        let amount = match resolved.amount {
            Some(amount) => amount,
            None => match call.fallback_amount()? {
                Some(amount) => amount,
                None => {
                    warn!("{}: {}", call.label(), AggregatorError::MissingAmount(resolved.recipient));
                    stats.missing_amount += 1;
                    continue;
                }
            },
        };
        ledger.append(source, resolved.recipient, amount);
        stats.accepted += 1;
    }
    info!(
        "Source {}: {} calls credited, {} unknown selectors, {} without amount, {} undecodable",
        source, stats.accepted, stats.unknown_selector, stats.missing_amount, stats.failed
    );
    Ok(stats)
}

/// Append every entry of a ready-made contribution map.
pub fn ingest_contributions(ledger: &mut DeltaLedger, source: &str, contributions: &ContributionMap) {
    for (address, amount) in contributions {
        ledger.append(source, *address, *amount);
    }
    info!("Source {}: {} addresses", source, contributions.len());
}

/// Load an `{ address: amount }` JSON file.
pub fn load_contributions(path: &Path) -> Result<ContributionMap> {
    Ok(contributions_from_json(&std::fs::read_to_string(path)?)?)
}

/// Load a set of addresses from a JSON array of addresses, an
/// `{ address: ... }` object, or a distribution document (its `claims`).
pub fn load_address_set(path: &Path) -> Result<BTreeSet<Address>> {
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let keys: Vec<String> = match &value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| InputError::InvalidAddress(format!("{}: non-string entry", path.display())))?,
        serde_json::Value::Object(map) => match map.get("claims").and_then(|c| c.as_object()) {
            Some(claims) => claims.keys().cloned().collect(),
            None => map.keys().cloned().collect(),
        },
        _ => {
            return Err(InputError::InvalidAddress(format!(
                "{}: expected an array or object",
                path.display()
            ))
            .into())
        }
    };
    let set = keys
        .iter()
        .map(|k| Address::parse(k))
        .collect::<std::result::Result<BTreeSet<_>, _>>()?;
    Ok(set)
}

/// Drop every address in `previous`.
pub fn exclude(contributions: &ContributionMap, previous: &BTreeSet<Address>) -> ContributionMap {
    let kept: ContributionMap = contributions
        .iter()
        .filter(|(address, _)| !previous.contains(*address))
        .map(|(address, amount)| (*address, *amount))
        .collect();
    info!(
        "Excluded {} previously paid addresses, {} remain",
        contributions.len() - kept.len(),
        kept.len()
    );
    kept
}

/// Scale a source's weights so they sum to exactly `budget`.
///
/// Shares are floored and the leftover units go to the largest remainders,
/// lower address first on ties. Addresses whose share rounds to zero are
/// dropped.
pub fn allocate_budget(contributions: &ContributionMap, budget: Amount) -> Result<ContributionMap> {
    if contributions.is_empty() {
        return Err(InputError::Empty.into());
    }
    let weights: Vec<(Address, Amount)> = contributions.iter().map(|(a, w)| (*a, *w)).collect();
    let shares = apportion(budget, &weights)?;
    let allocated: ContributionMap = weights
        .iter()
        .zip(shares)
        .filter(|(_, share)| !share.is_zero())
        .map(|((address, _), share)| (*address, share))
        .collect();
    debug!(
        "Allocated budget {} over {} of {} addresses",
        budget,
        allocated.len(),
        contributions.len()
    );
    Ok(allocated)
}

/// Sum several maps with checked addition.
pub fn merge(maps: &[ContributionMap]) -> Result<ContributionMap> {
    let mut merged = ContributionMap::new();
    for map in maps {
        for (address, amount) in map {
            let slot = merged.entry(*address).or_default();
            *slot = slot.checked_add(*amount).ok_or(InputError::Overflow)?;
        }
    }
    total(&merged)?;
    Ok(merged)
}
