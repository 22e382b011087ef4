//! Append-only log of contribution deltas.
//!
//! Every source appends `(source, address, amount)` deltas as it is
//! scanned. The log is the audit trail; [`DeltaLedger::finalize`] folds it
//! into the immutable contribution map the engine consumes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dropcraft_core::{Address, Amount, ContributionMap, InputError};

use crate::{AggregatorError, Result};

/// One credited amount from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionDelta {
    pub source: String,
    pub address: Address,
    pub amount: Amount,
}

/// A delta with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Global monotonic sequence number
    pub seq: u64,
    /// Unix seconds when appended
    pub recorded_at: u64,
    pub delta: ContributionDelta,
}

#[derive(Debug, Clone, Default)]
pub struct DeltaLedger {
    entries: Vec<LedgerEntry>,
    next_seq: u64,
    flushed_count: usize,
}

impl DeltaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from loaded entries; all of them count as flushed.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        let next_seq = entries.last().map_or(0, |e| e.seq + 1);
        let flushed_count = entries.len();
        Self { entries, next_seq, flushed_count }
    }

    /// Append a delta and return its sequence number.
    pub fn append(&mut self, source: &str, address: Address, amount: Amount) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let seq = self.next_seq;
        self.entries.push(LedgerEntry {
            seq,
            recorded_at: now,
            delta: ContributionDelta {
                source: source.to_string(),
                address,
                amount,
            },
        });
        self.next_seq += 1;
        seq
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence number the next append will get.
    pub fn height(&self) -> u64 {
        self.next_seq
    }

    /// Entries with `seq >= seq`.
    pub fn since(&self, seq: u64) -> &[LedgerEntry] {
        let start = self.entries.partition_point(|e| e.seq < seq);
        &self.entries[start..]
    }

    /// Entries not yet written by [`flush`](Self::flush).
    pub fn unflushed(&self) -> &[LedgerEntry] {
        &self.entries[self.flushed_count..]
    }

    pub fn sources(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.delta.source.as_str()).collect()
    }

    /// Sum all deltas per address. Addresses that sum to zero are dropped.
    pub fn finalize(&self) -> Result<ContributionMap> {
        fold(self.entries.iter())
    }

    /// Like [`finalize`](Self::finalize), restricted to one source.
    pub fn finalize_source(&self, source: &str) -> Result<ContributionMap> {
        fold(self.entries.iter().filter(|e| e.delta.source == source))
    }

    /// Append unflushed entries to a JSONL file.
    pub fn flush(&mut self, path: &Path) -> Result<usize> {
        let unflushed = self.unflushed();
        if unflushed.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let count = unflushed.len();
        for entry in unflushed {
            writeln!(file, "{}", serde_json::to_string(entry)?)?;
        }
        self.flushed_count = self.entries.len();
        info!("Flushed {} ledger entries to {}", count, path.display());
        Ok(count)
    }

    /// Load a JSONL ledger. A missing file is an empty ledger.
    ///
    /// A line that does not parse, or whose `seq` does not increase, is a
    /// [`CorruptLedger`](AggregatorError::CorruptLedger) error. Skipping it
    /// would leave its source recorded with a delta missing.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = std::io::BufReader::new(file);
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry = serde_json::from_str(&line).map_err(|e| {
                AggregatorError::CorruptLedger { line: line_no + 1, reason: e.to_string() }
            })?;
            if let Some(last) = entries.last() {
                if last.seq >= entry.seq {
                    return Err(AggregatorError::CorruptLedger {
                        line: line_no + 1,
                        reason: format!("seq {} after {}", entry.seq, last.seq),
                    });
                }
            }
            entries.push(entry);
        }
        if !entries.is_empty() {
            info!("Loaded {} ledger entries from {}", entries.len(), path.display());
        }
        Ok(Self::from_entries(entries))
    }
}

fn fold<'a>(entries: impl Iterator<Item = &'a LedgerEntry>) -> Result<ContributionMap> {
    let mut sums: BTreeMap<Address, Amount> = BTreeMap::new();
    for entry in entries {
        let slot = sums.entry(entry.delta.address).or_default();
        *slot = slot
            .checked_add(entry.delta.amount)
            .ok_or(InputError::Overflow)?;
    }
    let before = sums.len();
    sums.retain(|_, amount| !amount.is_zero());
    debug!("Folded ledger into {} addresses ({} zero totals dropped)", sums.len(), before - sums.len());
    Ok(sums)
}
