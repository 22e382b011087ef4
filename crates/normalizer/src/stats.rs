//! Summary statistics over a contribution map.

use std::fmt;

use tracing::info;

use dropcraft_core::{format_units, total, Amount, ContributionMap, InputError};

/// Count, sum and spread of a set of allocations.
///
/// `mean` and `median` are floored to whole base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionStats {
    pub count: usize,
    pub total: Amount,
    pub mean: Amount,
    pub median: Amount,
    pub highest: Amount,
    pub lowest: Amount,
}

impl DistributionStats {
    /// Compute statistics for a non-empty map.
    pub fn of(contributions: &ContributionMap) -> Result<Self, InputError> {
        if contributions.is_empty() {
            return Err(InputError::Empty);
        }
        let sum = total(contributions)?;
        let mut values: Vec<Amount> = contributions.values().copied().collect();
        values.sort_unstable();

        let count = values.len();
        let mid = count / 2;
        let median = if count % 2 == 1 {
            values[mid]
        } else {
            // Halve before adding so two values near U256::MAX cannot overflow.
            let (a, b) = (values[mid - 1], values[mid]);
            a / 2 + b / 2 + (a % 2 + b % 2) / 2
        };

        Ok(Self {
            count,
            total: sum,
            mean: sum / Amount::from(count),
            median,
            highest: values[count - 1],
            lowest: values[0],
        })
    }

    /// Log at info level, amounts scaled by `decimals`.
    pub fn log(&self, label: &str, decimals: u32) {
        info!(
            "{}: recipients={} sum={} mean={} median={} max={} min={} (min in base units: {})",
            label,
            self.count,
            format_units(&self.total, decimals),
            format_units(&self.mean, decimals),
            format_units(&self.median, decimals),
            format_units(&self.highest, decimals),
            format_units(&self.lowest, decimals),
            self.lowest,
        );
    }
}

impl fmt::Display for DistributionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recipients={} sum={} mean={} median={} max={} min={}",
            self.count, self.total, self.mean, self.median, self.highest, self.lowest
        )
    }
}
