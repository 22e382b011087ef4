//! Floor-and-fund smoothing.
//!
//! 1. Every address with `raw <= threshold` is raised to `threshold`.
//! 2. `deficit = sum(boosted) - sum(raw)`.
//! 3. The surplus pool is every address with `raw > threshold + surplus_band`;
//!    the band keeps holders just above the floor out of the clawback.
//! 4. The deficit is taken from the pool in proportion to raw amounts,
//!    split exactly with the largest-remainder rule, so the total is
//!    conserved to the base unit.
//!
//! Zero weights are raised like any other small amount. The output has the
//! same key set as the input.

use tracing::{debug, info, warn};

use dropcraft_core::{apportion, format_units, total, Address, Amount, ContributionMap, InputError};

use crate::DistributionStats;

/// Smoothing parameters, in token base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeParams {
    /// Minimum amount every recipient ends with
    pub threshold: Amount,
    /// Buffer above the threshold that is never clawed back
    pub surplus_band: Amount,
}

impl NormalizeParams {
    pub fn new(threshold: Amount, surplus_band: Amount) -> Self {
        Self { threshold, surplus_band }
    }
}

/// Normalization failures. Any of these aborts the run with no output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("Insufficient surplus: deficit {deficit} cannot be funded from pool total {pool_total}")]
    InsufficientSurplus { deficit: Amount, pool_total: Amount },

    #[error("Conservation violation: total before {before}, after {after}")]
    ConservationViolation { before: Amount, after: Amount },

    #[error("Negative deficit: boosted total fell below the raw total")]
    NegativeDeficit,
}

pub type Result<T> = std::result::Result<T, NormalizeError>;

/// What a normalization run changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Addresses raised to the threshold
    pub boosted: usize,
    /// Addresses in the surplus pool
    pub reduced: usize,
    /// Units moved from the pool to boosted addresses
    pub deficit: Amount,
    /// Raw total of the surplus pool
    pub pool_total: Amount,
    pub before: DistributionStats,
    pub after: DistributionStats,
}

/// Normalize a finalized contribution map.
pub fn normalize(contributions: &ContributionMap, params: &NormalizeParams) -> Result<ContributionMap> {
    normalize_with_report(contributions, params).map(|(normalized, _)| normalized)
}

/// Normalize and report what changed.
pub fn normalize_with_report(
    contributions: &ContributionMap,
    params: &NormalizeParams,
) -> Result<(ContributionMap, NormalizeReport)> {
    if contributions.is_empty() {
        return Err(InputError::Empty.into());
    }
    let baseline_total = total(contributions)?;
    let pool_floor = params
        .threshold
        .checked_add(params.surplus_band)
        .ok_or(InputError::Overflow)?;

    let mut normalized = contributions.clone();
    let mut boosted = 0usize;
    for (address, amount) in normalized.iter_mut() {
        if *amount <= params.threshold {
            debug!("Boosting {} from {} to threshold {}", address, amount, params.threshold);
            *amount = params.threshold;
            boosted += 1;
        }
    }

    let boosted_total = total(&normalized)?;
    let deficit = boosted_total
        .checked_sub(baseline_total)
        .ok_or(NormalizeError::NegativeDeficit)?;

    let pool: Vec<(Address, Amount)> = contributions
        .iter()
        .filter(|(_, raw)| **raw > pool_floor)
        .map(|(address, raw)| (*address, *raw))
        .collect();
    // Subset of an already-checked total, cannot overflow.
    let pool_total = pool.iter().fold(Amount::zero(), |acc, (_, raw)| acc + *raw);

    info!(
        "Smoothing {} recipients: {} boosted, deficit {}, surplus pool {} addresses holding {}",
        contributions.len(),
        boosted,
        deficit,
        pool.len(),
        pool_total,
    );

    if !deficit.is_zero() {
        if pool_total.is_zero() || deficit > pool_total {
            warn!(
                "Surplus pool ({}) cannot fund deficit ({}); check threshold and band",
                pool_total, deficit
            );
            return Err(NormalizeError::InsufficientSurplus { deficit, pool_total });
        }

        let reductions = apportion(deficit, &pool)?;
        for ((address, raw), reduction) in pool.iter().zip(reductions) {
            // deficit <= pool_total keeps every share within its raw amount.
            let reduced = raw
                .checked_sub(reduction)
                .ok_or(NormalizeError::InsufficientSurplus { deficit, pool_total })?;
            if reduced < params.threshold {
                warn!(
                    "Reducing {} from {} by {} would drop it below the threshold",
                    address, raw, reduction
                );
                return Err(NormalizeError::InsufficientSurplus { deficit, pool_total });
            }
            debug!("Reducing {} by {}: {} -> {}", address, reduction, raw, reduced);
            normalized.insert(*address, reduced);
        }
    }

    let final_total = total(&normalized)?;
    if final_total != baseline_total {
        return Err(NormalizeError::ConservationViolation {
            before: baseline_total,
            after: final_total,
        });
    }

    let report = NormalizeReport {
        boosted,
        reduced: pool.len(),
        deficit,
        pool_total,
        before: DistributionStats::of(contributions)?,
        after: DistributionStats::of(&normalized)?,
    };
    debug!(
        "Normalization conserved total {} ({} at 18 decimals)",
        final_total,
        format_units(&final_total, 18),
    );

    Ok((normalized, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn amt(n: u64) -> Amount {
        Amount::from(n)
    }

    fn params(threshold: u64, band: u64) -> NormalizeParams {
        NormalizeParams::new(amt(threshold), amt(band))
    }

    fn map(entries: &[(u8, u64)]) -> ContributionMap {
        entries.iter().map(|(a, v)| (addr(*a), amt(*v))).collect()
    }

    #[test]
    fn test_worked_example() {
        let input = map(&[(0xA, 5), (0xB, 25), (0xC, 100)]);
        let (output, report) = normalize_with_report(&input, &params(20, 5)).unwrap();

        assert_eq!(output, map(&[(0xA, 20), (0xB, 25), (0xC, 85)]));
        assert_eq!(report.boosted, 1);
        assert_eq!(report.reduced, 1);
        assert_eq!(report.deficit, amt(15));
        assert_eq!(report.pool_total, amt(100));
        assert_eq!(report.before.total, amt(130));
        assert_eq!(report.after.total, amt(130));
    }

    #[test]
    fn test_nothing_below_threshold_is_identity() {
        let input = map(&[(1, 50), (2, 60), (3, 700)]);
        assert_eq!(normalize(&input, &params(20, 5)).unwrap(), input);
    }

    #[test]
    fn test_exactly_threshold_counts_as_boosted_without_change() {
        let input = map(&[(1, 20), (2, 100)]);
        let (output, report) = normalize_with_report(&input, &params(20, 5)).unwrap();
        assert_eq!(output, input);
        assert_eq!(report.boosted, 1);
        assert_eq!(report.deficit, Amount::zero());
    }

    #[test]
    fn test_band_boundary_excluded_from_pool() {
        // 25 == threshold + band is not in the pool; 26 is.
        let input = map(&[(1, 10), (2, 25), (3, 26), (4, 200)]);
        let output = normalize(&input, &params(20, 5)).unwrap();
        assert_eq!(output[&addr(2)], amt(25));
        assert!(output[&addr(3)] < amt(26));
        assert_eq!(dropcraft_core::total(&output).unwrap(), amt(261));
    }

    #[test]
    fn test_zero_weight_is_boosted() {
        // Deficit 20 + 15 = 35, all taken from the single pool member.
        let input = map(&[(1, 0), (2, 5), (3, 100)]);
        let (output, report) = normalize_with_report(&input, &params(20, 5)).unwrap();
        assert_eq!(output, map(&[(1, 20), (2, 20), (3, 65)]));
        assert_eq!(report.boosted, 2);
        assert_eq!(report.deficit, amt(35));
    }

    #[test]
    fn test_only_zero_weights_need_a_pool() {
        let input = map(&[(1, 0), (2, 24)]);
        assert_eq!(
            normalize(&input, &params(20, 5)),
            Err(NormalizeError::InsufficientSurplus { deficit: amt(20), pool_total: Amount::zero() })
        );
    }

    #[test]
    fn test_rounding_is_conserved() {
        // deficit 17 over pool {100, 100, 100}: 5.67 each -> 6, 6, 5
        let input = map(&[(1, 3), (2, 100), (3, 100), (4, 100)]);
        let output = normalize(&input, &params(20, 5)).unwrap();
        assert_eq!(output[&addr(1)], amt(20));
        assert_eq!(output[&addr(2)], amt(94));
        assert_eq!(output[&addr(3)], amt(94));
        assert_eq!(output[&addr(4)], amt(95));
        assert_eq!(dropcraft_core::total(&output).unwrap(), amt(303));
    }

    #[test]
    fn test_empty_pool_fails() {
        let input = map(&[(1, 5), (2, 22)]);
        assert_eq!(
            normalize(&input, &params(20, 5)),
            Err(NormalizeError::InsufficientSurplus { deficit: amt(15), pool_total: Amount::zero() })
        );
    }

    #[test]
    fn test_pool_too_small_fails() {
        // Deficit 38, pool {30}: the pool holder would drop below the floor.
        let input = map(&[(1, 1), (2, 1), (3, 30)]);
        assert!(matches!(
            normalize(&input, &params(20, 5)),
            Err(NormalizeError::InsufficientSurplus { .. })
        ));
    }

    #[test]
    fn test_pool_member_below_floor_fails() {
        // Deficit 19 from pool {26, 1000}: 26 loses 0 or 1, 1000 loses ~18 - ok.
        let ok = map(&[(1, 1), (2, 26), (3, 1000)]);
        assert!(normalize(&ok, &params(20, 5)).is_ok());

        // Deficit 38 from pool {26, 30}: both would fall below 20.
        let bad = map(&[(1, 1), (2, 1), (3, 26), (4, 30)]);
        assert!(matches!(
            normalize(&bad, &params(20, 5)),
            Err(NormalizeError::InsufficientSurplus { .. })
        ));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            normalize(&ContributionMap::new(), &params(20, 5)),
            Err(NormalizeError::Input(InputError::Empty))
        );
    }

    #[test]
    fn test_overflowing_input() {
        let mut input = ContributionMap::new();
        input.insert(addr(1), Amount::MAX);
        input.insert(addr(2), amt(1));
        assert_eq!(
            normalize(&input, &params(20, 5)),
            Err(NormalizeError::Input(InputError::Overflow))
        );
    }

    #[test]
    fn test_ether_scale() {
        let eth = Amount::exp10(18);
        let mut input = ContributionMap::new();
        for i in 1..=50u8 {
            // 0.37 .. 18.5 ether, all below a 20 ether floor
            input.insert(addr(i), eth * amt(i as u64 * 37) / amt(100));
        }
        for i in 51..=60u8 {
            input.insert(addr(i), eth * amt(i as u64 * 1_000 + 7) + amt(i as u64));
        }
        let p = NormalizeParams::new(eth * amt(20), eth * amt(5));
        let output = normalize(&input, &p).unwrap();

        assert_eq!(total(&output).unwrap(), total(&input).unwrap());
        for address in input.keys() {
            assert!(output[address] >= p.threshold);
        }
    }

    fn arb_input() -> impl Strategy<Value = ContributionMap> {
        (
            proptest::collection::vec(0u64..=25, 0..20),
            proptest::collection::vec(1_000u64..1_000_000, 1..20),
        )
            .prop_map(|(small, large)| {
                small
                    .into_iter()
                    .chain(large)
                    .enumerate()
                    .map(|(i, v)| (Address::from_bytes([i as u8; 20]), Amount::from(v)))
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_conservation_floor_and_monotonicity(input in arb_input()) {
            let p = params(20, 5);
            let output = normalize(&input, &p).unwrap();

            prop_assert_eq!(total(&output).unwrap(), total(&input).unwrap());
            prop_assert_eq!(output.len(), input.len());

            for address in input.keys() {
                prop_assert!(output[address] >= p.threshold);
            }

            let pool: Vec<(&Address, &Amount)> =
                input.iter().filter(|(_, raw)| **raw > amt(25)).collect();
            for (a, raw_a) in &pool {
                for (b, raw_b) in &pool {
                    if raw_a > raw_b {
                        prop_assert!(output[*a] >= output[*b]);
                    }
                }
            }
        }
    }
}
