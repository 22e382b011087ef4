//! Exact proportional splitting.
//!
//! Each share is the rational `units * weight / total_weight`. Shares are
//! floored first; the leftover units (fewer than the number of weights) go
//! one each to the largest remainders, ties to the lower address. The
//! shares always sum to exactly `units`.

use std::cmp::Ordering;

use primitive_types::{U256, U512};

use crate::{Address, Amount, InputError, Result};

fn narrow(value: U512) -> Option<U256> {
    let U512(limbs) = value;
    if limbs[4..].iter().any(|&l| l != 0) {
        return None;
    }
    Some(U256([limbs[0], limbs[1], limbs[2], limbs[3]]))
}

/// Split `units` across `weights` in proportion to each weight.
///
/// Returns one share per weight, in input order. Fails if the weights sum
/// to zero while `units` is non-zero, or if the weight sum overflows.
pub fn apportion(units: Amount, weights: &[(Address, Amount)]) -> Result<Vec<Amount>> {
    let weight_total = weights
        .iter()
        .try_fold(Amount::zero(), |acc, (_, w)| acc.checked_add(*w))
        .ok_or(InputError::Overflow)?;

    if units.is_zero() {
        return Ok(vec![Amount::zero(); weights.len()]);
    }
    if weight_total.is_zero() {
        return Err(InputError::InvalidAmount(
            "cannot apportion over zero total weight".to_string(),
        ));
    }

    let divisor = U512::from(weight_total);
    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    let mut floored = Amount::zero();
    for (_, weight) in weights {
        let product = U512::from(units) * U512::from(*weight);
        // weight <= weight_total, so the quotient never exceeds `units`.
        let share = narrow(product / divisor).ok_or(InputError::Overflow)?;
        floored = floored.checked_add(share).ok_or(InputError::Overflow)?;
        shares.push(share);
        remainders.push(product % divisor);
    }

    let leftover = units.checked_sub(floored).ok_or(InputError::Overflow)?;
    if leftover.is_zero() {
        return Ok(shares);
    }

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| match remainders[b].cmp(&remainders[a]) {
        Ordering::Equal => weights[a].0.cmp(&weights[b].0),
        other => other,
    });
    // leftover < weights.len(), so it fits in usize.
    for &i in order.iter().take(leftover.low_u64() as usize) {
        shares[i] += Amount::one();
    }
    Ok(shares)
}
