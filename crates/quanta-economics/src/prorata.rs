// crates/quanta-economics/src/prorata.rs
//
// Prorata distribution of a fixed integer pool among weighted claims.
//
//   1. total = sum of weights; if zero, every claim gets nothing.
//   2. In input order, share = floor(weight * pool / total), tracking
//      remainder = pool - sum(shares). A share that would drive the remainder
//      negative is clamped by the overflow.
//   3. Leftover units go one at a time to weighted claims in input order.
//      Anything still left after a full pass goes to the first claim.
//
// The result always sums to `pool` exactly; otherwise the call fails and
// nothing is returned.

use quanta_core::error::QuantaError;
use quanta_core::model::{Allocation, ClaimEntry};
use quanta_core::money::Satoshis;

/// Split `pool` among `claims` in proportion to their weights.
///
/// Output entries correspond one-to-one, in order, with `claims`. The same
/// inputs always produce the same output.
///
/// # Errors
/// `PoolConservationViolation` if the allocations do not sum to `pool`.
pub fn distribute(pool: Satoshis, claims: &[ClaimEntry]) -> Result<Vec<Allocation>, QuantaError> {
    let total: u128 = claims.iter().map(|c| u128::from(c.weight)).sum();
    if total == 0 {
        if pool > 0 {
            tracing::warn!(pool, claims = claims.len(), "no claim weight; pool left unallocated");
        }
        return Ok(claims
            .iter()
            .map(|c| Allocation {
                claimant_id: c.claimant_id.clone(),
                satoshis: 0,
            })
            .collect());
    }

    let mut shares: Vec<u128> = Vec::with_capacity(claims.len());
    let mut remainder = i128::from(pool);
    for claim in claims {
        let mut share = u128::from(claim.weight) * u128::from(pool) / total;
        remainder -= share as i128;
        if remainder < 0 {
            share -= remainder.unsigned_abs();
            remainder = 0;
        }
        shares.push(share);
    }

    let mut leftover = remainder as u128;
    for (share, claim) in shares.iter_mut().zip(claims) {
        if leftover == 0 {
            break;
        }
        if claim.weight == 0 {
            continue;
        }
        *share += 1;
        leftover -= 1;
    }
    if leftover > 0 {
        shares[0] += leftover;
    }

    let allocated: u128 = shares.iter().sum();
    if allocated != u128::from(pool) {
        return Err(QuantaError::PoolConservationViolation { pool, allocated });
    }

    claims
        .iter()
        .zip(shares)
        .map(|(claim, share)| {
            let satoshis = Satoshis::try_from(share)
                .map_err(|_| QuantaError::PoolConservationViolation { pool, allocated })?;
            Ok(Allocation {
                claimant_id: claim.claimant_id.clone(),
                satoshis,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(entries: &[(&str, u64)]) -> Vec<ClaimEntry> {
        entries.iter().map(|(id, w)| ClaimEntry::new(*id, *w)).collect()
    }

    fn amounts(allocations: &[Allocation]) -> Vec<u64> {
        allocations.iter().map(|a| a.satoshis).collect()
    }

    #[test]
    fn test_exact_split_has_no_remainder() {
        let result = distribute(100, &claims(&[("A", 30), ("B", 30), ("C", 40)])).unwrap();
        assert_eq!(amounts(&result), vec![30, 30, 40]);
        let ids: Vec<&str> = result.iter().map(|a| a.claimant_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_leftover_goes_to_first_claims() {
        let result = distribute(10, &claims(&[("A", 1), ("B", 1), ("C", 1)])).unwrap();
        assert_eq!(amounts(&result), vec![4, 3, 3]);
    }

    #[test]
    fn test_leftover_spread_in_input_order() {
        let result = distribute(11, &claims(&[("A", 1), ("B", 1), ("C", 1)])).unwrap();
        assert_eq!(amounts(&result), vec![4, 4, 3]);
    }

    #[test]
    fn test_zero_weight_claims_get_nothing() {
        let result = distribute(10, &claims(&[("A", 0), ("B", 1), ("C", 2)])).unwrap();
        assert_eq!(amounts(&result), vec![0, 4, 6]);
    }

    #[test]
    fn test_zero_total_weight_yields_zero_allocations() {
        let result = distribute(10, &claims(&[("A", 0), ("B", 0)])).unwrap();
        assert_eq!(amounts(&result), vec![0, 0]);
        assert!(distribute(10, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_zero_pool() {
        let result = distribute(0, &claims(&[("A", 5), ("B", 7)])).unwrap();
        assert_eq!(amounts(&result), vec![0, 0]);
    }

    #[test]
    fn test_repeated_claimants_kept_separate() {
        let result = distribute(100, &claims(&[("A", 30), ("B", 30), ("B", 40)])).unwrap();
        assert_eq!(amounts(&result), vec![30, 30, 40]);
    }

    #[test]
    fn test_extreme_values_conserve() {
        let pool = u64::MAX;
        let result = distribute(pool, &claims(&[("A", u64::MAX), ("B", u64::MAX), ("C", 1)])).unwrap();
        let sum: u128 = result.iter().map(|a| u128::from(a.satoshis)).sum();
        assert_eq!(sum, u128::from(pool));
    }

    #[test]
    fn test_conservation_over_grid() {
        let weight_sets: [&[u64]; 5] = [
            &[1],
            &[3, 7],
            &[1, 1, 1, 1, 1, 1, 1],
            &[0, 13, 0, 29, 101],
            &[999_999, 1, 250_000],
        ];
        for pool in [0u64, 1, 2, 9, 100, 12_345, 1_000_003] {
            for weights in weight_sets {
                let entries: Vec<ClaimEntry> = weights
                    .iter()
                    .enumerate()
                    .map(|(i, w)| ClaimEntry::new(format!("c{}", i), *w))
                    .collect();
                let first = distribute(pool, &entries).unwrap();
                let sum: u64 = first.iter().map(|a| a.satoshis).sum();
                assert_eq!(sum, pool, "pool {} weights {:?}", pool, weights);

                let second = distribute(pool, &entries).unwrap();
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_shares_stay_proportional() {
        let result = distribute(1_000, &claims(&[("A", 1), ("B", 2), ("C", 7)])).unwrap();
        assert_eq!(amounts(&result), vec![100, 200, 700]);
    }
}
