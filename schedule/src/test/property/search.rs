//! Lattice and walk invariants.

use proptest::prelude::*;

use crate::math::{comm_factors, comm_factors_pow2};
use crate::tiling::walk_up;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn factors_divide_and_ascend(num in 1u64..5000, max in 1u64..5000) {
        let factors = comm_factors(num, max);
        prop_assert!(factors.windows(2).all(|w| w[0] < w[1]));
        for f in &factors {
            prop_assert_eq!(num % f, 0);
            prop_assert!(*f <= max);
        }
        prop_assert_eq!(factors.first().copied(), Some(1));
    }

    #[test]
    fn pow2_lattice_is_a_superset(num in 1u64..2048, max in 1u64..2048) {
        let plain = comm_factors(num, max);
        let merged = comm_factors_pow2(num, max);
        prop_assert!(plain.iter().all(|f| merged.contains(f)));
        prop_assert!(merged.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn walk_returns_last_value_under_a_threshold(num in 1u64..4096, limit in 1u64..4096) {
        let lattice = comm_factors(num, num);
        let idx = walk_up(&lattice, 0, |v| v <= limit);
        let expected = lattice.iter().rposition(|&v| v <= limit).unwrap_or(0);
        prop_assert_eq!(idx, expected);
    }

    #[test]
    fn walk_never_skips_a_failure(num in 1u64..4096, bad in 2u64..64) {
        let lattice = comm_factors(num, num);
        let idx = walk_up(&lattice, 0, |v| v % bad != 0);
        for v in &lattice[1..=idx] {
            prop_assert_ne!(v % bad, 0);
        }
    }
}
