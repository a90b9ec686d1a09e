use proptest::prelude::*;
use test_case::test_case;

use crate::tile_strategy::{compose_pid, decompose_pid, l2_swizzle};

proptest! {
    /// Decomposing a flat pid and recomposing it is the identity.
    #[test]
    fn decompose_compose_roundtrip(
        counts in proptest::collection::vec(1i64..32, 1..4),
        seed in 0i64..1_000_000,
    ) {
        let total: i64 = counts.iter().product();
        let pid = seed % total;
        let parts = decompose_pid(pid, &counts);
        prop_assert_eq!(parts.len(), counts.len());
        for (p, c) in parts.iter().zip(&counts) {
            prop_assert!(*p >= 0 && p < c);
        }
        prop_assert_eq!(compose_pid(&parts, &counts), pid);
    }

    /// The grouped issue order is a bijection on the 2-d grid: every
    /// program lands on exactly one in-range tile.
    #[test]
    fn l2_swizzle_is_a_bijection(
        m in 1i64..24,
        n in 1i64..24,
        group in 1i64..10,
    ) {
        let mut seen = vec![false; (m * n) as usize];
        for pid in 0..m * n {
            let (pm, pn) = l2_swizzle(pid, m, n, group);
            prop_assert!((0..m).contains(&pm), "pid_m {pm} out of range");
            prop_assert!((0..n).contains(&pn), "pid_n {pn} out of range");
            let slot = (pm * n + pn) as usize;
            prop_assert!(!seen[slot], "tile ({pm}, {pn}) covered twice");
            seen[slot] = true;
        }
        prop_assert!(seen.iter().all(|&s| s));
    }
}

#[test_case(1; "no grouping")]
#[test_case(8; "group of eight")]
fn l2_swizzle_walks_rows_first(group: i64) {
    // Consecutive pids advance pid_m before pid_n in both orders.
    let (m, n) = (16, 16);
    let (m0, n0) = l2_swizzle(0, m, n, group);
    let (m1, n1) = l2_swizzle(1, m, n, group);
    assert_eq!((m0, n0), (0, 0));
    assert_eq!((m1, n1), (1, 0));
}

#[test]
fn l2_swizzle_bounds_tail_group() {
    // 10 rows with group 4: the last group has only 2 rows.
    for pid in 0..10 * 6 {
        let (pm, pn) = l2_swizzle(pid, 10, 6, 4);
        assert!(pm < 10 && pn < 6, "pid {pid} mapped to ({pm}, {pn})");
    }
}

#[test]
fn decompose_pid_first_dim_fastest() {
    assert_eq!(decompose_pid(0, &[3, 4]), vec![0, 0]);
    assert_eq!(decompose_pid(1, &[3, 4]), vec![1, 0]);
    assert_eq!(decompose_pid(3, &[3, 4]), vec![0, 1]);
    assert_eq!(decompose_pid(11, &[3, 4]), vec![2, 3]);
}
