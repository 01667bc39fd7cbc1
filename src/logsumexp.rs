//! C4: parallel per-read log-sum-exp.
//!
//! The numerically stable kernel (`lse`) is shared by the E-step's per-read
//! reduction (grouped, contiguous, parallel over reads — this is C4 proper)
//! and the M-step's per-target reduction (grouped by a `HashMap` index built
//! once before EM starts, since the row set does not change across
//! iterations); both are "group values sharing a key, log-sum-exp them" and
//! reuse the same stable-max arithmetic.

use rayon::prelude::*;

/// `max_x + log(sum(exp(x - max_x)))`, coercing a non-finite max to 0 so that
/// an empty or all-`-inf` group does not poison the sum (section 4.4). An
/// empty group is returned as `0.0` directly: the general formula's `ln(0)`
/// would otherwise give `-inf` for a case the coercion is meant to guard
/// against in the first place.
pub fn lse(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }

    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let max_x = if max_x.is_finite() { max_x } else { 0.0 };

    let sum: f64 = xs.iter().map(|x| (x - max_x).exp()).sum();
    max_x + sum.ln()
}

/// A contiguous `[start, end)` row range sharing one grouping key (e.g. all
/// rows for one `read_id`, once the table is sorted by read id).
pub type Group = (usize, usize);

/// Apply `lse` to each group in parallel. `groups` must be disjoint row
/// ranges into `values`; ordering within a group does not affect the result.
pub fn lse_grouped_parallel(values: &[f64], groups: &[Group]) -> Vec<f64> {
    groups
        .par_iter()
        .map(|&(start, end)| lse(&values[start..end]))
        .collect()
}

/// Apply `lse` to each group identified by an arbitrary (possibly
/// non-contiguous) index list, in parallel. Used by the EM M-step, where
/// rows sharing a target are scattered through a table sorted by read id.
pub fn lse_indexed_parallel(values: &[f64], groups: &[Vec<usize>]) -> Vec<f64> {
    groups
        .par_iter()
        .map(|idxs| {
            let gathered: Vec<f64> = idxs.iter().map(|&i| values[i]).collect();
            lse(&gathered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lse_is_associative() {
        let x1 = -3.0_f64;
        let x2 = 1.5_f64;
        let x3 = 2.2_f64;

        let direct = lse(&[x1, x2, x3]);
        let nested = lse(&[lse(&[x1, x2]), x3]);

        assert!((direct - nested).abs() < 1e-12);
    }

    #[test]
    fn lse_stable_for_very_negative_inputs() {
        let xs = vec![-1000.0, -1005.0, -1002.0];
        let result = lse(&xs);
        assert!(result.is_finite());
        // lse of all values << 0 should stay close to the max, not blow up.
        assert!(result > -1001.0 && result < -999.0);
    }

    #[test]
    fn lse_of_empty_group_is_zero() {
        assert_eq!(lse(&[]), 0.0);
    }

    #[test]
    fn lse_grouped_parallel_matches_sequential() {
        let values = vec![-1.0, -2.0, -3.0, 0.5, 0.1];
        let groups = vec![(0usize, 3usize), (3usize, 5usize)];
        let result = lse_grouped_parallel(&values, &groups);
        assert!((result[0] - lse(&values[0..3])).abs() < 1e-12);
        assert!((result[1] - lse(&values[3..5])).abs() < 1e-12);
    }
}
