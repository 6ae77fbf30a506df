use statrs::distribution::{ContinuousCDF, Normal};
use std::cmp::Ordering;

/// Survival function `P(Z > z)` of the standard normal distribution.
#[inline]
pub fn normal_sf(z: f64) -> f64 {
    Normal::standard().sf(z)
}

/// Two-sided p-value of a standard normal statistic, capped at 1.
#[inline]
pub fn two_sided_pvalue(z: f64) -> f64 {
    (2.0 * normal_sf(z.abs())).min(1.0)
}

/// Benjamini-Hochberg adjusted p-values. Takes `(index, p-value)` pairs and returns them with
/// adjusted values, sorted by descending p-value. NaNs sort to the front.
#[inline]
pub fn adjusted_pvalue_bh(pvalue: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let mut arr = pvalue.to_vec();
    arr.sort_by(|&(_, a), &(_, b)| match a.partial_cmp(&b) {
        Some(o) => o.reverse(),
        None => {
            if a.is_nan() && b.is_nan() {
                Ordering::Equal
            } else if a.is_nan() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    });

    // q = min(1, cummin(n / rank * p)) walking from the largest p-value down
    let len = arr.len() as f64;
    let mut min = f64::MAX;
    for (idx, (_, ref mut val)) in arr.iter_mut().enumerate() {
        *val *= len / (len - idx as f64);
        if *val < min {
            min = *val
        }
        *val = min.min(1.0);
    }

    arr
}

/// Benjamini-Hochberg adjustment of a p-value vector, returned in input order.
pub fn adjust_bh(p_values: &[f64]) -> Vec<f64> {
    let indexed = p_values.iter().copied().enumerate().collect::<Vec<_>>();
    let mut out = vec![f64::NAN; p_values.len()];
    for (i, q) in adjusted_pvalue_bh(&indexed) {
        out[i] = q;
    }
    out
}
