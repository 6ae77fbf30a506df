//! Statistics functions

use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use noisy_float::prelude::{n64, N64};
use num_traits::FromPrimitive;
use std::ops::{Add, Div, Mul, Rem, Sub};

/// Scale that makes the median absolute deviation a consistent estimator of the standard
/// deviation for normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

/// Return the median. Sorts its argument in place.
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Clone + Copy + Ord + FromPrimitive,
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    // ndarray-stats' quantile_mut can overflow the stack on large inputs, so sort instead.
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    match xs.as_slice_mut() {
        Some(vector) => vector.sort_unstable(),
        None => {
            let mut owned = xs.to_vec();
            owned.sort_unstable();
            xs.iter_mut().zip(owned).for_each(|(x, v)| *x = v);
        }
    }
    let two = T::from_u64(2).ok_or(QuantileError::EmptyInput)?;
    Ok(if xs.len() % 2 == 0 {
        (xs[xs.len() / 2] + xs[xs.len() / 2 - 1]) / two
    } else {
        xs[xs.len() / 2]
    })
}

/// Median of a slice of floats. NaNs are ignored; returns None if nothing is left.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut xs = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| n64(v))
        .collect::<Array1<N64>>();
    median_mut(&mut xs).ok().map(N64::raw)
}

/// Median and unscaled median absolute deviation of `values`.
pub fn median_mad(values: &[f64]) -> Option<(f64, f64)> {
    let center = median(values)?;
    let deviations = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - center).abs())
        .collect::<Vec<_>>();
    Some((center, median(&deviations)?))
}

/// Arithmetic mean and sample variance (ddof 1) of `xs`. The variance of fewer than two values is 0.
pub fn mean_var(xs: ArrayView1<f64>) -> (f64, f64) {
    let n = xs.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = xs.sum() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let ss = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
    (mean, ss / (n - 1) as f64)
}

#[cfg(test)]
mod test_stats {
    use super::*;
    use ndarray::prelude::array;

    #[test]
    fn test_median_mut() {
        assert_eq!(
            median_mut(&mut Array::<usize, Ix1>::from(vec![])),
            Err(QuantileError::EmptyInput)
        );
        assert_eq!(median_mut(&mut array![1]), Ok(1));
        assert_eq!(median_mut(&mut array![1, 10]), Ok(5));
        assert_eq!(median_mut(&mut array![100, 1, 10]), Ok(10));
        assert_eq!(median_mut(&mut array![1, 10, 100, 1000]), Ok(55));

        assert_eq!(median_mut(&mut array![1.].mapv(n64)), Ok(n64(1.0)));
        assert_eq!(median_mut(&mut array![10., 1.].mapv(n64)), Ok(n64(5.5)));
        assert_eq!(median_mut(&mut array![1., 10., 100., 1000.].mapv(n64)), Ok(n64(55.0)));
    }

    #[test]
    fn test_median_mut_strided() {
        let mut a = array![[3, 0], [1, 0], [2, 0]];
        assert_eq!(median_mut(&mut a.column_mut(0)), Ok(2));
    }

    #[test]
    fn test_median_mad() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[f64::NAN, 2.0]), Some(2.0));
        let (m, mad) = median_mad(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(m, 3.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn test_mean_var() {
        let (m, v) = mean_var(array![1.0, 2.0, 3.0, 4.0].view());
        assert_eq!(m, 2.5);
        assert!((v - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(mean_var(array![7.0].view()), (7.0, 0.0));
    }
}
