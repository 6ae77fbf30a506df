//! Fit of the low dimensional similarity curve `1 / (1 + a d^(2b))` to the offset exponential
//! decay implied by `min_dist` and `spread`, by Levenberg-Marquardt.

use log::debug;

const MAX_ITERATIONS: usize = 200;
const TOLERANCE: f64 = 1e-12;

fn curve(a: f64, b: f64, x: f64) -> f64 {
    1.0 / (1.0 + a * x.powf(2.0 * b))
}

fn sum_sq(a: f64, b: f64, xs: &[f64], ys: &[f64]) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (curve(a, b, x) - y).powi(2))
        .sum()
}

/// Find the `(a, b)` curve parameters for the given `spread` and `min_dist`. The target is 1
/// below `min_dist` and `exp(-(d - min_dist) / spread)` above it, sampled on `[0, 3 spread)`.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let n = 300;
    let xs = (0..n).map(|i| i as f64 * 3.0 * spread / n as f64).collect::<Vec<_>>();
    let ys = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect::<Vec<_>>();

    let (mut a, mut b) = (1.0, 1.0);
    let mut lambda = 1e-3;
    let mut err = sum_sq(a, b, &xs, &ys);

    for iteration in 0..MAX_ITERATIONS {
        // normal equations of the 2-parameter least squares problem
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            let f = curve(a, b, x);
            let r = f - y;
            let (da, db) = if x > 0.0 {
                let u = x.powf(2.0 * b);
                (-u * f * f, -2.0 * a * u * x.ln() * f * f)
            } else {
                (0.0, 0.0)
            };
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let mut improved = false;
        while lambda < 1e12 {
            let m00 = jaa * (1.0 + lambda);
            let m11 = jbb * (1.0 + lambda);
            let det = m00 * m11 - jab * jab;
            if det.abs() < f64::MIN_POSITIVE {
                lambda *= 10.0;
                continue;
            }
            let step_a = -(m11 * ga - jab * gb) / det;
            let step_b = -(m00 * gb - jab * ga) / det;
            let (na, nb) = (a + step_a, b + step_b);
            if na > 0.0 && nb > 0.0 {
                let new_err = sum_sq(na, nb, &xs, &ys);
                if new_err < err {
                    let converged = err - new_err < TOLERANCE * err.max(TOLERANCE);
                    a = na;
                    b = nb;
                    err = new_err;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = !converged;
                    break;
                }
            }
            lambda *= 10.0;
        }

        if !improved {
            debug!("curve fit stopped after {} iterations: a = {}, b = {}", iteration + 1, a, b);
            break;
        }
    }

    (a, b)
}
