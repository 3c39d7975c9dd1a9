//! Not-a-knot cubic spline.
//!
//! The third derivative is continuous across the second and the
//! second-to-last knot, so four samples define a single cubic and any cubic
//! polynomial is reproduced exactly. Knots are stored as second derivatives
//! `m[i]`; each segment is evaluated in the usual moment form.

use crate::error::{MortalityError, Result};

/// Fewest samples a cubic spline can be built from.
pub const MIN_POINTS: usize = 4;

/// Checks that `xs` has enough strictly increasing samples for a spline.
pub fn check_samples(context: &str, xs: &[f64], ys: &[f64]) -> Result<()> {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.len() < MIN_POINTS {
        return Err(MortalityError::InsufficientData {
            context: context.to_string(),
            got: xs.len(),
            need: MIN_POINTS,
        });
    }
    if let Some(w) = xs.windows(2).find(|w| w[1] <= w[0]) {
        return Err(MortalityError::NotIncreasing {
            context: context.to_string(),
            day: w[1],
        });
    }
    Ok(())
}

/// Solves for the second derivative at every knot.
pub fn second_derivatives(context: &str, xs: &[f64], ys: &[f64]) -> Result<Vec<f64>> {
    check_samples(context, xs, ys)?;
    let n = xs.len();

    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let slope: Vec<f64> = (0..n - 1).map(|i| (ys[i + 1] - ys[i]) / h[i]).collect();

    // Unknowns m[1..=n-2]; the end moments follow from the not-a-knot conditions.
    let k = n - 2;
    let mut lower = vec![0.0; k];
    let mut diag = vec![0.0; k];
    let mut upper = vec![0.0; k];
    let mut rhs = vec![0.0; k];

    for row in 0..k {
        let i = row + 1;
        lower[row] = h[i - 1];
        diag[row] = 2.0 * (h[i - 1] + h[i]);
        upper[row] = h[i];
        rhs[row] = 6.0 * (slope[i] - slope[i - 1]);
    }

    // m[0] = ((h0 + h1) m[1] - h0 m[2]) / h1
    let (h0, h1) = (h[0], h[1]);
    diag[0] = (h0 + h1) * (h0 + 2.0 * h1) / h1;
    upper[0] = (h1 * h1 - h0 * h0) / h1;
    lower[0] = 0.0;

    // m[n-1] = ((a + b) m[n-2] - b m[n-3]) / a, with a = h[n-3], b = h[n-2]
    let (a, b) = (h[n - 3], h[n - 2]);
    let last = k - 1;
    lower[last] = (a * a - b * b) / a;
    diag[last] = (a + b) * (2.0 * a + b) / a;
    upper[last] = 0.0;

    let interior = solve_tridiagonal(&lower, &diag, &upper, &rhs);

    let mut m = Vec::with_capacity(n);
    m.push(((h0 + h1) * interior[0] - h0 * interior[1]) / h1);
    m.extend_from_slice(&interior);
    m.push(((a + b) * interior[k - 1] - b * interior[k - 2]) / a);
    Ok(m)
}

/// Evaluates the spline at `x`; `x` must lie within `[xs[0], xs[n-1]]`.
pub fn evaluate(xs: &[f64], ys: &[f64], m: &[f64], x: f64) -> Result<f64> {
    let (min, max) = (xs[0], xs[xs.len() - 1]);
    if !(min..=max).contains(&x) {
        return Err(MortalityError::OutOfDomain { x, min, max });
    }

    // Index of the segment [xs[i], xs[i+1]] holding x.
    let i = xs.partition_point(|&k| k <= x).saturating_sub(1).min(xs.len() - 2);

    let h = xs[i + 1] - xs[i];
    let left = xs[i + 1] - x;
    let right = x - xs[i];
    Ok(m[i] * left.powi(3) / (6.0 * h)
        + m[i + 1] * right.powi(3) / (6.0 * h)
        + (ys[i] / h - m[i] * h / 6.0) * left
        + (ys[i + 1] / h - m[i + 1] * h / 6.0) * right)
}

/// Thomas algorithm. `lower[0]` and `upper[n-1]` are ignored.
fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    c[0] = upper[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i] * c[i - 1];
        c[i] = if i + 1 < n { upper[i] / denom } else { 0.0 };
        d[i] = (rhs[i] - lower[i] * d[i - 1]) / denom;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d[i] - c[i] * x[i + 1];
    }
    x
}
