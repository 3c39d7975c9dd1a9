//! Continuous queries over day-indexed series.
//!
//! An [`Interpolant`] borrows the rows it was built from and keeps only the
//! spline moments, so it cannot outlive the series it describes. Derived
//! curves (one series minus another) are materialised as a [`DerivedSeries`]
//! over a caller-chosen set of days, and can then be interpolated in turn.

use serde::Serialize;
use std::fmt;

use crate::error::{MortalityError, Result};
use crate::spline;

/// A row that sits at an integer day-of-year.
pub trait DayIndexed {
    fn day(&self) -> u16;
}

type Column<'a, R> = Box<dyn Fn(&R) -> f64 + 'a>;

/// Cubic interpolant over one value column of a borrowed series.
pub struct Interpolant<'a, R> {
    label: String,
    rows: &'a [R],
    value: Column<'a, R>,
    xs: Vec<f64>,
    moments: Vec<f64>,
}

impl<R: DayIndexed> fmt::Debug for Interpolant<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpolant")
            .field("label", &self.label)
            .field("points", &self.rows.len())
            .field("domain", &self.domain())
            .finish()
    }
}

impl<'a, R: DayIndexed> Interpolant<'a, R> {
    /// Fits a not-a-knot cubic spline through `(row.day(), value(row))`.
    ///
    /// Fails if there are fewer than four rows or the days are not strictly
    /// increasing.
    pub fn new(
        label: impl Into<String>,
        rows: &'a [R],
        value: impl Fn(&R) -> f64 + 'a,
    ) -> Result<Self> {
        let label = label.into();
        let xs: Vec<f64> = rows.iter().map(|r| f64::from(r.day())).collect();
        let ys: Vec<f64> = rows.iter().map(&value).collect();
        let moments = spline::second_derivatives(&label, &xs, &ys)?;
        Ok(Self {
            label,
            rows,
            value: Box::new(value),
            xs,
            moments,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Closed domain `[first day, last day]`.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    pub fn contains(&self, x: f64) -> bool {
        let (min, max) = self.domain();
        (min..=max).contains(&x)
    }

    pub fn evaluate(&self, x: f64) -> Result<f64> {
        let (min, max) = self.domain();
        if !(min..=max).contains(&x) {
            return Err(MortalityError::OutOfDomain { x, min, max });
        }
        // Only the two knots bracketing `x` take part in the segment.
        let i = self
            .xs
            .partition_point(|&k| k <= x)
            .saturating_sub(1)
            .min(self.xs.len() - 2);
        let ys = [(self.value)(&self.rows[i]), (self.value)(&self.rows[i + 1])];
        spline::evaluate(&self.xs[i..i + 2], &ys, &self.moments[i..i + 2], x)
    }

    pub fn evaluate_many(&self, xs: &[f64]) -> Result<Vec<f64>> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }
}

/// One sample of a derived curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub day: u16,
    pub value: f64,
}

impl DayIndexed for Sample {
    fn day(&self) -> u16 {
        self.day
    }
}

/// Owned samples of a curve computed from other interpolants.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DerivedSeries {
    pub samples: Vec<Sample>,
}

impl DerivedSeries {
    pub fn interpolant(&self, label: impl Into<String>) -> Result<Interpolant<'_, Sample>> {
        Interpolant::new(label, &self.samples, |s: &Sample| s.value)
    }
}

/// Overlap of two interpolation domains, if any.
pub fn intersect_domains<A, B>(a: &Interpolant<'_, A>, b: &Interpolant<'_, B>) -> Option<(f64, f64)>
where
    A: DayIndexed,
    B: DayIndexed,
{
    let (amin, amax) = a.domain();
    let (bmin, bmax) = b.domain();
    let (min, max) = (amin.max(bmin), amax.min(bmax));
    (min <= max).then_some((min, max))
}

/// Evaluates `a - b` at every day in `days`.
///
/// The days are taken as given; any day outside either domain is an
/// [`MortalityError::OutOfDomain`] error.
pub fn subtract<A, B>(
    a: &Interpolant<'_, A>,
    b: &Interpolant<'_, B>,
    days: impl IntoIterator<Item = u16>,
) -> Result<DerivedSeries>
where
    A: DayIndexed,
    B: DayIndexed,
{
    let samples = days
        .into_iter()
        .map(|day| {
            let x = f64::from(day);
            Ok(Sample {
                day,
                value: a.evaluate(x)? - b.evaluate(x)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DerivedSeries { samples })
}

/// `num` evenly spaced points from `xmin` to `xmax` inclusive.
pub fn linspace(xmin: f64, xmax: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![xmin],
        _ => {
            let step = (xmax - xmin) / (num - 1) as f64;
            (0..num)
                .map(|i| if i + 1 == num { xmax } else { xmin + step * i as f64 })
                .collect()
        }
    }
}

/// Clips a requested window to a domain; `None` when they do not overlap.
pub fn clip_window(window: (f64, f64), domain: (f64, f64)) -> Option<(f64, f64)> {
    let (min, max) = (window.0.max(domain.0), window.1.min(domain.1));
    (min <= max).then_some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(points: &[(u16, f64)]) -> DerivedSeries {
        DerivedSeries {
            samples: points.iter().map(|&(day, value)| Sample { day, value }).collect(),
        }
    }

    #[test]
    fn test_domain_enforcement() {
        let series = samples(&[(10, 1.0), (11, 4.0), (12, 9.0), (13, 16.0), (14, 25.0)]);
        let f = series.interpolant("squares").unwrap();

        assert_eq!(f.domain(), (10.0, 14.0));
        assert!((f.evaluate(10.0).unwrap() - 1.0).abs() < 1e-9);
        assert!((f.evaluate(14.0).unwrap() - 25.0).abs() < 1e-9);
        assert!(matches!(
            f.evaluate(15.0),
            Err(MortalityError::OutOfDomain { min, max, .. }) if min == 10.0 && max == 14.0
        ));
        assert!(f.evaluate(9.0).is_err());
    }

    #[test]
    fn test_non_integer_positions() {
        // (day - 9)^2 is reproduced exactly between knots
        let series = samples(&[(10, 1.0), (11, 4.0), (12, 9.0), (13, 16.0), (14, 25.0)]);
        let f = series.interpolant("squares").unwrap();
        let got = f.evaluate_many(&[10.5, 12.25, 13.9]).unwrap();
        for (x, y) in [10.5f64, 12.25, 13.9].iter().zip(got) {
            assert!((y - (x - 9.0).powi(2)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_too_few_points() {
        let series = samples(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert!(matches!(
            series.interpolant("short"),
            Err(MortalityError::InsufficientData { got: 3, .. })
        ));
    }

    #[test]
    fn test_subtract_over_intersection() {
        let all = samples(&[(1, 10.0), (2, 12.0), (3, 14.0), (4, 16.0), (5, 18.0), (6, 20.0)]);
        let cause = samples(&[(3, 1.0), (4, 2.0), (5, 3.0), (6, 4.0), (7, 5.0)]);
        let fa = all.interpolant("all").unwrap();
        let fc = cause.interpolant("cause").unwrap();

        let (lo, hi) = intersect_domains(&fa, &fc).unwrap();
        assert_eq!((lo, hi), (3.0, 6.0));

        let diff = subtract(&fa, &fc, lo as u16..=hi as u16).unwrap();
        let values: Vec<f64> = diff.samples.iter().map(|s| s.value).collect();
        for (got, want) in values.iter().zip([13.0, 14.0, 15.0, 16.0]) {
            assert!((got - want).abs() < 1e-9);
        }

        // widening past the intersection is refused rather than extrapolated
        assert!(subtract(&fa, &fc, 2..=6).is_err());
        assert!(subtract(&fa, &fc, 3..=7).is_err());
    }

    #[test]
    fn test_linspace_and_clip() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 3.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());

        assert_eq!(clip_window((24.0, 129.0), (1.0, 100.0)), Some((24.0, 100.0)));
        assert_eq!(clip_window((24.0, 129.0), (130.0, 200.0)), None);
    }
}
