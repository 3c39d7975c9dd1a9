//! Continuous curves for one stratum key, sampled into plot-ready data.
//!
//! A [`CurveSet`] wraps every series of a key in an [`Interpolant`]: each
//! reference year (after gap filling), the baseline mean and standard
//! deviation, and the target year's deaths, excess and cumulative excess.
//! The cause-specific comparison curves are derived from those interpolants
//! over the overlap of their domains.

use serde::Serialize;
use tracing::debug;

use crate::aggregate::DailyTotal;
use crate::baseline::{BaselineDay, KeyBaseline};
use crate::calendar::month_ticks;
use crate::error::Result;
use crate::excess::ExcessRow;
use crate::interpolate::{
    DayIndexed, DerivedSeries, Interpolant, clip_window, intersect_domains, linspace, subtract,
};
use crate::records::StratKey;
use crate::spline::MIN_POINTS;

/// Borrowed inputs for one key.
#[derive(Debug, Clone, Copy)]
pub struct KeySeries<'a> {
    pub key: &'a StratKey,
    pub baseline: &'a KeyBaseline,
    pub current: &'a [DailyTotal],
    pub excess: &'a [ExcessRow],
    /// Deaths attributed to the specific cause, if that series is available.
    pub cause: Option<&'a [DailyTotal]>,
}

/// Interpolants over every series of one key.
#[derive(Debug)]
pub struct CurveSet<'a> {
    pub key: &'a StratKey,
    pub years: Vec<(i32, Interpolant<'a, BaselineDay>)>,
    pub mean: Interpolant<'a, BaselineDay>,
    pub std: Interpolant<'a, BaselineDay>,
    pub deaths: Interpolant<'a, DailyTotal>,
    pub excess: Interpolant<'a, ExcessRow>,
    pub cumulative_excess: Interpolant<'a, ExcessRow>,
    pub cause: Option<Interpolant<'a, DailyTotal>>,
    cause_rows: Option<&'a [DailyTotal]>,
}

/// Target-year curves with the cause-specific deaths taken out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NonCauseSeries {
    /// All-cause deaths minus cause-specific deaths.
    pub deaths: DerivedSeries,
    /// All-cause excess minus cause-specific deaths.
    pub excess: DerivedSeries,
}

impl<'a> CurveSet<'a> {
    pub fn build(series: KeySeries<'a>) -> Result<Self> {
        let key = series.key;
        let rows = series.baseline.rows();

        let years = series
            .baseline
            .years()
            .iter()
            .enumerate()
            .map(|(idx, &year)| {
                Interpolant::new(format!("{year} {key}"), rows, move |r: &BaselineDay| {
                    r.values[idx]
                })
                .map(|f| (year, f))
            })
            .collect::<Result<Vec<_>>>()?;

        // A short cause series still feeds the bars but gets no curve.
        let cause = series
            .cause
            .filter(|rows| {
                let enough = rows.len() >= MIN_POINTS;
                if !enough {
                    debug!(
                        key = %key,
                        days = rows.len(),
                        "Cause-specific series too short to interpolate"
                    );
                }
                enough
            })
            .map(|rows| {
                Interpolant::new(format!("cause deaths {key}"), rows, |r: &DailyTotal| {
                    r.deaths as f64
                })
            })
            .transpose()?;

        Ok(Self {
            key,
            years,
            mean: Interpolant::new(format!("mean {key}"), rows, |r: &BaselineDay| r.mean)?,
            std: Interpolant::new(format!("std {key}"), rows, |r: &BaselineDay| r.std)?,
            deaths: Interpolant::new(format!("deaths {key}"), series.current, |r: &DailyTotal| {
                r.deaths as f64
            })?,
            excess: Interpolant::new(format!("excess {key}"), series.excess, |r: &ExcessRow| {
                r.excess
            })?,
            cumulative_excess: Interpolant::new(
                format!("cumulative excess {key}"),
                series.excess,
                |r: &ExcessRow| r.cumulative_excess,
            )?,
            cause,
            cause_rows: series.cause,
        })
    }

    /// Evaluates the comparison curves at every integer day shared by the
    /// all-cause and cause-specific series. `None` without a cause series or
    /// when the domains do not overlap.
    pub fn non_cause(&self) -> Result<Option<NonCauseSeries>> {
        let Some(cause) = &self.cause else {
            return Ok(None);
        };
        let (Some(deaths_days), Some(excess_days)) = (
            intersect_domains(&self.deaths, cause),
            intersect_domains(&self.excess, cause),
        ) else {
            debug!(key = %self.key, "Cause-specific series does not overlap the target year");
            return Ok(None);
        };

        let days = |(lo, hi): (f64, f64)| lo.ceil() as u16..=hi.floor() as u16;
        Ok(Some(NonCauseSeries {
            deaths: subtract(&self.deaths, cause, days(deaths_days))?,
            excess: subtract(&self.excess, cause, days(excess_days))?,
        }))
    }

    /// Samples every curve over `request.window`, each clipped to its own domain.
    pub fn sample(
        &self,
        non_cause: Option<&NonCauseSeries>,
        request: &SampleRequest,
    ) -> Result<CurvePlot> {
        let (xmin, xmax) = request.window;
        let num = request.num;

        let mut plot = CurvePlot {
            key: self.key.to_string(),
            window: request.window,
            ticks: month_ticks(xmin, xmax)
                .into_iter()
                .map(|(day, label)| Tick { day, label })
                .collect(),
            ..CurvePlot::default()
        };

        if let Some(x) = window_samples(request.window, self.mean.domain(), num) {
            let mean = self.mean.evaluate_many(&x)?;
            let std = self.std.evaluate_many(&x)?;
            let band = |k: f64| Band {
                x: x.clone(),
                lower: mean.iter().zip(&std).map(|(m, s)| m - k * s).collect(),
                upper: mean.iter().zip(&std).map(|(m, s)| m + k * s).collect(),
            };
            plot.band_1sd = Some(band(1.0));
            plot.band_2sd = Some(band(2.0));
            for (year, f) in &self.years {
                plot.reference_years.push(Curve::sample(year.to_string(), f, &x)?);
            }
            plot.mean = Some(Curve {
                label: "mean".to_string(),
                x,
                y: mean,
            });
        }

        plot.deaths = sample_clipped("deaths", &self.deaths, request.window, num)?;
        plot.excess = sample_clipped("excess", &self.excess, request.window, num)?;

        if let Some(since) = request.since {
            let start = (f64::from(since).max(xmin), xmax);
            if let Some(x) = window_samples(start, self.cumulative_excess.domain(), num) {
                let origin = self.cumulative_excess.evaluate(x[0])?;
                let y = self
                    .cumulative_excess
                    .evaluate_many(&x)?
                    .into_iter()
                    .map(|v| v - origin)
                    .collect();
                plot.cumulative_excess_since = Some(Curve {
                    label: format!("cumulative excess since day {since}"),
                    x,
                    y,
                });
            }
        }

        if let Some(derived) = non_cause {
            plot.non_cause_deaths =
                sample_derived("non-cause deaths", &derived.deaths, request.window, num)?;
            plot.non_cause_excess =
                sample_derived("non-cause excess", &derived.excess, request.window, num)?;
        }

        if let Some(rows) = self.cause_rows {
            // Bars cover whole days strictly before the window's right edge.
            for r in rows
                .iter()
                .filter(|r| f64::from(r.day) >= xmin && f64::from(r.day) <= xmax - 1.0)
            {
                plot.cause_daily.push(Bar {
                    day: r.day,
                    value: r.deaths,
                });
                plot.cause_cumulative.push(Bar {
                    day: r.day,
                    value: r.cumulative,
                });
            }
        }

        Ok(plot)
    }
}

/// What to sample: the day window, the number of points per curve and an
/// optional start day for the rebased cumulative excess.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    pub window: (f64, f64),
    pub num: usize,
    pub since: Option<u16>,
}

impl Default for SampleRequest {
    fn default() -> Self {
        Self {
            window: (1.0, 366.0),
            num: 500,
            since: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Curve {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Curve {
    fn sample<R: DayIndexed>(
        label: String,
        f: &Interpolant<'_, R>,
        x: &[f64],
    ) -> Result<Self> {
        Ok(Self {
            label,
            x: x.to_vec(),
            y: f.evaluate_many(x)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Band {
    pub x: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub day: u16,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub day: u16,
    pub label: String,
}

/// Sampled curves of one key, ready for an external renderer.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CurvePlot {
    pub key: String,
    pub window: (f64, f64),
    pub ticks: Vec<Tick>,
    pub reference_years: Vec<Curve>,
    pub mean: Option<Curve>,
    pub band_1sd: Option<Band>,
    pub band_2sd: Option<Band>,
    pub deaths: Option<Curve>,
    pub excess: Option<Curve>,
    pub cumulative_excess_since: Option<Curve>,
    pub non_cause_deaths: Option<Curve>,
    pub non_cause_excess: Option<Curve>,
    pub cause_daily: Vec<Bar>,
    pub cause_cumulative: Vec<Bar>,
}

fn window_samples(window: (f64, f64), domain: (f64, f64), num: usize) -> Option<Vec<f64>> {
    clip_window(window, domain)
        .map(|(lo, hi)| linspace(lo, hi, num))
        .filter(|x| !x.is_empty())
}

fn sample_clipped<R: DayIndexed>(
    label: &str,
    f: &Interpolant<'_, R>,
    window: (f64, f64),
    num: usize,
) -> Result<Option<Curve>> {
    window_samples(window, f.domain(), num)
        .map(|x| Curve::sample(label.to_string(), f, &x))
        .transpose()
}

// A short overlap leaves nothing to draw rather than failing the whole plot.
fn sample_derived(
    label: &str,
    series: &DerivedSeries,
    window: (f64, f64),
    num: usize,
) -> Result<Option<Curve>> {
    if series.samples.len() < MIN_POINTS {
        debug!(label, samples = series.samples.len(), "Derived curve too short to interpolate");
        return Ok(None);
    }
    let f = series.interpolant(label)?;
    sample_clipped(label, &f, window, num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::baseline::build_baseline;
    use crate::excess::compute_excess;
    use crate::records::{Observation, RecordStore};

    fn store() -> (RecordStore, RecordStore) {
        let mut all = Vec::new();
        for year in [2017, 2018, 2019] {
            for day in 1..=60u16 {
                all.push(Observation::new(day, year, 100 + (year - 2017) as u64));
            }
        }
        for day in 1..=40u16 {
            all.push(Observation::new(day, 2020, 101 + u64::from(day)));
        }
        let cause = (20..=45u16).map(|day| Observation::new(day, 2020, 2)).collect();
        (RecordStore::new(all), RecordStore::new(cause))
    }

    #[test]
    fn test_curve_set_samples_every_curve() {
        let (all, cause) = store();
        let aggregated = aggregate(&all, &[]);
        let cause = aggregate(&cause, &[]);
        let baseline = build_baseline(&aggregated, &[2017, 2018, 2019]).unwrap();
        let excess = compute_excess(&aggregated, 2020, &baseline);
        let key = StratKey::all();

        let set = CurveSet::build(KeySeries {
            key: &key,
            baseline: baseline.get(&key).unwrap(),
            current: aggregated.partition(&key, 2020).unwrap(),
            excess: excess.rows(&key).unwrap(),
            cause: cause.partition(&key, 2020),
        })
        .unwrap();

        assert_eq!(set.years.len(), 3);
        assert!((set.mean.evaluate(30.5).unwrap() - 101.0).abs() < 1e-9);
        assert!((set.excess.evaluate(10.0).unwrap() - 10.0).abs() < 1e-9);

        let non_cause = set.non_cause().unwrap().unwrap();
        let first = non_cause.deaths.samples.first().unwrap();
        let last = non_cause.deaths.samples.last().unwrap();
        assert_eq!((first.day, last.day), (20, 40));
        assert!((first.value - 119.0).abs() < 1e-9);
        assert!((non_cause.excess.samples[0].value - 18.0).abs() < 1e-9);

        let request = SampleRequest {
            window: (24.0, 129.0),
            num: 50,
            since: Some(30),
        };
        let plot = set.sample(Some(&non_cause), &request).unwrap();

        let deaths = plot.deaths.as_ref().unwrap();
        assert_eq!(deaths.x.len(), 50);
        assert_eq!(deaths.x.first(), Some(&24.0));
        assert_eq!(deaths.x.last(), Some(&40.0));

        let mean = plot.mean.as_ref().unwrap();
        assert_eq!(mean.x.last(), Some(&60.0));
        let band = plot.band_1sd.as_ref().unwrap();
        assert!(band.lower.iter().zip(&band.upper).all(|(l, u)| l <= u));

        let since = plot.cumulative_excess_since.as_ref().unwrap();
        assert_eq!(since.y[0], 0.0);
        assert_eq!(plot.reference_years.len(), 3);
        assert_eq!(plot.non_cause_deaths.as_ref().unwrap().x.last(), Some(&40.0));

        // bars stop one day before the window's right edge
        assert_eq!(plot.cause_daily.first().map(|b| b.day), Some(24));
        assert_eq!(plot.cause_daily.last().map(|b| b.day), Some(45));
        assert_eq!(plot.ticks.len(), 4);
    }

    #[test]
    fn test_curve_set_requires_enough_points() {
        let mut obs = Vec::new();
        for year in [2018, 2019] {
            for day in 1..=10u16 {
                obs.push(Observation::new(day, year, 5));
            }
        }
        for day in 1..=3u16 {
            obs.push(Observation::new(day, 2020, 6));
        }
        let aggregated = aggregate(&RecordStore::new(obs), &[]);
        let baseline = build_baseline(&aggregated, &[2018, 2019]).unwrap();
        let excess = compute_excess(&aggregated, 2020, &baseline);
        let key = StratKey::all();

        let result = CurveSet::build(KeySeries {
            key: &key,
            baseline: baseline.get(&key).unwrap(),
            current: aggregated.partition(&key, 2020).unwrap(),
            excess: excess.rows(&key).unwrap(),
            cause: None,
        });
        assert!(matches!(
            result,
            Err(crate::error::MortalityError::InsufficientData { got: 3, .. })
        ));
    }

    #[test]
    fn test_short_cause_series_keeps_bars_only() {
        let (all, _) = store();
        let aggregated = aggregate(&all, &[]);
        let baseline = build_baseline(&aggregated, &[2017, 2018, 2019]).unwrap();
        let excess = compute_excess(&aggregated, 2020, &baseline);
        let cause = aggregate(
            &RecordStore::new((30..=32u16).map(|day| Observation::new(day, 2020, 1)).collect()),
            &[],
        );
        let key = StratKey::all();

        let set = CurveSet::build(KeySeries {
            key: &key,
            baseline: baseline.get(&key).unwrap(),
            current: aggregated.partition(&key, 2020).unwrap(),
            excess: excess.rows(&key).unwrap(),
            cause: cause.partition(&key, 2020),
        })
        .unwrap();
        assert!(set.cause.is_none());
        assert!(set.non_cause().unwrap().is_none());

        let plot = set.sample(None, &SampleRequest::default()).unwrap();
        assert_eq!(plot.cause_daily.len(), 3);
        assert!(plot.non_cause_excess.is_none());
        assert!(plot.deaths.is_some());
    }
}
