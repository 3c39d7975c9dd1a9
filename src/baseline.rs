//! Historical baseline: per-day mean and sample standard deviation across
//! the reference years.
//!
//! Each reference year is first put on the union of days observed across
//! all reference years for its key. A day a year did not report is filled
//! from a cubic spline through that same year's observations; values are
//! never borrowed from another year.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::aggregate::{AggregatedSeries, DailyTotal};
use crate::error::{MortalityError, Result};
use crate::interpolate::DayIndexed;
use crate::records::StratKey;
use crate::spline;
use crate::stats::{mean, sample_stddev};

/// Baseline values for one day-of-year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineDay {
    pub day: u16,
    /// One value per reference year, in the order of [`KeyBaseline::years`].
    pub values: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

impl DayIndexed for BaselineDay {
    fn day(&self) -> u16 {
        self.day
    }
}

/// Baseline of a single stratum key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBaseline {
    years: Vec<i32>,
    rows: Vec<BaselineDay>,
    filled: BTreeMap<i32, usize>,
}

impl KeyBaseline {
    /// Reference years that had data for this key.
    pub fn years(&self) -> &[i32] {
        &self.years
    }

    pub fn rows(&self) -> &[BaselineDay] {
        &self.rows
    }

    pub fn row(&self, day: u16) -> Option<&BaselineDay> {
        self.rows
            .binary_search_by_key(&day, |r| r.day)
            .ok()
            .map(|i| &self.rows[i])
    }

    pub fn first_day(&self) -> Option<u16> {
        self.rows.first().map(|r| r.day)
    }

    pub fn last_day(&self) -> Option<u16> {
        self.rows.last().map(|r| r.day)
    }

    /// Column position of `year` inside [`BaselineDay::values`].
    pub fn year_index(&self, year: i32) -> Option<usize> {
        self.years.iter().position(|&y| y == year)
    }

    /// Number of days that were spline-filled for `year`.
    pub fn filled_days(&self, year: i32) -> usize {
        self.filled.get(&year).copied().unwrap_or(0)
    }
}

/// Baselines for every key that occurs in at least one reference year.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaselineTable {
    group_keys: Vec<String>,
    reference_years: Vec<i32>,
    partitions: BTreeMap<StratKey, KeyBaseline>,
}

impl BaselineTable {
    pub fn group_keys(&self) -> &[String] {
        &self.group_keys
    }

    pub fn reference_years(&self) -> &[i32] {
        &self.reference_years
    }

    pub fn get(&self, key: &StratKey) -> Option<&KeyBaseline> {
        self.partitions.get(key)
    }

    pub fn contains_key(&self, key: &StratKey) -> bool {
        self.partitions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StratKey> {
        self.partitions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StratKey, &KeyBaseline)> {
        self.partitions.iter()
    }
}

/// Builds the baseline from the `reference_years` partitions of `aggregated`.
///
/// The target year must not be among `reference_years`; this is not checked
/// here.
///
/// # Errors
///
/// - [`MortalityError::InsufficientData`] when a key has data in fewer than
///   two reference years, or a year that needs gap filling has fewer than
///   four observed days.
/// - [`MortalityError::OutOfDomain`] when a year would need a value outside
///   its own observed range.
#[tracing::instrument(skip_all, fields(years = ?reference_years))]
pub fn build_baseline(aggregated: &AggregatedSeries, reference_years: &[i32]) -> Result<BaselineTable> {
    let mut partitions = BTreeMap::new();

    for key in aggregated.keys() {
        let present: Vec<(i32, &[DailyTotal])> = reference_years
            .iter()
            .filter_map(|&year| {
                aggregated
                    .partition(key, year)
                    .filter(|rows| !rows.is_empty())
                    .map(|rows| (year, rows))
            })
            .collect();

        if present.is_empty() {
            debug!(key = %key, "No reference-year data for key");
            continue;
        }

        let baseline = build_key_baseline(key, &present)?;
        partitions.insert(key.clone(), baseline);
    }

    if partitions.is_empty() {
        warn!("Baseline is empty: no key has reference-year data");
    } else {
        info!(keys = partitions.len(), "Baseline built");
    }

    Ok(BaselineTable {
        group_keys: aggregated.group_keys().to_vec(),
        reference_years: reference_years.to_vec(),
        partitions,
    })
}

fn build_key_baseline(key: &StratKey, present: &[(i32, &[DailyTotal])]) -> Result<KeyBaseline> {
    if present.len() < 2 {
        return Err(MortalityError::InsufficientData {
            context: format!("baseline standard deviation for {key}"),
            got: present.len(),
            need: 2,
        });
    }

    let union: Vec<u16> = present
        .iter()
        .flat_map(|(_, rows)| rows.iter().map(|r| r.day))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut columns = Vec::with_capacity(present.len());
    let mut filled = BTreeMap::new();
    for (year, rows) in present {
        let (column, count) = fill_year(key, *year, rows, &union)?;
        if count > 0 {
            debug!(key = %key, year, filled = count, "Gap-filled reference year");
            filled.insert(*year, count);
        }
        columns.push(column);
    }

    let rows = union
        .iter()
        .enumerate()
        .map(|(j, &day)| {
            let values: Vec<f64> = columns.iter().map(|c| c[j]).collect();
            // At least two values per day, so both statistics exist.
            let m = mean(&values).unwrap_or_default();
            let std = sample_stddev(&values, m).unwrap_or_default();
            BaselineDay {
                day,
                values,
                mean: m,
                std,
            }
        })
        .collect();

    Ok(KeyBaseline {
        years: present.iter().map(|(y, _)| *y).collect(),
        rows,
        filled,
    })
}

/// Puts one year on the union index, returning the column and how many days
/// were interpolated.
fn fill_year(
    key: &StratKey,
    year: i32,
    rows: &[DailyTotal],
    union: &[u16],
) -> Result<(Vec<f64>, usize)> {
    let xs: Vec<f64> = rows.iter().map(|r| f64::from(r.day)).collect();
    let ys: Vec<f64> = rows.iter().map(|r| r.deaths as f64).collect();

    if rows.len() == union.len() {
        return Ok((ys, 0));
    }

    let moments = spline::second_derivatives(&format!("reference year {year} of {key}"), &xs, &ys)?;

    let mut column = Vec::with_capacity(union.len());
    let mut observed = rows.iter().peekable();
    for &day in union {
        match observed.peek() {
            Some(r) if r.day == day => {
                column.push(r.deaths as f64);
                observed.next();
            }
            _ => column.push(spline::evaluate(&xs, &ys, &moments, f64::from(day))?),
        }
    }
    Ok((column, union.len() - rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::records::{Observation, RecordStore};

    fn store_from(rows: impl IntoIterator<Item = (i32, u16, u64)>) -> RecordStore {
        RecordStore::new(
            rows.into_iter()
                .map(|(year, day, deaths)| Observation::new(day, year, deaths))
                .collect(),
        )
    }

    #[test]
    fn test_complete_years_need_no_interpolation() {
        let years = [2010, 2011, 2012, 2013];
        let store = store_from(years.iter().flat_map(|&y| {
            (1..=366u16).map(move |d| (y, d, u64::from(d) + 10 * (y - 2010) as u64))
        }));
        let table = build_baseline(&aggregate(&store, &[]), &years).unwrap();
        let base = table.get(&StratKey::all()).unwrap();

        assert_eq!(base.years(), &years);
        assert_eq!(base.rows().len(), 366);
        let expected_std = (500.0f64 / 3.0).sqrt();
        for row in base.rows() {
            assert_eq!(row.mean, f64::from(row.day) + 15.0);
            assert!((row.std - expected_std).abs() < 1e-9);
        }
        assert!(years.iter().all(|&y| base.filled_days(y) == 0));
    }

    #[test]
    fn test_gap_filled_from_own_year_only() {
        // 2011 misses day 5; its own curve is (day)^2 so the fill is exact
        let mut rows: Vec<(i32, u16, u64)> = (1..=10u16).map(|d| (2010, d, 7)).collect();
        rows.extend((1..=10u16).filter(|&d| d != 5).map(|d| (2011, d, u64::from(d * d))));
        let table = build_baseline(&aggregate(&store_from(rows), &[]), &[2010, 2011]).unwrap();
        let base = table.get(&StratKey::all()).unwrap();

        let day5 = base.row(5).unwrap();
        let idx = base.year_index(2011).unwrap();
        assert!((day5.values[idx] - 25.0).abs() < 1e-9);
        assert!(day5.values[idx] > 16.0 && day5.values[idx] < 36.0);
        assert!((day5.mean - 16.0).abs() < 1e-9);
        assert_eq!(base.filled_days(2011), 1);
        assert_eq!(base.filled_days(2010), 0);
    }

    #[test]
    fn test_union_index_spans_all_years() {
        // leap day only exists in 2012
        let mut rows: Vec<(i32, u16, u64)> = (55..=65u16).filter(|&d| d != 60).map(|d| (2011, d, 10)).collect();
        rows.extend((55..=65u16).map(|d| (2012, d, 20)));
        let table = build_baseline(&aggregate(&store_from(rows), &[]), &[2011, 2012]).unwrap();
        let base = table.get(&StratKey::all()).unwrap();

        assert_eq!(base.first_day(), Some(55));
        assert_eq!(base.last_day(), Some(65));
        assert_eq!(base.rows().len(), 11);
        assert!((base.row(60).unwrap().mean - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_fill_needs_four_points() {
        let mut rows: Vec<(i32, u16, u64)> = (1..=6u16).map(|d| (2010, d, 5)).collect();
        rows.extend([(2011, 1, 5), (2011, 3, 5), (2011, 6, 5)]);
        let err = build_baseline(&aggregate(&store_from(rows), &[]), &[2010, 2011]).unwrap_err();
        assert!(matches!(
            err,
            MortalityError::InsufficientData { got: 3, need: 4, .. }
        ));
    }

    #[test]
    fn test_gap_fill_does_not_extrapolate() {
        let mut rows: Vec<(i32, u16, u64)> = (1..=8u16).map(|d| (2010, d, 5)).collect();
        rows.extend((2..=8u16).map(|d| (2011, d, 5)));
        let err = build_baseline(&aggregate(&store_from(rows), &[]), &[2010, 2011]).unwrap_err();
        assert!(matches!(err, MortalityError::OutOfDomain { .. }));
    }

    #[test]
    fn test_single_reference_year_is_rejected() {
        let rows: Vec<(i32, u16, u64)> = (1..=8u16).map(|d| (2010, d, 5)).collect();
        let err = build_baseline(&aggregate(&store_from(rows), &[]), &[2010, 2011]).unwrap_err();
        assert!(matches!(err, MortalityError::InsufficientData { got: 1, need: 2, .. }));
    }

    #[test]
    fn test_key_without_reference_data_is_absent() {
        let mut obs: Vec<Observation> = Vec::new();
        for year in [2018, 2019] {
            for day in 1..=5u16 {
                obs.push(Observation::new(day, year, 3).with_stratum("Region", "Flanders"));
            }
        }
        for day in 1..=5u16 {
            obs.push(Observation::new(day, 2020, 4).with_stratum("Region", "Brussels"));
        }
        let group = vec!["Region".to_string()];
        let table = build_baseline(&aggregate(&RecordStore::new(obs), &group), &[2018, 2019]).unwrap();

        assert!(table.contains_key(&StratKey::new(["Flanders"])));
        assert!(!table.contains_key(&StratKey::new(["Brussels"])));
        assert_eq!(table.group_keys(), group.as_slice());
    }
}
