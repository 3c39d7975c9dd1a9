//! Excess deaths of the target year over the baseline mean.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::aggregate::AggregatedSeries;
use crate::baseline::BaselineTable;
use crate::error::{MortalityError, Result};
use crate::interpolate::DayIndexed;
use crate::records::StratKey;

/// Observed deaths against the baseline on one day of the target year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExcessRow {
    pub day: u16,
    pub deaths: u64,
    pub cumulative_deaths: u64,
    pub baseline_mean: f64,
    pub excess: f64,
    pub cumulative_excess: f64,
}

impl DayIndexed for ExcessRow {
    fn day(&self) -> u16 {
        self.day
    }
}

/// Excess rows of the target year, per key.
///
/// A key is present only if it has baseline data; within a key, only days
/// present in both the target year and the baseline (and not past the
/// baseline's last day) have a row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExcessSeries {
    year: i32,
    group_keys: Vec<String>,
    partitions: BTreeMap<StratKey, Vec<ExcessRow>>,
}

impl ExcessSeries {
    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn group_keys(&self) -> &[String] {
        &self.group_keys
    }

    pub fn rows(&self, key: &StratKey) -> Option<&[ExcessRow]> {
        self.partitions.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StratKey, &[ExcessRow])> {
        self.partitions.iter().map(|(k, rows)| (k, rows.as_slice()))
    }

    fn row(&self, key: &StratKey, day: u16) -> Result<&ExcessRow> {
        self.partitions
            .get(key)
            .and_then(|rows| {
                rows.binary_search_by_key(&day, |r| r.day)
                    .ok()
                    .map(|i| &rows[i])
            })
            .ok_or_else(|| MortalityError::UndefinedExcess {
                key: key.clone(),
                day,
            })
    }

    pub fn excess_at(&self, key: &StratKey, day: u16) -> Result<f64> {
        self.row(key, day).map(|r| r.excess)
    }

    pub fn cumulative_excess_at(&self, key: &StratKey, day: u16) -> Result<f64> {
        self.row(key, day).map(|r| r.cumulative_excess)
    }

    /// Cumulative excess over the whole defined range of `key`.
    pub fn total_excess(&self, key: &StratKey) -> Option<f64> {
        self.partitions
            .get(key)
            .and_then(|rows| rows.last())
            .map(|r| r.cumulative_excess)
    }
}

/// Subtracts the baseline mean from the `year` partitions of `current`.
///
/// Keys with no baseline are left out (their excess is undefined, not zero);
/// use [`ensure_keys_covered`] to turn that into an error instead.
#[tracing::instrument(skip(current, baseline))]
pub fn compute_excess(current: &AggregatedSeries, year: i32, baseline: &BaselineTable) -> ExcessSeries {
    let mut partitions = BTreeMap::new();

    for key in current.keys() {
        let Some(observed) = current.partition(key, year) else {
            continue;
        };
        let Some(base) = baseline.get(key) else {
            warn!(key = %key, "No baseline for key, excess left undefined");
            continue;
        };
        let Some(last_day) = base.last_day() else {
            continue;
        };

        let mut running = 0.0;
        let rows: Vec<ExcessRow> = observed
            .iter()
            .take_while(|o| o.day <= last_day)
            .filter_map(|o| {
                let mean = base.row(o.day)?.mean;
                let excess = o.deaths as f64 - mean;
                running += excess;
                Some(ExcessRow {
                    day: o.day,
                    deaths: o.deaths,
                    cumulative_deaths: o.cumulative,
                    baseline_mean: mean,
                    excess,
                    cumulative_excess: running,
                })
            })
            .collect();

        if rows.len() < observed.len() {
            info!(
                key = %key,
                defined = rows.len(),
                observed = observed.len(),
                "Excess undefined on days without a baseline"
            );
        }
        partitions.insert(key.clone(), rows);
    }

    ExcessSeries {
        year,
        group_keys: current.group_keys().to_vec(),
        partitions,
    }
}

/// Fails with [`MortalityError::DisjointKey`] for the first key of the
/// `year` partitions that the baseline does not cover.
pub fn ensure_keys_covered(current: &AggregatedSeries, year: i32, baseline: &BaselineTable) -> Result<()> {
    match current
        .keys()
        .filter(|key| current.partition(key, year).is_some())
        .find(|key| !baseline.contains_key(key))
    {
        Some(key) => Err(MortalityError::DisjointKey(key.clone())),
        None => Ok(()),
    }
}
