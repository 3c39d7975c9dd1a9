//! Groups observations into per-day totals with running cumulative deaths.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::interpolate::DayIndexed;
use crate::records::{Observation, RecordStore, StratKey};

/// Deaths on one day of one partition, plus the running total up to that day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyTotal {
    pub day: u16,
    pub deaths: u64,
    pub cumulative: u64,
}

impl DayIndexed for DailyTotal {
    fn day(&self) -> u16 {
        self.day
    }
}

/// Per-day totals for every `(stratum key, year)` partition.
///
/// Rows inside a partition are ordered by day and `cumulative` is the prefix
/// sum of `deaths` within that partition only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedSeries {
    group_keys: Vec<String>,
    partitions: BTreeMap<StratKey, BTreeMap<i32, Vec<DailyTotal>>>,
}

/// Sums deaths per `(key, year, day)` and accumulates within each `(key, year)`.
///
/// Observations missing any of `group_keys` are dropped. With no group keys
/// every year forms a single partition under [`StratKey::all`].
#[tracing::instrument(skip(store), fields(rows = store.len()))]
pub fn aggregate(store: &RecordStore, group_keys: &[String]) -> AggregatedSeries {
    let mut sums: BTreeMap<(StratKey, i32, u16), u64> = BTreeMap::new();
    let mut dropped = 0usize;

    for obs in store.observations() {
        let Some(key) = obs.key_for(group_keys) else {
            dropped += 1;
            continue;
        };
        *sums.entry((key, obs.year, obs.day)).or_default() += obs.deaths;
    }

    if dropped > 0 {
        debug!(dropped, "Observations missing a group key were dropped");
    }

    let mut partitions: BTreeMap<StratKey, BTreeMap<i32, Vec<DailyTotal>>> = BTreeMap::new();
    for ((key, year, day), deaths) in sums {
        let series = partitions.entry(key).or_default().entry(year).or_default();
        let cumulative = series.last().map_or(0, |prev| prev.cumulative) + deaths;
        series.push(DailyTotal {
            day,
            deaths,
            cumulative,
        });
    }

    info!(
        keys = partitions.len(),
        partitions = partitions.values().map(BTreeMap::len).sum::<usize>(),
        "Aggregation complete"
    );

    AggregatedSeries {
        group_keys: group_keys.to_vec(),
        partitions,
    }
}

impl AggregatedSeries {
    pub fn group_keys(&self) -> &[String] {
        &self.group_keys
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partition(&self, key: &StratKey, year: i32) -> Option<&[DailyTotal]> {
        self.partitions
            .get(key)
            .and_then(|years| years.get(&year))
            .map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &StratKey> {
        self.partitions.keys()
    }

    pub fn years(&self) -> BTreeSet<i32> {
        self.partitions
            .values()
            .flat_map(|years| years.keys().copied())
            .collect()
    }

    /// All partitions in `(key, year)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&StratKey, i32, &[DailyTotal])> {
        self.partitions.iter().flat_map(|(key, years)| {
            years
                .iter()
                .map(move |(year, rows)| (key, *year, rows.as_slice()))
        })
    }

    /// Keeps only the partitions of `year`.
    pub fn for_year(&self, year: i32) -> AggregatedSeries {
        self.retain_years(|y| y == year)
    }

    /// Keeps only the partitions whose year is listed.
    pub fn for_years(&self, years: &[i32]) -> AggregatedSeries {
        self.retain_years(|y| years.contains(&y))
    }

    fn retain_years(&self, keep: impl Fn(i32) -> bool) -> AggregatedSeries {
        let partitions = self
            .partitions
            .iter()
            .filter_map(|(key, years)| {
                let kept: BTreeMap<i32, Vec<DailyTotal>> = years
                    .iter()
                    .filter(|(y, _)| keep(**y))
                    .map(|(y, rows)| (*y, rows.clone()))
                    .collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect();
        AggregatedSeries {
            group_keys: self.group_keys.clone(),
            partitions,
        }
    }

    /// One observation per aggregated day, carrying the key as strata.
    pub fn to_observations(&self) -> Vec<Observation> {
        self.iter()
            .flat_map(|(key, year, rows)| {
                rows.iter().map(move |row| {
                    let mut obs = Observation::new(row.day, year, row.deaths);
                    for (column, value) in self.group_keys.iter().zip(key.values()) {
                        obs = obs.with_stratum(column, value);
                    }
                    obs
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sample_store() -> RecordStore {
        RecordStore::new(vec![
            Observation::new(2, 2019, 5).with_stratum("Region", "Flanders").with_stratum("Sex", "M"),
            Observation::new(1, 2019, 3).with_stratum("Region", "Flanders").with_stratum("Sex", "F"),
            Observation::new(1, 2019, 4).with_stratum("Region", "Flanders").with_stratum("Sex", "M"),
            Observation::new(1, 2019, 6).with_stratum("Region", "Wallonia").with_stratum("Sex", "M"),
            Observation::new(3, 2019, 2).with_stratum("Region", "Wallonia").with_stratum("Sex", "F"),
            Observation::new(1, 2020, 9).with_stratum("Region", "Flanders").with_stratum("Sex", "F"),
            Observation::new(2, 2020, 1).with_stratum("Sex", "F"),
        ])
    }

    #[test]
    fn test_aggregate_without_keys_one_partition_per_year() {
        let series = aggregate(&sample_store(), &[]);
        assert_eq!(series.keys().count(), 1);

        let y2019 = series.partition(&StratKey::all(), 2019).unwrap();
        assert_eq!(
            y2019,
            &[
                DailyTotal { day: 1, deaths: 13, cumulative: 13 },
                DailyTotal { day: 2, deaths: 5, cumulative: 18 },
                DailyTotal { day: 3, deaths: 2, cumulative: 20 },
            ]
        );

        // the cumulative restarts for the next year
        let y2020 = series.partition(&StratKey::all(), 2020).unwrap();
        assert_eq!(y2020[0].cumulative, 9);
        assert_eq!(y2020[1].cumulative, 10);
    }

    #[test]
    fn test_aggregate_drops_rows_missing_a_key() {
        let series = aggregate(&sample_store(), &keys(&["Region"]));
        let total: u64 = series.iter().flat_map(|(_, _, rows)| rows).map(|r| r.deaths).sum();
        assert_eq!(total, 29);
        assert_eq!(series.years(), BTreeSet::from([2019, 2020]));

        let flanders = series.partition(&StratKey::new(["Flanders"]), 2019).unwrap();
        assert_eq!(flanders.len(), 2);
        assert_eq!(flanders[0].deaths, 7);
        assert_eq!(flanders[1].cumulative, 12);
    }

    #[test]
    fn test_cumulative_is_monotone_and_ends_at_total() {
        let series = aggregate(&sample_store(), &keys(&["Region", "Sex"]));
        for (key, year, rows) in series.iter() {
            assert!(rows.windows(2).all(|w| w[0].cumulative <= w[1].cumulative));
            assert!(rows.windows(2).all(|w| w[0].day < w[1].day));
            let sum: u64 = rows.iter().map(|r| r.deaths).sum();
            assert_eq!(rows.last().unwrap().cumulative, sum, "{key} {year}");
        }
    }

    #[test]
    fn test_partition_independence() {
        let store = sample_store();
        let full = aggregate(&store, &keys(&["Region"]));

        let wallonia_only = RecordStore::new(
            store
                .observations()
                .iter()
                .filter(|o| o.strata.get("Region").map(String::as_str) == Some("Wallonia"))
                .cloned()
                .collect(),
        );
        let isolated = aggregate(&wallonia_only, &keys(&["Region"]));

        let key = StratKey::new(["Wallonia"]);
        assert_eq!(full.partition(&key, 2019), isolated.partition(&key, 2019));
    }

    #[test]
    fn test_reaggregation_is_idempotent() {
        let group = keys(&["Region", "Sex"]);
        let once = aggregate(&sample_store(), &group);
        let twice = aggregate(&RecordStore::new(once.to_observations()), &group);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_for_year_restricts_partitions() {
        let series = aggregate(&sample_store(), &keys(&["Region"]));
        let only_2020 = series.for_year(2020);
        assert_eq!(only_2020.years(), BTreeSet::from([2020]));
        assert_eq!(only_2020.keys().count(), 1);
        assert_eq!(only_2020.group_keys(), series.group_keys());
    }
}
