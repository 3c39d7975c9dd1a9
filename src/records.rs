//! Canonical record store: cleaned death observations held in memory.
//!
//! The on-disk schema is a CSV with `Date` (or `Daynum`), `Year` and
//! `Deaths` columns; every other column is treated as a stratum such as
//! `Region`, `Sex` or `AgeGroup`.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, NaiveDate};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::calendar::{MAX_DAY, day_of_year};

pub const DATE_COLUMN: &str = "Date";
pub const DAY_COLUMN: &str = "Daynum";
pub const YEAR_COLUMN: &str = "Year";
pub const DEATHS_COLUMN: &str = "Deaths";

/// Ordered tuple of stratum values identifying one partition.
///
/// The empty key stands for the whole population.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StratKey(pub Vec<String>);

impl StratKey {
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for StratKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(all)")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

/// One cleaned row: deaths counted on one day of one year for one stratum.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub day: u16,
    pub year: i32,
    pub strata: BTreeMap<String, String>,
    pub deaths: u64,
}

impl Observation {
    pub fn new(day: u16, year: i32, deaths: u64) -> Self {
        Self {
            day,
            year,
            strata: BTreeMap::new(),
            deaths,
        }
    }

    pub fn on_date(date: NaiveDate, deaths: u64) -> Self {
        Self::new(day_of_year(date), date.year(), deaths)
    }

    pub fn with_stratum(mut self, column: &str, value: &str) -> Self {
        self.strata.insert(column.to_string(), value.to_string());
        self
    }

    /// Builds the grouping key for `columns`, or `None` if any value is missing.
    pub fn key_for(&self, columns: &[String]) -> Option<StratKey> {
        columns
            .iter()
            .map(|c| self.strata.get(c).cloned())
            .collect::<Option<Vec<_>>>()
            .map(StratKey)
    }
}

/// Read-only collection of observations.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    observations: Vec<Observation>,
}

impl RecordStore {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Loads a canonical CSV, gunzipping it first if the name ends in `.gz`.
    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let reader: Box<dyn Read> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let store = Self::from_csv_reader(reader)
            .with_context(|| format!("cannot read records from {}", path.display()))?;
        info!(rows = store.len(), "Records loaded");
        Ok(store)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();

        let position = |name: &str| headers.iter().position(|h| h == name);
        let date_idx = position(DATE_COLUMN);
        let day_idx = position(DAY_COLUMN);
        let year_idx = position(YEAR_COLUMN);
        let deaths_idx =
            position(DEATHS_COLUMN).ok_or_else(|| anyhow!("missing '{DEATHS_COLUMN}' column"))?;
        if date_idx.is_none() && day_idx.is_none() {
            bail!("need a '{DATE_COLUMN}' or '{DAY_COLUMN}' column");
        }
        if date_idx.is_none() && year_idx.is_none() {
            bail!("need a '{YEAR_COLUMN}' column when no '{DATE_COLUMN}' is given");
        }

        let reserved = [date_idx, day_idx, year_idx, Some(deaths_idx)];
        let strata_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !reserved.contains(&Some(*i)))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut observations = Vec::new();
        let mut skipped = 0usize;

        for (line, result) in rdr.records().enumerate() {
            let row = result?;
            let cell = |idx: usize| row.get(idx).map(str::trim).unwrap_or("");

            let deaths_cell = cell(deaths_idx);
            if deaths_cell.is_empty() {
                skipped += 1;
                continue;
            }
            let deaths = parse_count(deaths_cell)
                .with_context(|| format!("row {}: bad deaths value '{deaths_cell}'", line + 2))?;

            let date = match date_idx.map(cell).filter(|s| !s.is_empty()) {
                Some(s) => Some(
                    parse_date(s).with_context(|| format!("row {}: bad date '{s}'", line + 2))?,
                ),
                None => None,
            };

            let year = match year_idx.map(cell).filter(|s| !s.is_empty()) {
                Some(s) => s
                    .parse::<i32>()
                    .with_context(|| format!("row {}: bad year '{s}'", line + 2))?,
                None => match date {
                    Some(d) => d.year(),
                    None => {
                        skipped += 1;
                        continue;
                    }
                },
            };

            let day = match (date, day_idx.map(cell).filter(|s| !s.is_empty())) {
                (Some(d), _) => day_of_year(d),
                (None, Some(s)) => s
                    .parse::<u16>()
                    .ok()
                    .filter(|d| (1..=MAX_DAY).contains(d))
                    .ok_or_else(|| anyhow!("row {}: bad day-of-year '{s}'", line + 2))?,
                (None, None) => {
                    skipped += 1;
                    continue;
                }
            };

            let strata = strata_columns
                .iter()
                .filter_map(|(idx, name)| {
                    let value = cell(*idx);
                    (!value.is_empty()).then(|| (name.clone(), value.to_string()))
                })
                .collect();

            observations.push(Observation {
                day,
                year,
                strata,
                deaths,
            });
        }

        if skipped > 0 {
            debug!(skipped, "Rows without deaths, date or year were skipped");
        }

        Ok(Self::new(observations))
    }
}

/// Accepts day-first dates as written by the raw exports as well as ISO dates.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .with_context(|| format!("unrecognised date '{s}'"))
}

// Cleaned files occasionally carry counts written as floats ("12.0").
fn parse_count(s: &str) -> Result<u64> {
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    let f: f64 = s.parse()?;
    if f < 0.0 || f.fract() != 0.0 {
        bail!("not a non-negative whole number");
    }
    Ok(f as u64)
}
