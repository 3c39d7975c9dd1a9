//! Run settings: which years form the baseline, which strata to extract and
//! where the data files live.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "reference_years": "2010-2019",
//!   "extract": "Region, Sex",
//!   "target_year": 2020,
//!   "data_dir": "data"
//! }
//! ```

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "EXCESS_DEATHS_SETTINGS";

/// File picked up from the working directory when nothing else is given.
pub const DEFAULT_SETTINGS_FILE: &str = "excess_deaths.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(deserialize_with = "de_years")]
    pub reference_years: Vec<i32>,
    #[serde(deserialize_with = "de_columns")]
    pub extract: Vec<String>,
    pub target_year: i32,
    pub data_dir: PathBuf,

    pub alldeaths_url: String,
    pub covdeaths_url: String,

    pub alldeaths_raw_csv: String,
    pub covdeaths_raw_csv: String,
    pub alldeaths_cleaned_csv: String,
    pub covdeaths_cleaned_csv: String,

    pub alldeaths_target_csv: String,
    pub alldeaths_reference_csv: String,
    pub covdeaths_target_csv: String,
    pub curves_json: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reference_years: (2010..=2019).collect(),
            extract: Vec::new(),
            target_year: 2020,
            data_dir: PathBuf::from("."),
            alldeaths_url:
                "https://statbel.fgov.be/sites/default/files/files/opendata/deathday/DEMO_DEATH_OPEN.zip"
                    .to_string(),
            covdeaths_url: "https://epistat.sciensano.be/Data/COVID19BE_MORT.csv".to_string(),
            alldeaths_raw_csv: "DEMO_DEATH_OPEN.txt".to_string(),
            covdeaths_raw_csv: "COVID19BE_MORT.csv".to_string(),
            alldeaths_cleaned_csv: "alldeaths_cleaned.csv".to_string(),
            covdeaths_cleaned_csv: "covdeaths_cleaned.csv".to_string(),
            alldeaths_target_csv: "alldeaths_target.csv".to_string(),
            alldeaths_reference_csv: "alldeaths_reference.csv".to_string(),
            covdeaths_target_csv: "covdeaths_target.csv".to_string(),
            curves_json: "curves.json".to_string(),
        }
    }
}

impl Settings {
    /// Loads the settings from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))?;
        settings.validate()?;
        info!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    /// Resolves the settings file from `explicit`, then `$EXCESS_DEATHS_SETTINGS`,
    /// then `excess_deaths.json` in the working directory; falls back to the
    /// defaults when none exists.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return Self::load(Path::new(&path));
        }
        let fallback = Path::new(DEFAULT_SETTINGS_FILE);
        if fallback.exists() {
            return Self::load(fallback);
        }
        debug!("No settings file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.reference_years.is_empty(), "no reference years configured");
        ensure!(
            !self.reference_years.contains(&self.target_year),
            "target year {} is also listed as a reference year",
            self.target_year
        );
        Ok(())
    }

    /// Path of a configured file name inside `data_dir`.
    pub fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

/// Parses `"2010-2013, 2015"` into `[2010, 2011, 2012, 2013, 2015]`.
pub fn parse_years(spec: &str) -> Result<Vec<i32>> {
    let mut years = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().with_context(|| format!("bad year '{start}'"))?;
                let end: i32 = end.trim().parse().with_context(|| format!("bad year '{end}'"))?;
                if end < start {
                    bail!("year range '{part}' is reversed");
                }
                years.extend(start..=end);
            }
            None => years.push(part.parse().with_context(|| format!("bad year '{part}'"))?),
        }
    }
    Ok(years)
}

/// Parses `"Region, Sex"` into column names, dropping empty entries.
pub fn parse_columns(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YearSpec {
    Text(String),
    List(Vec<i32>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnSpec {
    Text(String),
    List(Vec<String>),
}

fn de_years<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<i32>, D::Error> {
    match YearSpec::deserialize(deserializer)? {
        YearSpec::Text(s) => parse_years(&s).map_err(serde::de::Error::custom),
        YearSpec::List(years) => Ok(years),
    }
}

fn de_columns<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match ColumnSpec::deserialize(deserializer)? {
        ColumnSpec::Text(s) => parse_columns(&s),
        ColumnSpec::List(columns) => columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_years_with_ranges() {
        assert_eq!(parse_years("2010-2012, 2015").unwrap(), vec![2010, 2011, 2012, 2015]);
        assert_eq!(parse_years("2019").unwrap(), vec![2019]);
        assert!(parse_years("").unwrap().is_empty());
        assert!(parse_years("2015-2012").is_err());
        assert!(parse_years("20x0").is_err());
    }

    #[test]
    fn test_parse_columns_drops_blanks() {
        assert_eq!(parse_columns(" Region, ,Sex "), vec!["Region", "Sex"]);
        assert!(parse_columns("").is_empty());
    }

    #[test]
    fn test_settings_from_json_text_and_lists() {
        let text: Settings =
            serde_json::from_str(r#"{"reference_years": "2015-2017", "extract": "Region"}"#).unwrap();
        assert_eq!(text.reference_years, vec![2015, 2016, 2017]);
        assert_eq!(text.extract, vec!["Region"]);
        assert_eq!(text.target_year, 2020);

        let lists: Settings = serde_json::from_str(
            r#"{"reference_years": [2012, 2014], "extract": [], "target_year": 2021}"#,
        )
        .unwrap();
        assert_eq!(lists.reference_years, vec![2012, 2014]);
        assert!(lists.extract.is_empty());
        assert!(lists.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlapping_target() {
        let settings = Settings {
            reference_years: vec![2019, 2020],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let empty = Settings {
            reference_years: vec![],
            ..Settings::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reference_years.len(), 10);
        assert_eq!(settings.path("x.csv"), PathBuf::from("./x.csv"));
    }
}
