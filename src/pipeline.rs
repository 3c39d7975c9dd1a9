//! End-to-end extraction: cleaned records in, baseline, excess and curves out.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregatedSeries, aggregate};
use crate::baseline::{BaselineTable, build_baseline};
use crate::curves::{CurvePlot, CurveSet, KeySeries, SampleRequest};
use crate::excess::{ExcessSeries, compute_excess, ensure_keys_covered};
use crate::output;
use crate::records::{RecordStore, StratKey};
use crate::settings::Settings;

/// Everything derived from one run over the cleaned inputs.
#[derive(Debug, Clone)]
pub struct Report {
    pub target_year: i32,
    /// All-cause totals of the reference years.
    pub reference: AggregatedSeries,
    /// All-cause totals of the target year.
    pub target: AggregatedSeries,
    pub baseline: BaselineTable,
    pub excess: ExcessSeries,
    /// Cause-specific totals, all years.
    pub cause: Option<AggregatedSeries>,
}

/// Per-key totals over the defined excess range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySummary {
    pub key: String,
    pub first_day: u16,
    pub last_day: u16,
    pub deaths: u64,
    pub expected: f64,
    pub excess: f64,
    pub cause_deaths: Option<u64>,
}

/// Options that change how strictly keys are matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Fail when a target-year key has no baseline instead of leaving it out.
    pub strict_keys: bool,
}

/// Runs the computation on already loaded records.
#[tracing::instrument(skip_all, fields(rows = all_deaths.len(), target_year = settings.target_year))]
pub fn build_report(
    all_deaths: &RecordStore,
    cause_deaths: Option<&RecordStore>,
    settings: &Settings,
    options: ExtractOptions,
) -> Result<Report> {
    settings.validate()?;

    let all = aggregate(all_deaths, &settings.extract);
    let reference = all.for_years(&settings.reference_years);
    let target = all.for_year(settings.target_year);
    if target.is_empty() {
        warn!(year = settings.target_year, "No records for the target year");
    }

    let baseline = build_baseline(&reference, &settings.reference_years)
        .context("cannot build the baseline")?;
    if options.strict_keys {
        ensure_keys_covered(&target, settings.target_year, &baseline)?;
    }
    let excess = compute_excess(&target, settings.target_year, &baseline);

    let cause = cause_deaths.map(|store| aggregate(store, &settings.extract));

    info!(
        keys = excess.iter().count(),
        reference_keys = baseline.keys().count(),
        "Extraction finished"
    );

    Ok(Report {
        target_year: settings.target_year,
        reference,
        target,
        baseline,
        excess,
        cause,
    })
}

/// Loads the cleaned files named in `settings` and runs the computation.
///
/// A missing cause-specific file is not an error; the comparison curves are
/// then left out.
pub fn extract(settings: &Settings, options: ExtractOptions) -> Result<Report> {
    let all_path = settings.path(&settings.alldeaths_cleaned_csv);
    let all_deaths = RecordStore::load(&all_path)?;

    let cause_path = settings.path(&settings.covdeaths_cleaned_csv);
    let cause_deaths = if cause_path.exists() {
        Some(RecordStore::load(&cause_path)?)
    } else {
        warn!(path = %cause_path.display(), "No cause-specific file, skipping comparison");
        None
    };

    build_report(&all_deaths, cause_deaths.as_ref(), settings, options)
}

/// Writes the excess, baseline and cause-specific tables named in `settings`.
pub fn write_report(report: &Report, settings: &Settings) -> Result<()> {
    output::write_excess(&settings.path(&settings.alldeaths_target_csv), &report.excess)?;
    output::write_baseline(
        &settings.path(&settings.alldeaths_reference_csv),
        &report.baseline,
    )?;
    if let Some(cause) = &report.cause {
        output::write_aggregated(&settings.path(&settings.covdeaths_target_csv), cause)?;
    }
    Ok(())
}

impl Report {
    /// Borrowed inputs of the curves of `key`, if it has a baseline and
    /// target-year data.
    pub fn key_series<'a>(&'a self, key: &'a StratKey) -> Option<KeySeries<'a>> {
        Some(KeySeries {
            key,
            baseline: self.baseline.get(key)?,
            current: self.target.partition(key, self.target_year)?,
            excess: self.excess.rows(key)?,
            cause: self
                .cause
                .as_ref()
                .and_then(|c| c.partition(key, self.target_year)),
        })
    }

    /// Keys that have excess rows, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &StratKey> {
        self.excess.iter().map(|(key, _)| key)
    }

    /// Samples the curves of every key (or only `only`, when given).
    pub fn curve_plots(
        &self,
        request: &SampleRequest,
        only: Option<&StratKey>,
    ) -> Result<Vec<CurvePlot>> {
        let mut plots = Vec::new();
        for key in self.keys().filter(|k| only.is_none_or(|o| o == *k)) {
            let Some(series) = self.key_series(key) else {
                continue;
            };
            let curves = CurveSet::build(series)
                .with_context(|| format!("cannot build curves for {key}"))?;
            let non_cause = curves.non_cause()?;
            plots.push(
                curves
                    .sample(non_cause.as_ref(), request)
                    .with_context(|| format!("cannot sample curves for {key}"))?,
            );
        }
        if plots.is_empty() {
            warn!("No key has curves to sample");
        }
        Ok(plots)
    }

    pub fn summary(&self) -> Vec<KeySummary> {
        self.excess
            .iter()
            .filter_map(|(key, rows)| {
                let (first, last) = (rows.first()?, rows.last()?);
                let cause_deaths = self
                    .cause
                    .as_ref()
                    .and_then(|c| c.partition(key, self.target_year))
                    .map(|days| {
                        days.iter()
                            .filter(|d| d.day >= first.day && d.day <= last.day)
                            .map(|d| d.deaths)
                            .sum()
                    });
                Some(KeySummary {
                    key: key.to_string(),
                    first_day: first.day,
                    last_day: last.day,
                    deaths: rows.iter().map(|r| r.deaths).sum(),
                    expected: rows.iter().map(|r| r.baseline_mean).sum(),
                    excess: last.cumulative_excess,
                    cause_deaths,
                })
            })
            .collect()
    }
}
