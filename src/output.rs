//! Persistence of extracted tables and sampled curves.
//!
//! Tables are comma-separated with the stratum columns first, so an
//! aggregated file can be loaded back through [`RecordStore::load`].
//!
//! [`RecordStore::load`]: crate::records::RecordStore::load

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregate::AggregatedSeries;
use crate::baseline::BaselineTable;
use crate::curves::CurvePlot;
use crate::excess::ExcessSeries;
use crate::records::{DAY_COLUMN, DEATHS_COLUMN, YEAR_COLUMN};

fn create_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    Ok(WriterBuilder::new().from_writer(file))
}

/// Writes one row per aggregated day: key columns, `Year`, `Daynum`,
/// `Deaths`, `Cumdeaths`.
pub fn write_aggregated(path: &Path, series: &AggregatedSeries) -> Result<usize> {
    let mut writer = create_writer(path)?;

    let mut header: Vec<&str> = series.group_keys().iter().map(String::as_str).collect();
    header.extend([YEAR_COLUMN, DAY_COLUMN, DEATHS_COLUMN, "Cumdeaths"]);
    writer.write_record(&header)?;

    let mut rows = 0usize;
    for (key, year, totals) in series.iter() {
        for total in totals {
            let mut record: Vec<String> = key.values().to_vec();
            record.extend([
                year.to_string(),
                total.day.to_string(),
                total.deaths.to_string(),
                total.cumulative.to_string(),
            ]);
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;

    info!(rows, path = %path.display(), "Aggregated table written");
    Ok(rows)
}

/// Writes the baseline: key columns, `Daynum`, one column per reference year
/// of the key, then `Mean` and `Std`.
///
/// Keys can lack some reference years, so the year columns follow the
/// table's full reference list and are left empty where a key has no value.
pub fn write_baseline(path: &Path, table: &BaselineTable) -> Result<usize> {
    let mut writer = create_writer(path)?;

    let mut header: Vec<String> = table.group_keys().to_vec();
    header.push(DAY_COLUMN.to_string());
    header.extend(table.reference_years().iter().map(i32::to_string));
    header.extend(["Mean".to_string(), "Std".to_string()]);
    writer.write_record(&header)?;

    let mut rows = 0usize;
    for (key, base) in table.iter() {
        let columns: Vec<Option<usize>> = table
            .reference_years()
            .iter()
            .map(|&year| base.year_index(year))
            .collect();

        for day in base.rows() {
            let mut record: Vec<String> = key.values().to_vec();
            record.push(day.day.to_string());
            record.extend(
                columns
                    .iter()
                    .map(|idx| idx.map(|i| day.values[i].to_string()).unwrap_or_default()),
            );
            record.push(day.mean.to_string());
            record.push(day.std.to_string());
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;

    info!(rows, path = %path.display(), "Baseline table written");
    Ok(rows)
}

/// Writes the excess rows of the target year, key columns first.
pub fn write_excess(path: &Path, series: &ExcessSeries) -> Result<usize> {
    let mut writer = create_writer(path)?;

    let mut header: Vec<String> = series.group_keys().to_vec();
    header.extend(
        [YEAR_COLUMN, DAY_COLUMN, DEATHS_COLUMN, "Cumdeaths", "Mean", "Excess", "Cumexcess"]
            .map(String::from),
    );
    writer.write_record(&header)?;

    let mut rows = 0usize;
    for (key, excess) in series.iter() {
        for row in excess {
            let mut record: Vec<String> = key.values().to_vec();
            record.extend([
                series.year().to_string(),
                row.day.to_string(),
                row.deaths.to_string(),
                row.cumulative_deaths.to_string(),
                row.baseline_mean.to_string(),
                row.excess.to_string(),
                row.cumulative_excess.to_string(),
            ]);
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;

    info!(rows, path = %path.display(), "Excess table written");
    Ok(rows)
}

/// Writes sampled curves as pretty-printed JSON.
pub fn write_curves(path: &Path, plots: &[CurvePlot]) -> Result<()> {
    let json = serde_json::to_string_pretty(plots)?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    info!(plots = plots.len(), path = %path.display(), "Curves written");
    Ok(())
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    debug!("{:#?}", value);
}
