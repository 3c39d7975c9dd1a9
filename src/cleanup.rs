//! Relabels the raw exports into the canonical record schema.

use anyhow::{Context, Result};
use chrono::Datelike;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::records::{DATE_COLUMN, YEAR_COLUMN, parse_date};

/// How one raw export maps onto the canonical columns.
#[derive(Debug, Clone, Copy)]
pub struct RawSchema {
    pub name: &'static str,
    pub delimiter: u8,
    /// `(raw header, canonical header)` pairs; other headers are kept as-is.
    pub renames: &'static [(&'static str, &'static str)],
    /// Per canonical column, `(raw value, label)` replacements.
    pub labels: &'static [(&'static str, &'static [(&'static str, &'static str)])],
    /// Add a `Year` column taken from the date when the export has none.
    pub year_from_date: bool,
}

/// Daily deaths from all causes (StatBel open data).
pub const ALL_DEATHS: RawSchema = RawSchema {
    name: "all-cause deaths",
    delimiter: b';',
    renames: &[
        ("CD_ARR", "Arr"),
        ("CD_PROV", "Prov"),
        ("CD_REGIO", "Region"),
        ("CD_SEX", "Sex"),
        ("CD_AGEGROUP", "AgeGroup"),
        ("DT_DATE", "Date"),
        ("NR_YEAR", "Year"),
        ("NR_WEEK", "Week"),
        ("MS_NUM_DEATH", "Deaths"),
    ],
    labels: &[("Sex", SEX_LABELS), ("Region", REGION_LABELS)],
    year_from_date: false,
};

const SEX_LABELS: &[(&str, &str)] = &[("1", "M"), ("2", "F")];
const REGION_LABELS: &[(&str, &str)] = &[("2000", "Flanders"), ("3000", "Wallonia"), ("4000", "Brussels")];

/// Daily COVID-19 deaths (Sciensano).
pub const CAUSE_DEATHS: RawSchema = RawSchema {
    name: "cause-specific deaths",
    delimiter: b',',
    renames: &[
        ("DATE", "Date"),
        ("REGION", "Region"),
        ("AGEGROUP", "AgeGroup"),
        ("SEX", "Sex"),
        ("DEATHS", "Deaths"),
    ],
    labels: &[],
    year_from_date: true,
};

/// Rewrites a raw export as a canonical comma-separated file with ISO dates.
/// Returns the number of rows written.
pub fn relabel<R: Read, W: Write>(schema: &RawSchema, reader: R, writer: W) -> Result<usize> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(schema.delimiter)
        .from_reader(reader);
    let mut wtr = WriterBuilder::new().from_writer(writer);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| {
            let h = h.trim();
            schema
                .renames
                .iter()
                .find(|(raw, _)| *raw == h)
                .map_or(h, |(_, canonical)| *canonical)
                .to_string()
        })
        .collect();

    let date_idx = headers.iter().position(|h| h == DATE_COLUMN);
    let add_year = schema.year_from_date && !headers.iter().any(|h| h == YEAR_COLUMN);
    let labels: Vec<Option<&[(&str, &str)]>> = headers
        .iter()
        .map(|h| {
            schema
                .labels
                .iter()
                .find(|(column, _)| *column == h.as_str())
                .map(|(_, map)| *map)
        })
        .collect();

    let mut out_headers = StringRecord::from(headers.clone());
    if add_year {
        out_headers.push_field(YEAR_COLUMN);
    }
    wtr.write_record(&out_headers)?;

    let mut written = 0usize;
    for (line, result) in rdr.records().enumerate() {
        let row = result?;
        let mut out = StringRecord::new();
        let mut year = None;

        for (idx, value) in row.iter().enumerate() {
            let value = value.trim();
            if Some(idx) == date_idx && !value.is_empty() {
                let date = parse_date(value)
                    .with_context(|| format!("{} row {}: bad date", schema.name, line + 2))?;
                year = Some(date.year());
                out.push_field(&date.format("%Y-%m-%d").to_string());
                continue;
            }
            let relabelled = labels
                .get(idx)
                .copied()
                .flatten()
                .and_then(|map| map.iter().find(|(raw, _)| *raw == value))
                .map_or(value, |(_, label)| *label);
            out.push_field(relabelled);
        }
        if add_year {
            out.push_field(&year.map(|y| y.to_string()).unwrap_or_default());
        }

        wtr.write_record(&out)?;
        written += 1;
    }

    wtr.flush()?;
    Ok(written)
}

/// Relabels the raw file at `input` into `output`.
#[tracing::instrument(skip_all, fields(schema = schema.name, input = %input.display()))]
pub fn clean_file(schema: &RawSchema, input: &Path, output: &Path) -> Result<usize> {
    let reader =
        File::open(input).with_context(|| format!("cannot open raw file {}", input.display()))?;
    let writer = File::create(output)
        .with_context(|| format!("cannot create cleaned file {}", output.display()))?;
    let rows = relabel(schema, reader, writer)?;
    info!(rows, output = %output.display(), "Raw file relabelled");
    Ok(rows)
}
