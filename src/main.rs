//! CLI entry point for the excess-deaths tool.
//!
//! Provides subcommands for downloading the raw exports, relabelling them,
//! extracting baseline and excess tables, and sampling curves for plotting.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use excess_deaths::{
    calendar::month_day_to_day,
    cleanup::{ALL_DEATHS, CAUSE_DEATHS, clean_file},
    curves::SampleRequest,
    fetch::{BasicClient, download},
    output::{print_json, print_pretty, write_curves},
    pipeline::{ExtractOptions, extract, write_report},
    records::StratKey,
    settings::{Settings, parse_columns},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "excess_deaths")]
#[command(about = "Excess mortality against a multi-year baseline", long_about = None)]
struct Cli {
    /// Settings file (JSON); defaults to $EXCESS_DEATHS_SETTINGS or excess_deaths.json
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the raw exports into the data directory
    Download {
        /// Also download the all-cause archive (large)
        #[arg(short, long, default_value_t = false)]
        all: bool,
    },
    /// Relabel the raw exports into canonical CSVs
    Clean,
    /// Aggregate, build the baseline and write the excess tables
    Extract {
        /// Fail when a target-year stratum has no baseline
        #[arg(long, default_value_t = false)]
        strict_keys: bool,
    },
    /// Sample the curves of every stratum into a JSON file
    Curves {
        /// First day of the window, e.g. "Jan 24"
        #[arg(long, default_value = "Jan 1")]
        from: String,

        /// Last day of the window, e.g. "May 8"
        #[arg(long, default_value = "Dec 31")]
        to: String,

        /// Points per curve
        #[arg(short, long, default_value_t = 500)]
        num: usize,

        /// Rebase the cumulative excess to zero on this day, e.g. "Mar 10"
        #[arg(long)]
        since: Option<String>,

        /// Only this stratum, values comma-separated in extract order
        #[arg(short, long)]
        key: Option<String>,

        /// Output file; defaults to the configured curves file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Log per-stratum totals of the target year
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/excess_deaths.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("excess_deaths.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(cli.settings.as_deref())?;

    match cli.command {
        Commands::Download { all } => {
            download_all(&settings, all).await?;
        }
        Commands::Clean => {
            clean_file(
                &ALL_DEATHS,
                &settings.path(&settings.alldeaths_raw_csv),
                &settings.path(&settings.alldeaths_cleaned_csv),
            )?;
            clean_file(
                &CAUSE_DEATHS,
                &settings.path(&settings.covdeaths_raw_csv),
                &settings.path(&settings.covdeaths_cleaned_csv),
            )?;
        }
        Commands::Extract { strict_keys } => {
            let report = extract(&settings, ExtractOptions { strict_keys })?;
            write_report(&report, &settings)?;
        }
        Commands::Curves {
            from,
            to,
            num,
            since,
            key,
            output,
        } => {
            let xmin = month_day_to_day(&from)?;
            let xmax = month_day_to_day(&to)?;
            if xmax <= xmin {
                bail!("window end '{to}' is not after its start '{from}'");
            }
            let request = SampleRequest {
                window: (f64::from(xmin), f64::from(xmax)),
                num,
                since: since.as_deref().map(month_day_to_day).transpose()?,
            };
            let key = key.map(|k| StratKey::new(parse_columns(&k)));

            let report = extract(&settings, ExtractOptions::default())?;
            let plots = report.curve_plots(&request, key.as_ref())?;

            let path = output.unwrap_or_else(|| settings.path(&settings.curves_json));
            write_curves(&path, &plots)?;
        }
        Commands::Summary => {
            let report = extract(&settings, ExtractOptions::default())?;
            let summary = report.summary();
            for row in &summary {
                info!(
                    key = %row.key,
                    first_day = row.first_day,
                    last_day = row.last_day,
                    deaths = row.deaths,
                    expected = row.expected,
                    excess = row.excess,
                    cause_deaths = row.cause_deaths,
                    "Stratum"
                );
            }
            print_pretty(&(report.excess.group_keys(), report.baseline.reference_years()));
            print_json(&summary)?;
        }
    }

    Ok(())
}

/// Downloads the cause-specific export and, with `all`, the all-cause archive.
#[tracing::instrument(skip(settings), fields(data_dir = %settings.data_dir.display()))]
async fn download_all(settings: &Settings, all: bool) -> Result<()> {
    let client = BasicClient::new()?;

    let mut urls = vec![settings.covdeaths_url.as_str()];
    if all {
        urls.push(settings.alldeaths_url.as_str());
    } else {
        info!("Skipping the all-cause archive; pass --all to fetch it");
    }

    for url in urls {
        if let Err(e) = download(&client, url, &settings.data_dir).await {
            error!(url, error = %e, "Download failed");
            return Err(e);
        }
    }
    Ok(())
}
