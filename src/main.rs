use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;

use ghi_stats::bridge::{FromRowsOptions, DEFAULT_ROW_PROPERTY};
use ghi_stats::config::{load_config, PipelineConfig};
use ghi_stats::data_models::Granularity;
use ghi_stats::enrich::GridProjection;
use ghi_stats::integration::AggregationMode;
use ghi_stats::metrics::METRICS;
use ghi_stats::pipeline::{Pipeline, RunSummary};
use ghi_stats::time_operation;
use ghi_stats::timestamps::TimestampSource;

#[derive(Parser, Debug)]
#[command(name = "ghi_stats")]
#[command(about = "Aggregate gridded irradiance GeoJSON over time and round-trip it through CSV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file
    #[arg(long, global = true, env = "GHI_STATS_CONFIG")]
    config: Option<PathBuf>,

    /// Duration of one input sample, in hours
    #[arg(long, global = true)]
    interval_hours: Option<f64>,

    /// auto, embedded, file_name or hour_index
    #[arg(long, global = true)]
    timestamp_source: Option<TimestampSource>,

    /// Property holding the cell value (inferred when omitted)
    #[arg(long, global = true)]
    value_property: Option<String>,

    /// Glob applied to input file names
    #[arg(long, global = true)]
    pattern: Option<String>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Parse input files in parallel windows
    #[arg(long, global = true)]
    parallel_read: bool,

    /// No progress bar
    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct Dirs {
    /// Input file or directory
    input: PathBuf,
    /// Output directory; must exist and be empty
    output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate raw documents into hour, day, month or year buckets
    Integrate {
        granularity: Granularity,
        #[arg(long, default_value = "sum")]
        mode: AggregationMode,
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Flatten documents into cell_id,timestamp,value rows
    Tocsv {
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Rebuild documents from forecast rows
    Fix {
        /// Registry snapshot, or a directory of documents with the grid
        #[arg(long)]
        registry: PathBuf,
        #[arg(long, default_value = DEFAULT_ROW_PROPERTY)]
        property: String,
        #[arg(long)]
        granularity: Option<Granularity>,
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Sum aggregated documents into a coarser period
    Rollup {
        target: Granularity,
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Same as `rollup month`
    Emonthly {
        #[command(flatten)]
        dirs: Dirs,
    },
    /// Add lon/lat properties to every cell
    Addlatlon {
        /// Coordinate table projecting grid indices to lat/lon
        #[arg(long)]
        coords: Option<PathBuf>,
        #[command(flatten)]
        dirs: Dirs,
    },
    /// One output document per timestep
    Split {
        #[command(flatten)]
        dirs: Dirs,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Integrate { .. } => "integrate",
            Command::Tocsv { .. } => "tocsv",
            Command::Fix { .. } => "fix",
            Command::Rollup { .. } => "rollup",
            Command::Emonthly { .. } => "emonthly",
            Command::Addlatlon { .. } => "addlatlon",
            Command::Split { .. } => "split",
        }
    }
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let base = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    let mut config = base
        .with_overrides(|key| std::env::var(key).ok())
        .context("Invalid GHI_STATS_* environment variable")?;

    if let Some(hours) = cli.interval_hours {
        config.interval_hours = hours;
    }
    if let Some(source) = cli.timestamp_source {
        config.timestamp_source = source;
    }
    if let Some(property) = &cli.value_property {
        config.value_property = Some(property.clone());
    }
    if let Some(pattern) = &cli.pattern {
        config.file_pattern = pattern.clone();
    }
    if let Some(workers) = cli.workers {
        config.workers = Some(workers);
    }
    config.parallel_read |= cli.parallel_read;
    config.progress &= !cli.quiet;
    Ok(config)
}

fn run(pipeline: &Pipeline, command: &Command) -> ghi_stats::errors::Result<RunSummary> {
    match command {
        Command::Integrate { granularity, mode, dirs } => {
            pipeline.integrate(*granularity, *mode, &dirs.input, &dirs.output)
        }
        Command::Tocsv { dirs } => pipeline.to_rows(&dirs.input, &dirs.output),
        Command::Fix { registry, property, granularity, dirs } => {
            let options = FromRowsOptions {
                value_property: property.clone(),
                granularity: *granularity,
            };
            pipeline.from_rows(&dirs.input, registry, &dirs.output, options)
        }
        Command::Rollup { target, dirs } => pipeline.rollup(*target, &dirs.input, &dirs.output),
        Command::Emonthly { dirs } => pipeline.rollup(Granularity::Month, &dirs.input, &dirs.output),
        Command::Addlatlon { coords, dirs } => {
            let projection = coords.as_deref().map(GridProjection::load).transpose()?;
            pipeline.enrich(&dirs.input, &dirs.output, projection)
        }
        Command::Split { dirs } => pipeline.split(&dirs.input, &dirs.output),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    info!("Configuration: {:?}", config);
    let pipeline = Pipeline::new(config).context("Invalid configuration")?;

    let name = cli.command.name();
    let result = time_operation!(name, run(&pipeline, &cli.command));

    match &result {
        Ok(summary) => info!(
            "{} finished: {} documents in, {} documents out, {} rows, {} cells",
            name, summary.documents_in, summary.documents_out, summary.rows, summary.cells
        ),
        Err(e) => error!("{} stopped with {} on {}: {}", name, e.kind(), e.artifact(), e.root()),
    }
    info!("========== Pipeline Metrics Summary ==========");
    for line in METRICS.lock().summary_lines() {
        info!("{}", line);
    }

    result.with_context(|| format!("ghi_stats {} failed", name))?;
    Ok(())
}
