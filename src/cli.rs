//! Command Line Interface (CLI) arguments.

use crate::grid_cache::{parse_size_limit, CacheConfig};
use crate::models::{BoundaryPolicy, ExtractionConfig, ReductionMode, UnitScale, WindowFailurePolicy};
use crate::types::hours;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;

/// Format of `--ini` and `--fin`, e.g. `20160905T0000Z`.
pub const CYCLETIME_FORMAT: &str = "%Y%m%dT%H%MZ";

/// Parse a cycle time such as `20160905T0600Z`.
pub fn parse_cycletime(cycletime: &str) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(cycletime, CYCLETIME_FORMAT)
        .map_err(|error| format!("invalid cycle time {}: {}", cycletime, error))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse a duration given in (possibly fractional) hours.
pub fn parse_hours(value: &str) -> Result<Duration, String> {
    let hours: f64 = value
        .parse()
        .map_err(|_| format!("invalid number of hours {}", value))?;
    hours::try_from_hours(hours).ok_or_else(|| format!("invalid number of hours {}", value))
}

/// Lead time grid extraction command line interface
#[derive(Clone, Debug, Parser)]
#[command(name = "leadgrid")]
pub struct CommandLineArgs {
    /// Root directory of the archive
    #[arg(long, env = "LEADGRID_ARCHIVE_ROOT")]
    pub archive_root: String,
    /// Path template of archive files relative to the root
    #[arg(
        long,
        default_value = "{variant}/{year}/{variant}_{date}.json.gz",
        env = "LEADGRID_ARCHIVE_TEMPLATE"
    )]
    pub archive_template: String,
    /// Directory holding cached grids
    #[arg(long, default_value = "~/.cache/leadgrid", env = "LEADGRID_CACHE_DIR")]
    pub cache_dir: String,
    /// Always run the pipeline, neither reading nor writing the cache
    #[arg(long, default_value_t = false, env = "LEADGRID_NO_CACHE")]
    pub no_cache: bool,
    /// Lifespan of cache index entries in seconds
    #[arg(long, env = "LEADGRID_CACHE_LIFESPAN")]
    pub cache_lifespan: Option<u64>,
    /// Total size of cached grids to prune down to, e.g. "2 GiB"
    #[arg(long, value_parser = parse_size_limit, env = "LEADGRID_CACHE_SIZE_LIMIT")]
    pub cache_size_limit: Option<usize>,
    /// Prune the cache before extracting
    #[arg(long, default_value_t = false, env = "LEADGRID_PRUNE_CACHE")]
    pub prune_cache: bool,
    /// Archive variant to extract
    #[arg(long, default_value = "hres", env = "LEADGRID_VARIANT")]
    pub variant: String,
    /// First reference time, e.g. 20160905T0000Z
    #[arg(long, value_parser = parse_cycletime, env = "LEADGRID_INI")]
    pub ini: DateTime<Utc>,
    /// Last reference time, e.g. 20160910T1200Z
    #[arg(long, value_parser = parse_cycletime, env = "LEADGRID_FIN")]
    pub fin: DateTime<Utc>,
    /// Reduction applied to each window
    #[arg(long, value_enum, default_value_t = ReductionMode::GrowthRate, env = "LEADGRID_REDUCTION")]
    pub reduction: ReductionMode,
    /// Reference time step in hours
    #[arg(long, value_parser = parse_hours, default_value = "12", env = "LEADGRID_STEP")]
    pub step: Duration,
    /// First lead time bucket in hours
    #[arg(long, value_parser = parse_hours, default_value = "3", env = "LEADGRID_LEAD_START")]
    pub lead_start: Duration,
    /// Last lead time bucket in hours
    #[arg(long, value_parser = parse_hours, default_value = "165", env = "LEADGRID_LEAD_END")]
    pub lead_end: Duration,
    /// Lead time bucket spacing in hours
    #[arg(long, value_parser = parse_hours, default_value = "6", env = "LEADGRID_LEAD_STEP")]
    pub lead_step: Duration,
    /// Half-width of each lead time bucket in hours
    #[arg(long, value_parser = parse_hours, default_value = "3", env = "LEADGRID_TOLERANCE")]
    pub tolerance: Duration,
    /// Separation in hours of the two records of a growth rate
    #[arg(long, value_parser = parse_hours, default_value = "6", env = "LEADGRID_SPACING")]
    pub spacing: Duration,
    /// Treatment of the top of the reference time span
    #[arg(long, value_enum, default_value_t = BoundaryPolicy::Overshoot, env = "LEADGRID_BOUNDARY")]
    pub boundary: BoundaryPolicy,
    /// Treatment of windows with too few records
    #[arg(
        long,
        value_enum,
        default_value_t = WindowFailurePolicy::Abort,
        env = "LEADGRID_ON_WINDOW_FAILURE"
    )]
    pub on_window_failure: WindowFailurePolicy,
    /// Factor applied to every reduced value, e.g. 24 for per hour to per day
    #[arg(long, requires = "units", env = "LEADGRID_UNIT_SCALE")]
    pub unit_scale: Option<f64>,
    /// Units of the scaled values
    #[arg(long, requires = "unit_scale", env = "LEADGRID_UNITS")]
    pub units: Option<String>,
    /// Permitted deviation of axis spacing, as a fraction of the first spacing
    #[arg(long, default_value_t = 0.01, env = "LEADGRID_AXIS_TOLERANCE")]
    pub axis_tolerance: f64,
    /// Write the grid document to this path, gzip compressed if it ends in .gz
    #[arg(long, env = "LEADGRID_OUTPUT")]
    pub output: Option<PathBuf>,
    /// Print metrics in the Prometheus text format on exit
    #[arg(long, default_value_t = false, env = "LEADGRID_PRINT_METRICS")]
    pub print_metrics: bool,
}

impl CommandLineArgs {
    /// The extraction configuration described by the arguments.
    pub fn extraction_config(&self) -> ExtractionConfig {
        let unit_scale = match (self.unit_scale, &self.units) {
            (Some(factor), Some(units)) => Some(UnitScale::new(factor, units)),
            _ => None,
        };
        ExtractionConfig {
            step: self.step,
            lead_start: self.lead_start,
            lead_end: self.lead_end,
            lead_step: self.lead_step,
            tolerance: self.tolerance,
            boundary: self.boundary,
            reduction: self.reduction,
            spacing: self.spacing,
            unit_scale,
            on_window_failure: self.on_window_failure,
            axis_tolerance: self.axis_tolerance,
        }
    }

    /// The cache configuration, or `None` when caching is disabled.
    pub fn cache_config(&self) -> Result<Option<CacheConfig>, std::io::Error> {
        if self.no_cache {
            return Ok(None);
        }
        CacheConfig::new(&self.cache_dir, self.cache_lifespan, self.cache_size_limit).map(Some)
    }

    /// Name of the extracted grid, e.g. `hres_growth-rate_20160905T0000Z_20160910T1200Z`.
    pub fn grid_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.variant,
            self.reduction,
            self.ini.format(CYCLETIME_FORMAT),
            self.fin.format(CYCLETIME_FORMAT)
        )
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
