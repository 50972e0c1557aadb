//! Data types and associated functions and methods

use crate::types::hours;

use chrono::{DateTime, Duration, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

/// Position of a value in the reference time by lead time plane.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Coordinate {
    /// Initialisation time of the forecast
    pub reference_time: DateTime<Utc>,
    /// Offset from the reference time
    pub lead_time: Duration,
}

impl Coordinate {
    /// Return a new Coordinate object.
    pub fn new(reference_time: DateTime<Utc>, lead_time: Duration) -> Self {
        Coordinate {
            reference_time,
            lead_time,
        }
    }

    /// The instant this coordinate describes.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.reference_time + self.lead_time
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, T+{}h)",
            self.reference_time.format("%Y-%m-%dT%H:%MZ"),
            hours::as_hours(self.lead_time)
        )
    }
}

/// One field value read from the archive.
///
/// Scalars are zero-dimensional arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub reference_time: DateTime<Utc>,
    pub lead_time: Duration,
    pub value: ArrayD<f64>,
}

impl Record {
    /// Return a new Record object.
    pub fn new(reference_time: DateTime<Utc>, lead_time: Duration, value: ArrayD<f64>) -> Self {
        Record {
            reference_time,
            lead_time,
            value,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.reference_time, self.lead_time)
    }
}

/// Selection key for one reduction: a reference time and a lead time bucket with half-width
/// `tolerance`. Both ends of the lead time range are inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub reference_time: DateTime<Utc>,
    pub bucket: Duration,
    pub tolerance: Duration,
}

impl Window {
    /// Return a new Window object.
    pub fn new(reference_time: DateTime<Utc>, bucket: Duration, tolerance: Duration) -> Self {
        Window {
            reference_time,
            bucket,
            tolerance,
        }
    }

    /// Smallest lead time selected by the window.
    pub fn lead_min(&self) -> Duration {
        self.bucket - self.tolerance
    }

    /// Largest lead time selected by the window.
    pub fn lead_max(&self) -> Duration {
        self.bucket + self.tolerance
    }

    /// Whether a record belongs to this window.
    pub fn selects(&self, record: &Record) -> bool {
        record.reference_time == self.reference_time
            && record.lead_time >= self.lead_min()
            && record.lead_time <= self.lead_max()
    }

    /// The nominal coordinate of the window.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.reference_time, self.bucket)
    }
}

/// Reduced output of one window.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub coordinate: Coordinate,
    pub value: ArrayD<f64>,
}

impl Sample {
    /// Return a new Sample object.
    pub fn new(coordinate: Coordinate, value: ArrayD<f64>) -> Self {
        Sample { coordinate, value }
    }
}

/// Reduction applied to the records of each window
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReductionMode {
    /// Element-wise arithmetic mean of every record in the window
    Mean,
    /// Finite difference of the first and last record per hour
    GrowthRate,
}

/// Which reference times the window generator emits at the top of the span.
///
/// The extraction scripts this crate replaces iterated one step past the end of the span
/// whenever the span was not a whole number of steps, so that is the default.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// Every `start + k * step <= end`, plus one trailing time past `end` when `end` is not hit
    /// exactly
    #[default]
    Overshoot,
    /// Every `start + k * step <= end`
    Inclusive,
    /// Every `start + k * step < end`
    Exclusive,
}

/// What to do with a window that has too few records to reduce.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WindowFailurePolicy {
    /// Fail the whole extraction
    #[default]
    Abort,
    /// Record the cell as explicitly missing and carry on
    MarkMissing,
}

/// Compression applied to archive and cache documents
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Gzip
    Gzip,
    /// Zlib
    Zlib,
}

/// Explicit multiplicative unit conversion applied to every reduced value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UnitScale {
    /// Multiplier, e.g. 24.0 to turn a per-hour rate into a per-day rate
    pub factor: f64,
    /// Units of the scaled values
    #[validate(length(min = 1, message = "units must not be empty"))]
    pub units: String,
}

impl UnitScale {
    /// Return a new UnitScale object.
    pub fn new(factor: f64, units: &str) -> Self {
        UnitScale {
            factor,
            units: units.to_string(),
        }
    }
}

fn default_spacing() -> Duration {
    Duration::hours(6)
}

fn default_axis_tolerance() -> f64 {
    0.01
}

/// Everything about an extraction except the archive variant and the span.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_extraction_config"))]
pub struct ExtractionConfig {
    /// Reference time step
    #[serde(with = "hours")]
    pub step: Duration,
    /// First lead time bucket
    #[serde(with = "hours")]
    pub lead_start: Duration,
    /// Last lead time bucket (inclusive)
    #[serde(with = "hours")]
    pub lead_end: Duration,
    /// Lead time bucket spacing
    #[serde(with = "hours")]
    pub lead_step: Duration,
    /// Half-width of each lead time bucket
    #[serde(with = "hours")]
    pub tolerance: Duration,
    /// Treatment of the top of the reference time span
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    /// Reduction applied to each window
    pub reduction: ReductionMode,
    /// Fixed spacing of the two records used by the growth rate reduction
    #[serde(default = "default_spacing", with = "hours")]
    pub spacing: Duration,
    /// Optional explicit unit conversion
    #[serde(default)]
    #[validate]
    pub unit_scale: Option<UnitScale>,
    /// Treatment of windows with too few records
    #[serde(default)]
    pub on_window_failure: WindowFailurePolicy,
    /// Permitted deviation of axis spacing, as a fraction of the first spacing
    #[serde(default = "default_axis_tolerance")]
    #[validate(range(
        min = 0.0,
        max = 0.5,
        message = "axis tolerance must be between 0 and 0.5"
    ))]
    pub axis_tolerance: f64,
}

impl ExtractionConfig {
    /// Forecast error growth extraction: finite differences of records `spacing` apart, in
    /// buckets centred on 3, 9, ..., 165 hours, scaled from per-hour to per-day.
    pub fn error_growth(step: Duration, units: &str) -> Self {
        ExtractionConfig {
            step,
            lead_start: Duration::hours(3),
            lead_end: Duration::hours(165),
            lead_step: Duration::hours(6),
            tolerance: Duration::hours(3),
            boundary: BoundaryPolicy::default(),
            reduction: ReductionMode::GrowthRate,
            spacing: default_spacing(),
            // Per hour to per day.
            unit_scale: Some(UnitScale::new(24.0, &format!("{}/day", units))),
            on_window_failure: WindowFailurePolicy::default(),
            axis_tolerance: default_axis_tolerance(),
        }
    }

    /// Window means over buckets `lead_step` wide.
    pub fn window_mean(step: Duration, lead_start: Duration, lead_end: Duration, lead_step: Duration) -> Self {
        ExtractionConfig {
            step,
            lead_start,
            lead_end,
            lead_step,
            tolerance: lead_step / 2,
            boundary: BoundaryPolicy::default(),
            reduction: ReductionMode::Mean,
            spacing: default_spacing(),
            unit_scale: None,
            on_window_failure: WindowFailurePolicy::default(),
            axis_tolerance: default_axis_tolerance(),
        }
    }

    /// Units of the reduced values, given the units of the archive.
    pub fn output_units(&self, archive_units: &str) -> String {
        match (&self.unit_scale, self.reduction) {
            (Some(scale), _) => scale.units.clone(),
            (None, ReductionMode::Mean) => archive_units.to_string(),
            (None, ReductionMode::GrowthRate) => format!("{}/h", archive_units),
        }
    }
}

/// Validate extraction configuration
fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ValidationError> {
    let positive = [
        ("step", config.step),
        ("lead_step", config.lead_step),
        ("spacing", config.spacing),
    ];
    for (name, value) in positive {
        if value <= Duration::zero() {
            let mut error = ValidationError::new("Durations must be greater than zero");
            error.add_param(name.into(), &hours::as_hours(value));
            return Err(error);
        }
    }
    if config.lead_start < Duration::zero() {
        let mut error = ValidationError::new("Lead start must not be negative");
        error.add_param("lead_start".into(), &hours::as_hours(config.lead_start));
        return Err(error);
    }
    if config.lead_end < config.lead_start {
        let mut error = ValidationError::new("Lead end must not be less than lead start");
        error.add_param("lead_start".into(), &hours::as_hours(config.lead_start));
        error.add_param("lead_end".into(), &hours::as_hours(config.lead_end));
        return Err(error);
    }
    if config.tolerance < Duration::zero() {
        let mut error = ValidationError::new("Tolerance must not be negative");
        error.add_param("tolerance".into(), &hours::as_hours(config.tolerance));
        return Err(error);
    }
    // A pair `spacing` apart then sits on the window edges, so its midpoint is the bucket.
    if config.reduction == ReductionMode::GrowthRate && config.tolerance * 2 != config.spacing {
        let mut error = ValidationError::new("Growth rate windows must be as wide as the spacing");
        error.add_param("tolerance".into(), &hours::as_hours(config.tolerance));
        error.add_param("spacing".into(), &hours::as_hours(config.spacing));
        return Err(error);
    }
    if let Some(scale) = &config.unit_scale {
        if !scale.factor.is_finite() || scale.factor == 0.0 {
            let mut error = ValidationError::new("Unit scale factor must be finite and non-zero");
            error.add_param("factor".into(), &scale.factor);
            return Err(error);
        }
    }
    Ok(())
}
