//! Error handling.

use crate::models::Coordinate;

use chrono::{DateTime, Utc};
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::PathBuf;
use strum_macros::Display;
use thiserror::Error;
use tracing::{event, Level};
use zune_inflate::errors::InflateDecodeErrors;

/// Errors decoding or encoding archive and cache documents
#[derive(Debug, Error)]
pub enum FormatError {
    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionFlate2(#[from] std::io::Error),

    /// Error decompressing data
    #[error("failed to decompress data")]
    DecompressionZune(#[from] InflateDecodeErrors),

    /// Error (de)serialising a JSON document
    #[error("invalid document")]
    Json(#[from] serde_json::Error),

    /// Error creating an ndarray array from a stored shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Document is not of the expected kind or version
    #[error("unexpected document format {found}")]
    UnexpectedFormat { found: String },
}

/// Errors raised by an archive accessor
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The product has not been produced upstream yet
    #[error("archive variant {variant} has no product at {location}")]
    Unavailable { variant: String, location: String },

    /// Error reading an archive file
    #[error("failed to read archive file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error decoding an archive file
    #[error("failed to decode archive file {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    /// Archive files for one variant disagree about the field units
    #[error("archive variant {variant} mixes units {first} and {second}")]
    InconsistentUnits {
        variant: String,
        first: String,
        second: String,
    },
}

/// Grid axis named in assembly errors
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum GridAxis {
    #[strum(serialize = "reference time")]
    Reference,
    #[strum(serialize = "lead time")]
    Lead,
}

/// Pipeline component that raised an error
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Component {
    #[strum(serialize = "configuration")]
    Configuration,
    #[strum(serialize = "window generator")]
    WindowGenerator,
    #[strum(serialize = "archive accessor")]
    Archive,
    #[strum(serialize = "selector/reducer")]
    Reducer,
    #[strum(serialize = "grid assembler")]
    Assembler,
    #[strum(serialize = "grid cache")]
    Cache,
}

/// Pipeline error type
///
/// This type encapsulates the errors raised by the window generator, the reducers, the grid
/// assembler and the cache.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Extraction configuration failed validation
    #[error("extraction configuration is not valid")]
    InvalidConfig(#[from] validator::ValidationErrors),

    /// The requested span ends before it starts
    #[error("span end {end} is before span start {start}")]
    InvalidSpan {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// No records matched the window
    #[error("no records in window {coordinate}")]
    EmptyWindow { coordinate: Coordinate },

    /// Too few records matched the window for the reduction
    #[error("window {coordinate} has {found} records, {required} required")]
    InsufficientRecords {
        coordinate: Coordinate,
        found: usize,
        required: usize,
    },

    /// The records in the window cannot be ordered into a single first and last record
    #[error("window {coordinate} has {found} records that cannot be unambiguously ordered")]
    AmbiguousRecords { coordinate: Coordinate, found: usize },

    /// The records in the window are not the configured spacing apart
    #[error("window {coordinate} records are {found}h apart, expected {expected}h")]
    SpacingMismatch {
        coordinate: Coordinate,
        expected: f64,
        found: f64,
    },

    /// Field shapes differ between records or samples
    #[error("field shape {found:?} at {coordinate} does not match {expected:?}")]
    ShapeMismatch {
        coordinate: Coordinate,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A coordinate was produced twice
    #[error("duplicate coordinate {coordinate}")]
    DuplicateCoordinate { coordinate: Coordinate },

    /// Axis spacing is not uniform
    #[error("{axis} axis spacing is irregular at position {position}")]
    AxisIrregularity { axis: GridAxis, position: usize },

    /// An axis has fewer than two points
    #[error("{axis} axis has {points} points, at least 2 required")]
    InsufficientExtent { axis: GridAxis, points: usize },

    /// A cell of the rectangular extent is neither present nor marked missing
    #[error("cell {coordinate} is neither present nor marked missing")]
    UndeclaredCell { coordinate: Coordinate },

    /// A cached grid file could not be used
    #[error("cached grid {} is corrupt: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    /// A freshly computed grid could not be persisted
    #[error("failed to write cached grid {}", path.display())]
    CacheWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error using the cache index
    #[error("cache index error {error}")]
    CacheIndex { error: String },

    /// Error reading the archive
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl PipelineError {
    /// The component that raised this error.
    pub fn component(&self) -> Component {
        match self {
            PipelineError::InvalidConfig(_) | PipelineError::InvalidSpan { .. } => {
                Component::Configuration
            }
            PipelineError::EmptyWindow { .. }
            | PipelineError::InsufficientRecords { .. }
            | PipelineError::AmbiguousRecords { .. }
            | PipelineError::SpacingMismatch { .. } => Component::Reducer,
            PipelineError::ShapeMismatch { .. }
            | PipelineError::DuplicateCoordinate { .. }
            | PipelineError::AxisIrregularity { .. }
            | PipelineError::InsufficientExtent { .. }
            | PipelineError::UndeclaredCell { .. } => Component::Assembler,
            PipelineError::CacheCorrupt { .. }
            | PipelineError::CacheWriteFailure { .. }
            | PipelineError::CacheIndex { .. } => Component::Cache,
            PipelineError::Archive(_) => Component::Archive,
        }
    }

    /// The coordinate involved, if the error concerns a single cell.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            PipelineError::EmptyWindow { coordinate }
            | PipelineError::InsufficientRecords { coordinate, .. }
            | PipelineError::AmbiguousRecords { coordinate, .. }
            | PipelineError::SpacingMismatch { coordinate, .. }
            | PipelineError::ShapeMismatch { coordinate, .. }
            | PipelineError::DuplicateCoordinate { coordinate }
            | PipelineError::UndeclaredCell { coordinate } => Some(*coordinate),
            _ => None,
        }
    }

    /// Whether the window may be recorded as a missing cell instead of failing the extraction.
    pub fn is_missing_cell(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyWindow { .. } | PipelineError::InsufficientRecords { .. }
        )
    }
}

/// Error returned to callers of [Extractor::get_grid](crate::pipeline::Extractor::get_grid).
#[derive(Debug, Error)]
pub enum GridError {
    /// Source data has not been produced yet; the request may succeed later
    #[error("archive variant {variant} is not available yet at {location}")]
    ArchiveUnavailable { variant: String, location: String },

    /// Any other pipeline failure
    #[error("{} failed", .0.component())]
    Pipeline(#[source] PipelineError),

    /// Error writing an output document
    #[error("failed to write output {}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<PipelineError> for GridError {
    /// Separate products that are not available yet from other failures.
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Archive(ArchiveError::Unavailable { variant, location }) => {
                GridError::ArchiveUnavailable { variant, location }
            }
            error => GridError::Pipeline(error),
        }
    }
}

impl GridError {
    /// The component that raised this error.
    pub fn component(&self) -> Component {
        match self {
            GridError::ArchiveUnavailable { .. } => Component::Archive,
            GridError::Pipeline(error) => error.component(),
            GridError::Output { .. } => Component::Cache,
        }
    }

    /// Log the error and its causes.
    pub fn log(&self) {
        event!(Level::ERROR, component = %self.component(), "{}", self);
        let mut current = self.source();
        while let Some(source) = current {
            event!(Level::ERROR, "Caused by: {}", source);
            current = source.source();
        }
    }
}

/// Flattened description of an error and its causes
///
/// Implements serde (de)serialise.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorReport {
    /// Main error message
    pub message: String,

    /// Component that raised the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    /// Coordinate of the cell involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<String>,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    pub fn new<E>(error: &E) -> Self
    where
        E: std::error::Error,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport {
            message,
            component: None,
            coordinate: None,
            caused_by,
        }
    }

    /// The message followed by its causes, on one line.
    pub fn summary(&self) -> String {
        let mut summary = self.message.clone();
        for cause in self.caused_by.iter().flatten() {
            summary.push_str(": ");
            summary.push_str(cause);
        }
        summary
    }
}

impl From<&GridError> for ErrorReport {
    fn from(error: &GridError) -> Self {
        let mut report = ErrorReport::new(error);
        report.component = Some(error.component().to_string());
        if let GridError::Pipeline(error) = error {
            report.coordinate = error.coordinate().map(|coordinate| coordinate.to_string());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    use chrono::Duration;

    fn test_grid_error(
        error: GridError,
        component: &str,
        message: &str,
        coordinate: Option<&str>,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let report = ErrorReport::from(&error);
        let json = serde_json::to_string(&report).unwrap();
        let report: ErrorReport = serde_json::from_str(&json).unwrap();
        assert_eq!(message.to_string(), report.message);
        assert_eq!(Some(component.to_string()), report.component);
        assert_eq!(coordinate.map(|c| c.to_string()), report.coordinate);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, report.caused_by);
    }

    fn coordinate() -> Coordinate {
        Coordinate::new(test_utils::datetime(2016, 9, 5, 0), Duration::hours(3))
    }

    #[test]
    fn empty_window_error() {
        let error = PipelineError::EmptyWindow {
            coordinate: coordinate(),
        };
        assert!(error.is_missing_cell());
        test_grid_error(
            error.into(),
            "selector/reducer",
            "selector/reducer failed",
            Some("(2016-09-05T00:00Z, T+3h)"),
            Some(vec!["no records in window (2016-09-05T00:00Z, T+3h)"]),
        );
    }

    #[test]
    fn insufficient_records_error() {
        let error = PipelineError::InsufficientRecords {
            coordinate: coordinate(),
            found: 1,
            required: 2,
        };
        assert!(error.is_missing_cell());
        test_grid_error(
            error.into(),
            "selector/reducer",
            "selector/reducer failed",
            Some("(2016-09-05T00:00Z, T+3h)"),
            Some(vec!["window (2016-09-05T00:00Z, T+3h) has 1 records, 2 required"]),
        );
    }

    #[test]
    fn ambiguous_records_error() {
        let error = PipelineError::AmbiguousRecords {
            coordinate: coordinate(),
            found: 3,
        };
        assert!(!error.is_missing_cell());
        test_grid_error(
            error.into(),
            "selector/reducer",
            "selector/reducer failed",
            Some("(2016-09-05T00:00Z, T+3h)"),
            Some(vec![
                "window (2016-09-05T00:00Z, T+3h) has 3 records that cannot be unambiguously ordered",
            ]),
        );
    }

    #[test]
    fn duplicate_coordinate_error() {
        let error = PipelineError::DuplicateCoordinate {
            coordinate: coordinate(),
        };
        test_grid_error(
            error.into(),
            "grid assembler",
            "grid assembler failed",
            Some("(2016-09-05T00:00Z, T+3h)"),
            Some(vec!["duplicate coordinate (2016-09-05T00:00Z, T+3h)"]),
        );
    }

    #[test]
    fn axis_irregularity_error() {
        let error = PipelineError::AxisIrregularity {
            axis: GridAxis::Lead,
            position: 2,
        };
        test_grid_error(
            error.into(),
            "grid assembler",
            "grid assembler failed",
            None,
            Some(vec!["lead time axis spacing is irregular at position 2"]),
        );
    }

    #[test]
    fn insufficient_extent_error() {
        let error = PipelineError::InsufficientExtent {
            axis: GridAxis::Reference,
            points: 1,
        };
        test_grid_error(
            error.into(),
            "grid assembler",
            "grid assembler failed",
            None,
            Some(vec!["reference time axis has 1 points, at least 2 required"]),
        );
    }

    #[test]
    fn cache_write_failure_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let error = PipelineError::CacheWriteFailure {
            path: PathBuf::from("/cache/hres.json.gz"),
            source: io_error,
        };
        test_grid_error(
            error.into(),
            "grid cache",
            "grid cache failed",
            None,
            Some(vec![
                "failed to write cached grid /cache/hres.json.gz",
                "permission denied",
            ]),
        );
    }

    #[test]
    fn cache_index_error() {
        let error = PipelineError::CacheIndex {
            error: "locked".to_string(),
        };
        test_grid_error(
            error.into(),
            "grid cache",
            "grid cache failed",
            None,
            Some(vec!["cache index error locked"]),
        );
    }

    #[test]
    fn archive_unavailable_error() {
        let error = PipelineError::Archive(ArchiveError::Unavailable {
            variant: "hres".to_string(),
            location: "/archive/hres_20161016.json".to_string(),
        });
        let error = GridError::from(error);
        assert!(matches!(error, GridError::ArchiveUnavailable { .. }));
        test_grid_error(
            error,
            "archive accessor",
            "archive variant hres is not available yet at /archive/hres_20161016.json",
            None,
            None,
        );
    }

    #[test]
    fn archive_decode_error() {
        let json_error = serde_json::from_str::<u32>("x").unwrap_err();
        let error = PipelineError::Archive(ArchiveError::Decode {
            path: PathBuf::from("/archive/hres.json"),
            source: FormatError::Json(json_error),
        });
        test_grid_error(
            error.into(),
            "archive accessor",
            "archive accessor failed",
            None,
            Some(vec![
                "failed to decode archive file /archive/hres.json",
                "invalid document",
                "expected value at line 1 column 1",
            ]),
        );
    }

    #[test]
    fn invalid_span_error() {
        let error = PipelineError::InvalidSpan {
            start: test_utils::datetime(2016, 9, 6, 0),
            end: test_utils::datetime(2016, 9, 5, 0),
        };
        assert_eq!(Component::Configuration, error.component());
        assert_eq!(None, error.coordinate());
    }

    #[test]
    fn shape_error_from() {
        let error = FormatError::from(ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape));
        assert_eq!("failed to create array from shape", error.to_string());
    }

    #[test]
    fn report_summary() {
        let error = FormatError::DecompressionFlate2(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid gzip header",
        ));
        assert_eq!(
            "failed to decompress data: invalid gzip header",
            ErrorReport::new(&error).summary()
        );
        let error = PipelineError::CacheIndex {
            error: "locked".to_string(),
        };
        assert_eq!(error.to_string(), ErrorReport::new(&error).summary());
    }
}
