//! The extraction pipeline and its caller-facing entry point.

use crate::archive::{ArchiveAccessor, LeadSelector, TimeSelector};
use crate::assembler::GridAssembler;
use crate::error::{ArchiveError, GridError, PipelineError};
use crate::format;
use crate::grid::Grid;
use crate::grid_cache::{CacheRequest, GridCache};
use crate::metrics::{ARCHIVE_QUERIES, MISSING_CELLS, WINDOWS_REDUCED};
use crate::models::{Compression, ExtractionConfig, WindowFailurePolicy};
use crate::operation;
use crate::window::WindowGenerator;

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// One run of window generation, selection, reduction and assembly over an archive.
pub struct Pipeline<'a, A: ArchiveAccessor> {
    archive: &'a A,
    config: &'a ExtractionConfig,
}

impl<'a, A: ArchiveAccessor> Pipeline<'a, A> {
    pub fn new(archive: &'a A, config: &'a ExtractionConfig) -> Self {
        Pipeline { archive, config }
    }

    /// Build the grid of `variant` for the span `start` to `end`.
    ///
    /// The archive is queried once per reference time.
    #[instrument(skip(self))]
    pub fn run(
        &self,
        variant: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Grid, PipelineError> {
        let config = self.config;
        let generator = WindowGenerator::new(config, start, end)?;
        let reducer = operation::for_config(config);
        let lead = match (generator.lead_min(), generator.lead_max()) {
            (Some(min), Some(max)) => LeadSelector::Between(min, max),
            _ => LeadSelector::Any,
        };
        let mut units: Option<String> = None;
        let mut assembler: Option<GridAssembler> = None;
        for reference_time in generator.reference_times() {
            ARCHIVE_QUERIES.inc();
            let selection =
                self.archive
                    .query(variant, &TimeSelector::Exact(reference_time), &lead)?;
            debug!(%reference_time, records = selection.records.len(), "queried archive");
            match &units {
                Some(first) if *first != selection.units => {
                    return Err(ArchiveError::InconsistentUnits {
                        variant: variant.to_string(),
                        first: first.clone(),
                        second: selection.units,
                    }
                    .into())
                }
                Some(_) => (),
                None => units = Some(selection.units.clone()),
            }
            let assembler = assembler.get_or_insert_with(|| {
                GridAssembler::new(
                    variant,
                    config.reduction,
                    &config.output_units(&selection.units),
                    config.axis_tolerance,
                )
            });
            for window in generator.windows_at(reference_time) {
                let records = operation::select(&window, &selection.records);
                match reducer.execute(&window, &records, selection.missing.as_ref()) {
                    Ok(mut sample) => {
                        if let Some(scale) = &config.unit_scale {
                            sample.value.mapv_inplace(|x| x * scale.factor);
                        }
                        WINDOWS_REDUCED.inc();
                        assembler.insert(sample)?;
                    }
                    Err(error)
                        if error.is_missing_cell()
                            && config.on_window_failure == WindowFailurePolicy::MarkMissing =>
                    {
                        warn!("marking cell missing: {}", error);
                        MISSING_CELLS.inc();
                        assembler.mark_missing(window.coordinate())?;
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        let assembler = match assembler {
            Some(assembler) => assembler,
            // No reference times: finishing reports the empty extent.
            None => GridAssembler::new(
                variant,
                config.reduction,
                &config.output_units(""),
                config.axis_tolerance,
            ),
        };
        assembler.finish()
    }
}

/// Extracts grids from an archive, reading through an optional cache.
pub struct Extractor<A: ArchiveAccessor> {
    archive: A,
    cache: Option<GridCache>,
    config: ExtractionConfig,
}

impl<A: ArchiveAccessor> Extractor<A> {
    /// Return a new Extractor, validating the extraction configuration.
    pub fn new(
        archive: A,
        cache: Option<GridCache>,
        config: ExtractionConfig,
    ) -> Result<Self, GridError> {
        config.validate().map_err(PipelineError::from)?;
        Ok(Extractor {
            archive,
            cache,
            config,
        })
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn cache(&self) -> Option<&GridCache> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Return the grid of `variant` for the span `start` to `end`.
    ///
    /// A stored grid covering the span is returned without consulting the archive. Otherwise
    /// the pipeline runs and its result is stored before being returned.
    #[instrument(skip(self))]
    pub fn get_grid(
        &self,
        variant: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Grid, GridError> {
        let pipeline = Pipeline::new(&self.archive, &self.config);
        let grid = match &self.cache {
            Some(cache) => {
                let request = CacheRequest::new(variant, start, end, &self.config)?;
                cache.fetch(&request, || pipeline.run(variant, start, end))?
            }
            None => pipeline.run(variant, start, end)?,
        };
        info!(
            cells = grid.cell_count(),
            missing = grid.missing_count(),
            units = grid.units(),
            "extracted grid"
        );
        Ok(grid)
    }
}

/// Write `grid` as a grid document, gzip compressed when `path` ends in `.gz`.
#[instrument(skip(grid))]
pub fn write_grid(grid: &Grid, key: &str, path: &Path) -> Result<(), GridError> {
    let compression = match path.extension() {
        Some(extension) if extension == "gz" => Some(Compression::Gzip),
        _ => None,
    };
    let output_error = |source| GridError::Output {
        path: path.to_path_buf(),
        source,
    };
    let data = format::encode_document(&grid.to_document(key), compression).map_err(|error| {
        output_error(std::io::Error::new(std::io::ErrorKind::InvalidData, error))
    })?;
    std::fs::write(path, data).map_err(output_error)?;
    info!(path = %path.display(), "wrote grid");
    Ok(())
}
