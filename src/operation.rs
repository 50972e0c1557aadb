use crate::error::PipelineError;
use crate::models::{ExtractionConfig, Record, ReductionMode, Sample, Window};
use crate::operations;
use crate::types::Missing;

/// Trait for window reductions.
///
/// This forms the contract between the pipeline and the reductions.
pub trait Operation {
    /// Reduce the records of one window to a sample.
    ///
    /// # Arguments
    ///
    /// * `window`: The window the records were selected for
    /// * `records`: Records selected by the window, in archive order
    /// * `missing`: Optional missing data description of the archive
    fn execute(
        &self,
        window: &Window,
        records: &[&Record],
        missing: Option<&Missing>,
    ) -> Result<Sample, PipelineError>;
}

/// Returns the records belonging to `window`.
pub fn select<'a>(window: &Window, records: &'a [Record]) -> Vec<&'a Record> {
    records.iter().filter(|record| window.selects(record)).collect()
}

/// Returns the reduction described by an extraction configuration.
pub fn for_config(config: &ExtractionConfig) -> Box<dyn Operation> {
    match config.reduction {
        ReductionMode::Mean => Box::new(operations::Mean {}),
        ReductionMode::GrowthRate => Box::new(operations::GrowthRate {
            spacing: config.spacing,
        }),
    }
}

/// Check that every record has the field shape of the first.
pub(crate) fn check_shapes(window: &Window, records: &[&Record]) -> Result<(), PipelineError> {
    if let Some((first, rest)) = records.split_first() {
        for record in rest {
            if record.value.shape() != first.value.shape() {
                return Err(PipelineError::ShapeMismatch {
                    coordinate: window.coordinate(),
                    expected: first.value.shape().to_vec(),
                    found: record.value.shape().to_vec(),
                });
            }
        }
    }
    Ok(())
}
