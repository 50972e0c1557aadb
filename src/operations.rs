//! Window reductions.
//!
//! Each reduction is implemented as a struct that implements the
//! [Operation](crate::operation::Operation) trait.

use crate::error::PipelineError;
use crate::models::{Coordinate, Record, Sample, Window};
use crate::operation::{check_shapes, Operation};
use crate::types::{hours, missing, Missing};

use chrono::Duration;
use ndarray::{ArrayD, Zip};

/// Return the element-wise mean of the records in the window.
///
/// Missing elements are skipped. An element that is missing in every record is NaN in the
/// result. The sample is tagged with the window's bucket.
pub struct Mean {}

impl Operation for Mean {
    fn execute(
        &self,
        window: &Window,
        records: &[&Record],
        missing: Option<&Missing>,
    ) -> Result<Sample, PipelineError> {
        let first = records.first().ok_or(PipelineError::EmptyWindow {
            coordinate: window.coordinate(),
        })?;
        check_shapes(window, records)?;
        let mut sums = ArrayD::<f64>::zeros(first.value.raw_dim());
        let mut counts = ArrayD::<usize>::zeros(first.value.raw_dim());
        for record in records {
            Zip::from(&mut sums)
                .and(&mut counts)
                .and(&record.value)
                .for_each(|sum, count, val| {
                    if !missing::is_missing(missing, *val) {
                        *sum += *val;
                        *count += 1;
                    }
                });
        }
        let means = Zip::from(&sums).and(&counts).map_collect(|sum, count| {
            if *count == 0 {
                f64::NAN
            } else {
                *sum / *count as f64
            }
        });
        Ok(Sample::new(window.coordinate(), means))
    }
}

/// Return the rate of change between the two records in the window, per hour.
///
/// The records must be exactly `spacing` apart. Elements missing in either record are NaN in
/// the result. The sample is tagged with the mean lead time of the two records.
pub struct GrowthRate {
    pub spacing: Duration,
}

impl Operation for GrowthRate {
    fn execute(
        &self,
        window: &Window,
        records: &[&Record],
        missing: Option<&Missing>,
    ) -> Result<Sample, PipelineError> {
        let coordinate = window.coordinate();
        let (first, last) = match records {
            [] => return Err(PipelineError::EmptyWindow { coordinate }),
            [_] => {
                return Err(PipelineError::InsufficientRecords {
                    coordinate,
                    found: 1,
                    required: 2,
                })
            }
            [a, b] if a.lead_time < b.lead_time => (*a, *b),
            [a, b] if a.lead_time > b.lead_time => (*b, *a),
            _ => {
                return Err(PipelineError::AmbiguousRecords {
                    coordinate,
                    found: records.len(),
                })
            }
        };
        let separation = last.lead_time - first.lead_time;
        if separation != self.spacing {
            return Err(PipelineError::SpacingMismatch {
                coordinate,
                expected: hours::as_hours(self.spacing),
                found: hours::as_hours(separation),
            });
        }
        check_shapes(window, records)?;
        let dt = hours::as_hours(self.spacing);
        let rates = Zip::from(&first.value)
            .and(&last.value)
            .map_collect(|a, b| {
                if missing::is_missing(missing, *a) || missing::is_missing(missing, *b) {
                    f64::NAN
                } else {
                    (*b - *a) / dt
                }
            });
        let lead_time = first.lead_time + separation / 2;
        Ok(Sample::new(
            Coordinate::new(window.reference_time, lead_time),
            rates,
        ))
    }
}
