//! Assembly of reduced samples into a [Grid].

use crate::error::{GridAxis, PipelineError};
use crate::grid::Grid;
use crate::models::{Coordinate, ReductionMode, Sample};

use chrono::{DateTime, Duration, Utc};
use hashbrown::HashSet;
use ndarray::{Array2, ArrayD, Axis, IxDyn, Zip};
use std::collections::BTreeSet;
use tracing::debug;

/// Collects samples and missing cell markers for one run and builds the finished grid.
#[derive(Debug)]
pub struct GridAssembler {
    variant: String,
    reduction: ReductionMode,
    units: String,
    axis_tolerance: f64,
    seen: HashSet<Coordinate>,
    samples: Vec<Sample>,
    missing: Vec<Coordinate>,
}

impl GridAssembler {
    /// Return a new GridAssembler.
    ///
    /// # Arguments
    ///
    /// * `variant`: Archive variant the samples were reduced from
    /// * `reduction`: Reduction that produced the samples
    /// * `units`: Units of the sample values
    /// * `axis_tolerance`: Permitted deviation of each axis spacing, as a fraction of the first
    pub fn new(variant: &str, reduction: ReductionMode, units: &str, axis_tolerance: f64) -> Self {
        GridAssembler {
            variant: variant.to_string(),
            reduction,
            units: units.to_string(),
            axis_tolerance,
            seen: HashSet::new(),
            samples: vec![],
            missing: vec![],
        }
    }

    fn claim(&mut self, coordinate: Coordinate) -> Result<(), PipelineError> {
        if !self.seen.insert(coordinate) {
            return Err(PipelineError::DuplicateCoordinate { coordinate });
        }
        Ok(())
    }

    /// Add a reduced sample.
    pub fn insert(&mut self, sample: Sample) -> Result<(), PipelineError> {
        self.claim(sample.coordinate)?;
        self.samples.push(sample);
        Ok(())
    }

    /// Declare a cell as explicitly missing.
    pub fn mark_missing(&mut self, coordinate: Coordinate) -> Result<(), PipelineError> {
        self.claim(coordinate)?;
        self.missing.push(coordinate);
        Ok(())
    }

    /// Number of cells inserted or marked missing so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Sort both axes, validate the grid and return it.
    pub fn finish(self) -> Result<Grid, PipelineError> {
        let reference_times: Vec<DateTime<Utc>> = self
            .seen
            .iter()
            .map(|coordinate| coordinate.reference_time)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let lead_times: Vec<Duration> = self
            .seen
            .iter()
            .map(|coordinate| coordinate.lead_time)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        check_extent(GridAxis::Reference, reference_times.len())?;
        check_extent(GridAxis::Lead, lead_times.len())?;
        check_spacing(
            GridAxis::Reference,
            reference_times.windows(2).map(|pair| pair[1] - pair[0]),
            self.axis_tolerance,
        )?;
        check_spacing(
            GridAxis::Lead,
            lead_times.windows(2).map(|pair| pair[1] - pair[0]),
            self.axis_tolerance,
        )?;
        for reference_time in reference_times.iter() {
            for lead_time in lead_times.iter() {
                let coordinate = Coordinate::new(*reference_time, *lead_time);
                if !self.seen.contains(&coordinate) {
                    return Err(PipelineError::UndeclaredCell { coordinate });
                }
            }
        }

        let field_shape = self
            .samples
            .first()
            .map(|sample| sample.value.shape().to_vec())
            .unwrap_or_default();
        let mut shape = vec![reference_times.len(), lead_times.len()];
        shape.extend_from_slice(&field_shape);
        let mut values = ArrayD::<f64>::from_elem(IxDyn(&shape), f64::NAN);
        for sample in self.samples.iter() {
            if sample.value.shape() != field_shape.as_slice() {
                return Err(PipelineError::ShapeMismatch {
                    coordinate: sample.coordinate,
                    expected: field_shape,
                    found: sample.value.shape().to_vec(),
                });
            }
            let (i, j) = position(&reference_times, &lead_times, &sample.coordinate);
            let mut cell = values.index_axis_mut(Axis(0), i);
            let mut cell = cell.index_axis_mut(Axis(0), j);
            // A single NaN representation keeps computed and reloaded grids bitwise identical.
            Zip::from(&mut cell).and(&sample.value).for_each(|out, val| {
                *out = if val.is_finite() { *val } else { f64::NAN };
            });
        }
        let mut missing = Array2::from_elem((reference_times.len(), lead_times.len()), false);
        for coordinate in self.missing.iter() {
            let (i, j) = position(&reference_times, &lead_times, coordinate);
            missing[[i, j]] = true;
        }
        debug!(
            reference_times = reference_times.len(),
            lead_times = lead_times.len(),
            missing = self.missing.len(),
            "assembled grid"
        );
        Ok(Grid::new(
            self.variant,
            self.reduction,
            self.units,
            reference_times,
            lead_times,
            values,
            missing,
        ))
    }
}

fn position(
    reference_times: &[DateTime<Utc>],
    lead_times: &[Duration],
    coordinate: &Coordinate,
) -> (usize, usize) {
    // Both axes were built from the claimed coordinates.
    let i = reference_times
        .binary_search(&coordinate.reference_time)
        .unwrap_or_default();
    let j = lead_times
        .binary_search(&coordinate.lead_time)
        .unwrap_or_default();
    (i, j)
}

fn check_extent(axis: GridAxis, points: usize) -> Result<(), PipelineError> {
    if points < 2 {
        return Err(PipelineError::InsufficientExtent { axis, points });
    }
    Ok(())
}

fn check_spacing(
    axis: GridAxis,
    mut spacings: impl Iterator<Item = Duration>,
    tolerance: f64,
) -> Result<(), PipelineError> {
    let Some(first) = spacings.next() else {
        return Ok(());
    };
    let first = first.num_seconds() as f64;
    for (n, spacing) in spacings.enumerate() {
        let spacing = spacing.num_seconds() as f64;
        if (spacing - first).abs() > tolerance * first {
            // Point n + 2 is the first that is off the regular axis.
            return Err(PipelineError::AxisIrregularity {
                axis,
                position: n + 2,
            });
        }
    }
    Ok(())
}
