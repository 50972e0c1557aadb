//! The reference time by lead time grid.

use crate::error::FormatError;
use crate::format::{GridDocument, StoredArray, GRID_FORMAT, GRID_VERSION};
use crate::models::{Coordinate, ReductionMode};

use chrono::{DateTime, Duration, Utc};
use ndarray::{Array2, ArrayD, ArrayViewD, Axis};
use std::collections::BTreeSet;

/// Contents of one grid cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell<'a> {
    /// A reduced value; zero-dimensional for scalar fields
    Value(ArrayViewD<'a, f64>),
    /// The window could not be reduced and was explicitly marked missing
    Missing,
}

impl<'a> Cell<'a> {
    /// The value of a scalar cell.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Cell::Value(view) if view.ndim() == 0 => view.iter().next().copied(),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }
}

/// A dense grid of reduced values.
///
/// Both axes are strictly increasing and uniformly spaced. `values` has shape
/// `[reference_times, lead_times, field...]`, with NaN in the cells marked missing.
#[derive(Clone, Debug)]
pub struct Grid {
    variant: String,
    reduction: ReductionMode,
    units: String,
    reference_times: Vec<DateTime<Utc>>,
    lead_times: Vec<Duration>,
    values: ArrayD<f64>,
    missing: Array2<bool>,
}

impl Grid {
    /// Assemble a grid from validated parts.
    pub(crate) fn new(
        variant: String,
        reduction: ReductionMode,
        units: String,
        reference_times: Vec<DateTime<Utc>>,
        lead_times: Vec<Duration>,
        values: ArrayD<f64>,
        missing: Array2<bool>,
    ) -> Self {
        Grid {
            variant,
            reduction,
            units,
            reference_times,
            lead_times,
            values,
            missing,
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn reduction(&self) -> ReductionMode {
        self.reduction
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn reference_times(&self) -> &[DateTime<Utc>] {
        &self.reference_times
    }

    pub fn lead_times(&self) -> &[Duration] {
        &self.lead_times
    }

    /// All values, with shape `[reference_times, lead_times, field...]`.
    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    /// Shape of the field in each cell.
    pub fn field_shape(&self) -> &[usize] {
        &self.values.shape()[2..]
    }

    /// Number of addressable cells.
    pub fn cell_count(&self) -> usize {
        self.reference_times.len() * self.lead_times.len()
    }

    /// Number of cells marked missing.
    pub fn missing_count(&self) -> usize {
        self.missing.iter().filter(|missing| **missing).count()
    }

    fn cell(&self, i: usize, j: usize) -> Cell<'_> {
        if self.missing[[i, j]] {
            Cell::Missing
        } else {
            Cell::Value(
                self.values
                    .index_axis(Axis(0), i)
                    .index_axis_move(Axis(0), j),
            )
        }
    }

    /// Look up a cell by coordinate.
    ///
    /// Returns `None` when the coordinate is outside the axes.
    pub fn get(&self, reference_time: DateTime<Utc>, lead_time: Duration) -> Option<Cell<'_>> {
        let i = self.reference_times.binary_search(&reference_time).ok()?;
        let j = self.lead_times.binary_search(&lead_time).ok()?;
        Some(self.cell(i, j))
    }

    /// Iterate over every cell, reference time major.
    pub fn cells(&self) -> impl Iterator<Item = (Coordinate, Cell<'_>)> + '_ {
        self.reference_times
            .iter()
            .enumerate()
            .flat_map(move |(i, reference_time)| {
                self.lead_times.iter().enumerate().map(move |(j, lead_time)| {
                    (Coordinate::new(*reference_time, *lead_time), self.cell(i, j))
                })
            })
    }

    /// The cells whose reference time plus lead time equals `valid_time`, by reference time.
    pub fn valid_time_diagonal(&self, valid_time: DateTime<Utc>) -> Vec<(Coordinate, Cell<'_>)> {
        self.reference_times
            .iter()
            .enumerate()
            .filter_map(|(i, reference_time)| {
                let lead_time = valid_time - *reference_time;
                let j = self.lead_times.binary_search(&lead_time).ok()?;
                Some((Coordinate::new(*reference_time, lead_time), self.cell(i, j)))
            })
            .collect()
    }

    /// Every valid time covered by the grid, ascending.
    pub fn valid_times(&self) -> Vec<DateTime<Utc>> {
        let mut valid_times = BTreeSet::new();
        for reference_time in self.reference_times.iter() {
            for lead_time in self.lead_times.iter() {
                valid_times.insert(*reference_time + *lead_time);
            }
        }
        valid_times.into_iter().collect()
    }

    /// Restrict the grid to some of its reference times.
    ///
    /// Returns `None` if any requested reference time is not on the axis.
    pub fn subset(&self, reference_times: &[DateTime<Utc>]) -> Option<Grid> {
        let mut indices = reference_times
            .iter()
            .map(|time| self.reference_times.binary_search(time).ok())
            .collect::<Option<Vec<usize>>>()?;
        indices.sort_unstable();
        indices.dedup();
        Some(Grid {
            variant: self.variant.clone(),
            reduction: self.reduction,
            units: self.units.clone(),
            reference_times: indices.iter().map(|i| self.reference_times[*i]).collect(),
            lead_times: self.lead_times.clone(),
            values: self.values.select(Axis(0), &indices),
            missing: self.missing.select(Axis(0), &indices),
        })
    }

    /// Return the grid with both axes in ascending order.
    ///
    /// A grid that is already sorted is returned unchanged.
    pub fn sorted(self) -> Grid {
        let reference_order = sort_order(&self.reference_times);
        let lead_order = sort_order(&self.lead_times);
        if is_identity(&reference_order) && is_identity(&lead_order) {
            return self;
        }
        Grid {
            reference_times: reference_order
                .iter()
                .map(|i| self.reference_times[*i])
                .collect(),
            lead_times: lead_order.iter().map(|j| self.lead_times[*j]).collect(),
            values: self
                .values
                .select(Axis(0), &reference_order)
                .select(Axis(1), &lead_order),
            missing: self
                .missing
                .select(Axis(0), &reference_order)
                .select(Axis(1), &lead_order),
            ..self
        }
    }

    /// Convert to the persisted document form.
    pub fn to_document(&self, key: &str) -> GridDocument {
        GridDocument {
            format: GRID_FORMAT.to_string(),
            version: GRID_VERSION,
            key: key.to_string(),
            variant: self.variant.clone(),
            reduction: self.reduction,
            units: self.units.clone(),
            reference_times: self.reference_times.clone(),
            lead_times: self.lead_times.clone(),
            values: StoredArray::from(&self.values),
            missing: self.missing.iter().copied().collect(),
        }
    }

    /// Rebuild a grid from its persisted document form, checking its consistency.
    pub fn from_document(document: GridDocument) -> Result<Grid, FormatError> {
        let unexpected = |found: String| FormatError::UnexpectedFormat { found };
        if document.format != GRID_FORMAT || document.version != GRID_VERSION {
            return Err(unexpected(format!(
                "{} version {}",
                document.format, document.version
            )));
        }
        if !is_strictly_increasing(&document.reference_times)
            || !is_strictly_increasing(&document.lead_times)
        {
            return Err(unexpected("unordered axis".to_string()));
        }
        let (nr, nl) = (document.reference_times.len(), document.lead_times.len());
        let values = ArrayD::try_from(document.values)?;
        if values.ndim() < 2 || values.shape()[..2] != [nr, nl] {
            return Err(unexpected(format!("values of shape {:?}", values.shape())));
        }
        let missing = Array2::from_shape_vec((nr, nl), document.missing)?;
        Ok(Grid {
            variant: document.variant,
            reduction: document.reduction,
            units: document.units,
            reference_times: document.reference_times,
            lead_times: document.lead_times,
            values,
            missing,
        })
    }
}

impl PartialEq for Grid {
    /// Grids are equal when their axes, metadata and missing masks are equal and their values
    /// are bitwise identical, so NaN cells compare equal.
    fn eq(&self, other: &Self) -> bool {
        self.variant == other.variant
            && self.reduction == other.reduction
            && self.units == other.units
            && self.reference_times == other.reference_times
            && self.lead_times == other.lead_times
            && self.missing == other.missing
            && self.values.shape() == other.values.shape()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

fn sort_order<T: Ord>(axis: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..axis.len()).collect();
    order.sort_by(|a, b| axis[*a].cmp(&axis[*b]));
    order
}

fn is_identity(order: &[usize]) -> bool {
    order.iter().enumerate().all(|(i, j)| i == *j)
}

pub(crate) fn is_strictly_increasing<T: Ord>(axis: &[T]) -> bool {
    axis.windows(2).all(|pair| pair[0] < pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    use ndarray::{arr2, Array3};

    fn grid() -> Grid {
        // Reference times 00, 06, 12 by leads 0, 6, 12; value is 10 * i + j, cell (1, 2) missing.
        let values = Array3::from_shape_fn((3, 3, 1), |(i, j, _)| (10 * i + j) as f64);
        let mut values = values.into_dyn();
        values[[1, 2, 0]] = f64::NAN;
        let mut missing = Array2::from_elem((3, 3), false);
        missing[[1, 2]] = true;
        Grid::new(
            "hres".to_string(),
            ReductionMode::Mean,
            "m".to_string(),
            vec![
                test_utils::datetime(2016, 9, 5, 0),
                test_utils::datetime(2016, 9, 5, 6),
                test_utils::datetime(2016, 9, 5, 12),
            ],
            vec![Duration::hours(0), Duration::hours(6), Duration::hours(12)],
            values,
            missing,
        )
    }

    #[test]
    fn test_get() {
        let grid = grid();
        assert_eq!(9, grid.cell_count());
        assert_eq!(1, grid.missing_count());
        assert_eq!(&[1], grid.field_shape());
        let cell = grid
            .get(test_utils::datetime(2016, 9, 5, 12), Duration::hours(6))
            .unwrap();
        match cell {
            Cell::Value(view) => assert_eq!(vec![21.0], view.iter().copied().collect::<Vec<_>>()),
            Cell::Missing => panic!("unexpected missing cell"),
        }
        assert!(grid
            .get(test_utils::datetime(2016, 9, 5, 6), Duration::hours(12))
            .unwrap()
            .is_missing());
        assert!(grid
            .get(test_utils::datetime(2016, 9, 5, 18), Duration::hours(0))
            .is_none());
        assert!(grid
            .get(test_utils::datetime(2016, 9, 5, 0), Duration::hours(3))
            .is_none());
    }

    #[test]
    fn test_cells() {
        let grid = grid();
        let cells: Vec<_> = grid.cells().collect();
        assert_eq!(9, cells.len());
        assert_eq!(
            Coordinate::new(test_utils::datetime(2016, 9, 5, 0), Duration::hours(6)),
            cells[1].0
        );
        assert!(cells[5].1.is_missing());
    }

    #[test]
    fn test_scalar_cell() {
        let values = ndarray::arr0(2.5).into_dyn();
        assert_eq!(Some(2.5), Cell::Value(values.view()).scalar());
        assert_eq!(None, Cell::Missing.scalar());
    }

    #[test]
    fn test_valid_time_diagonal() {
        let grid = grid();
        let diagonal = grid.valid_time_diagonal(test_utils::datetime(2016, 9, 5, 12));
        assert_eq!(3, diagonal.len());
        assert_eq!(Duration::hours(12), diagonal[0].0.lead_time);
        assert_eq!(Duration::hours(6), diagonal[1].0.lead_time);
        assert_eq!(Duration::hours(0), diagonal[2].0.lead_time);
        let diagonal = grid.valid_time_diagonal(test_utils::datetime(2016, 9, 5, 18));
        assert_eq!(2, diagonal.len());
        assert!(diagonal[0].1.is_missing());
    }

    #[test]
    fn test_valid_times() {
        let valid_times = grid().valid_times();
        assert_eq!(5, valid_times.len());
        assert_eq!(test_utils::datetime(2016, 9, 5, 0), valid_times[0]);
        assert_eq!(test_utils::datetime(2016, 9, 6, 0), valid_times[4]);
    }

    #[test]
    fn test_subset() {
        let grid = grid();
        let subset = grid
            .subset(&[
                test_utils::datetime(2016, 9, 5, 12),
                test_utils::datetime(2016, 9, 5, 6),
            ])
            .unwrap();
        assert_eq!(
            &[
                test_utils::datetime(2016, 9, 5, 6),
                test_utils::datetime(2016, 9, 5, 12)
            ],
            subset.reference_times()
        );
        assert_eq!(6, subset.cell_count());
        assert_eq!(1, subset.missing_count());
        assert!(grid.subset(&[test_utils::datetime(2016, 9, 6, 0)]).is_none());
    }

    #[test]
    fn test_sorted_idempotent() {
        let grid = grid();
        assert_eq!(grid, grid.clone().sorted());
        assert_eq!(grid, grid.clone().sorted().sorted());
    }

    #[test]
    fn test_sorted_reorders() {
        let grid = Grid::new(
            "hres".to_string(),
            ReductionMode::Mean,
            "m".to_string(),
            vec![
                test_utils::datetime(2016, 9, 5, 6),
                test_utils::datetime(2016, 9, 5, 0),
            ],
            vec![Duration::hours(6), Duration::hours(0)],
            arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(),
            arr2(&[[false, true], [false, false]]),
        )
        .sorted();
        assert!(is_strictly_increasing(grid.reference_times()));
        assert!(is_strictly_increasing(grid.lead_times()));
        assert_eq!(vec![4.0, 3.0, 2.0, 1.0], grid.values().iter().copied().collect::<Vec<_>>());
        assert!(grid
            .get(test_utils::datetime(2016, 9, 5, 6), Duration::hours(0))
            .unwrap()
            .is_missing());
    }

    #[test]
    fn test_document() {
        let grid = grid();
        let document = grid.to_document("hres_mean");
        assert_eq!(GRID_FORMAT, document.format);
        assert_eq!(9, document.missing.len());
        assert_eq!(None, document.values.data[5]);
        let decoded = Grid::from_document(document).unwrap();
        assert_eq!(grid, decoded);
    }

    #[test]
    fn test_document_wrong_version() {
        let mut document = grid().to_document("hres_mean");
        document.version = 99;
        let err = Grid::from_document(document).unwrap_err();
        assert_eq!(
            "unexpected document format leadgrid/grid version 99",
            err.to_string()
        );
    }

    #[test]
    fn test_document_inconsistent_shape() {
        let mut document = grid().to_document("hres_mean");
        document.lead_times.pop();
        let err = Grid::from_document(document).unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedFormat { .. }));
    }

    #[test]
    fn test_document_unordered_axis() {
        let mut document = grid().to_document("hres_mean");
        document.reference_times.swap(0, 1);
        let err = Grid::from_document(document).unwrap_err();
        assert_eq!("unexpected document format unordered axis", err.to_string());
    }

    #[test]
    fn test_eq_bitwise() {
        let a = grid();
        let mut b = grid();
        assert_eq!(a, b);
        b.values[[0, 0, 0]] = -0.0;
        assert_ne!(a, b);
    }
}
