//! Missing data descriptors
//!
//! Archive fields can contain missing data which should be ignored during reduction. There are
//! multiple ways to describe the missing data, mirroring the NetCDF conventions the archives are
//! produced with. Currently we support:
//!
//! * A single missing (fill) value
//! * Multiple missing values
//! * A valid minimum value
//! * A valid maximum value
//! * A valid range of values
//!
//! NaN is always treated as missing, whichever descriptor is in use.

use serde::{Deserialize, Serialize};
use validator::ValidationError;

/// Missing data
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Missing {
    /// A single missing value
    MissingValue(f64),
    /// Multple missing values
    MissingValues(Vec<f64>),
    /// Valid minimum
    ValidMin(f64),
    /// Valid maxiumum
    ValidMax(f64),
    /// Valid range
    ValidRange(f64, f64),
}

impl Missing {
    /// Validate a missing data descriptor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Missing::MissingValues(values) if values.is_empty() => Err(ValidationError::new(
                "Missing data values must not be empty",
            )),
            Missing::ValidRange(min, max) if min >= max => {
                let mut error =
                    ValidationError::new("Missing data valid range min must be less than max");
                error.add_param("min".into(), min);
                error.add_param("max".into(), max);
                Err(error)
            }
            _ => Ok(()),
        }
    }

    /// Filter function to check whether the provided value is a 'missing' value
    pub fn is_missing(&self, x: f64) -> bool {
        if x.is_nan() {
            return true;
        }
        match self {
            Missing::MissingValue(value) => x == *value,
            Missing::MissingValues(values) => values.contains(&x),
            Missing::ValidMin(min) => x < *min,
            Missing::ValidMax(max) => x > *max,
            Missing::ValidRange(min, max) => x < *min || x > *max,
        }
    }
}

/// Returns whether `x` is missing under an optional descriptor.
///
/// Without a descriptor only NaN is missing.
pub fn is_missing(missing: Option<&Missing>, x: f64) -> bool {
    match missing {
        Some(missing) => missing.is_missing(x),
        None => x.is_nan(),
    }
}
