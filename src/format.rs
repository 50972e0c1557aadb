//! Self-describing JSON documents for archive files and cached grids.
//!
//! Arrays are stored as a shape plus row-major data. Non-finite elements are written as `null`
//! and read back as NaN. Documents may be gzip or zlib compressed; compression is detected from
//! the leading bytes when decoding.

use crate::compression;
use crate::error::FormatError;
use crate::models::{Compression, ReductionMode};
use crate::types::{hours, Missing};

use chrono::{DateTime, Duration, Utc};
use ndarray::{ArrayD, IxDyn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Format tag of cached grid documents.
pub const GRID_FORMAT: &str = "leadgrid/grid";

/// Current version of the cached grid document layout.
pub const GRID_VERSION: u32 = 1;

/// An n-dimensional array in document form.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StoredArray {
    pub shape: Vec<usize>,
    pub data: Vec<Option<f64>>,
}

impl From<&ArrayD<f64>> for StoredArray {
    fn from(array: &ArrayD<f64>) -> Self {
        StoredArray {
            shape: array.shape().to_vec(),
            data: array
                .iter()
                .map(|x| if x.is_finite() { Some(*x) } else { None })
                .collect(),
        }
    }
}

impl TryFrom<StoredArray> for ArrayD<f64> {
    type Error = FormatError;

    fn try_from(stored: StoredArray) -> Result<Self, Self::Error> {
        let data = stored
            .data
            .into_iter()
            .map(|x| x.unwrap_or(f64::NAN))
            .collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&stored.shape), data)?)
    }
}

/// A record value: a bare number for scalar fields, or an array.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredValue {
    Scalar(Option<f64>),
    Array(StoredArray),
}

impl TryFrom<StoredValue> for ArrayD<f64> {
    type Error = FormatError;

    fn try_from(value: StoredValue) -> Result<Self, Self::Error> {
        match value {
            StoredValue::Scalar(x) => Ok(ndarray::arr0(x.unwrap_or(f64::NAN)).into_dyn()),
            StoredValue::Array(array) => array.try_into(),
        }
    }
}

/// One record of an archive document.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StoredRecord {
    pub reference_time: DateTime<Utc>,
    #[serde(with = "hours")]
    pub lead_time: Duration,
    pub value: StoredValue,
}

/// An archive file: the records of one variant, usually for one reference date.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ArchiveDocument {
    pub variant: String,
    pub units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Missing>,
    pub records: Vec<StoredRecord>,
}

/// A persisted grid.
///
/// `values` has shape `[reference_times, lead_times, field...]`; `missing` is the row-major mask
/// of explicitly missing cells.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GridDocument {
    pub format: String,
    pub version: u32,
    pub key: String,
    pub variant: String,
    pub reduction: ReductionMode,
    pub units: String,
    pub reference_times: Vec<DateTime<Utc>>,
    #[serde(with = "hours::vec")]
    pub lead_times: Vec<Duration>,
    pub values: StoredArray,
    pub missing: Vec<bool>,
}

/// Decode a JSON document, decompressing it first if necessary.
pub fn decode_document<T: DeserializeOwned>(data: &[u8]) -> Result<T, FormatError> {
    match compression::detect(data) {
        Some(compression) => {
            let data = compression::decompress(compression, data)?;
            Ok(serde_json::from_slice(&data)?)
        }
        None => Ok(serde_json::from_slice(data)?),
    }
}

/// Encode a JSON document with optional compression.
pub fn encode_document<T: Serialize>(
    document: &T,
    compression: Option<Compression>,
) -> Result<Vec<u8>, FormatError> {
    let data = serde_json::to_vec(document)?;
    match compression {
        Some(compression) => compression::compress(compression, &data),
        None => Ok(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    use ndarray::array;

    const ARCHIVE_JSON: &str = r#"{
        "variant": "hres",
        "units": "m",
        "missing": {"missing_value": -999.0},
        "records": [
            {"reference_time": "2016-09-05T00:00:00Z", "lead_time": 3, "value": 500.0},
            {"reference_time": "2016-09-05T00:00:00Z", "lead_time": 9, "value": null},
            {"reference_time": "2016-09-05T00:00:00Z", "lead_time": 15,
             "value": {"shape": [2, 2], "data": [1.0, 2.0, null, 4.0]}}
        ]
    }"#;

    #[test]
    fn test_decode_archive_document() {
        let document: ArchiveDocument = decode_document(ARCHIVE_JSON.as_bytes()).unwrap();
        assert_eq!("hres", document.variant);
        assert_eq!(Some(Missing::MissingValue(-999.0)), document.missing);
        assert_eq!(3, document.records.len());
        assert_eq!(test_utils::datetime(2016, 9, 5, 0), document.records[0].reference_time);
        assert_eq!(Duration::hours(9), document.records[1].lead_time);
        assert_eq!(StoredValue::Scalar(Some(500.0)), document.records[0].value);
        assert_eq!(StoredValue::Scalar(None), document.records[1].value);
        let array = ArrayD::try_from(document.records[2].value.clone()).unwrap();
        assert_eq!(&[2, 2], array.shape());
        assert_eq!(4.0, array[[1, 1]]);
        assert!(array[[1, 0]].is_nan());
    }

    #[test]
    fn test_decode_compressed() {
        for compression in [Compression::Gzip, Compression::Zlib] {
            let data = compression::compress(compression, ARCHIVE_JSON.as_bytes()).unwrap();
            let document: ArchiveDocument = decode_document(&data).unwrap();
            assert_eq!(3, document.records.len());
        }
    }

    #[test]
    fn test_scalar_value() {
        let array = ArrayD::try_from(StoredValue::Scalar(Some(1.5))).unwrap();
        assert_eq!(0, array.ndim());
        assert_eq!(Some(&1.5), array.iter().next());
    }

    #[test]
    fn test_stored_array_non_finite() {
        let array = array![[1.0, f64::NAN], [f64::INFINITY, -2.0]].into_dyn();
        let stored = StoredArray::from(&array);
        assert_eq!(vec![2, 2], stored.shape);
        assert_eq!(vec![Some(1.0), None, None, Some(-2.0)], stored.data);
    }

    #[test]
    fn test_stored_array_bad_shape() {
        let stored = StoredArray {
            shape: vec![3, 2],
            data: vec![Some(1.0); 5],
        };
        let err = ArrayD::try_from(stored).unwrap_err();
        assert!(matches!(err, FormatError::ShapeInvalid(_)));
    }

    #[test]
    fn test_encode_document() {
        let document: ArchiveDocument = decode_document(ARCHIVE_JSON.as_bytes()).unwrap();
        let data = encode_document(&document, Some(Compression::Gzip)).unwrap();
        assert_eq!(Some(Compression::Gzip), compression::detect(&data));
        let decoded: ArchiveDocument = decode_document(&data).unwrap();
        assert_eq!(document, decoded);
    }

    #[test]
    fn test_decode_invalid() {
        let err = decode_document::<ArchiveDocument>(b"{\"variant\": 1}").unwrap_err();
        assert!(matches!(err, FormatError::Json(_)));
    }
}
