//! Durations expressed as fractional hours.
//!
//! Lead times, steps and tolerances are [chrono::Duration] values in memory but are written as
//! hours in configuration, archive and cache documents, matching the `forecast_period` convention
//! of the archives. This module can be used with `#[serde(with = "crate::types::hours")]`.

use chrono::Duration;
use serde::{de, Deserialize, Deserializer, Serializer};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Largest magnitude accepted when converting from hours (roughly 114,000 years).
const MAX_HOURS: f64 = 1.0e9;

/// Convert fractional hours to a [Duration], rounded to the nearest second.
///
/// Returns `None` for non-finite or out of range input.
pub fn try_from_hours(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || hours.abs() > MAX_HOURS {
        return None;
    }
    Some(Duration::seconds((hours * SECONDS_PER_HOUR).round() as i64))
}

/// Convert fractional hours to a [Duration], rounded to the nearest second.
///
/// # Panics
///
/// Panics on non-finite input or values beyond roughly 10^9 hours.
pub fn from_hours(hours: f64) -> Duration {
    try_from_hours(hours).unwrap_or_else(|| panic!("{} hours is not a representable duration", hours))
}

/// Convert a [Duration] to fractional hours.
pub fn as_hours(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / SECONDS_PER_HOUR
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(as_hours(*duration))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let hours = f64::deserialize(deserializer)?;
    try_from_hours(hours)
        .ok_or_else(|| de::Error::custom(format!("{} hours is not a valid duration", hours)))
}

/// The same conversion applied to every element of a sequence.
pub mod vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(
        durations: &[Duration],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(durations.len()))?;
        for duration in durations {
            seq.serialize_element(&as_hours(*duration))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        Vec::<f64>::deserialize(deserializer)?
            .into_iter()
            .map(|hours| {
                try_from_hours(hours)
                    .ok_or_else(|| de::Error::custom(format!("{} hours is not a valid duration", hours)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hours_rounds_to_seconds() {
        assert_eq!(Duration::minutes(30), from_hours(0.5));
        assert_eq!(Duration::seconds(1), from_hours(1.0 / 3600.0 + 1.0e-9));
        assert_eq!(Duration::hours(-3), from_hours(-3.0));
    }

    #[test]
    fn test_as_hours() {
        assert_eq!(6.0, as_hours(Duration::hours(6)));
        assert_eq!(0.25, as_hours(Duration::minutes(15)));
    }

    #[test]
    fn test_try_from_hours_rejects_non_finite() {
        assert_eq!(None, try_from_hours(f64::NAN));
        assert_eq!(None, try_from_hours(f64::INFINITY));
        assert_eq!(None, try_from_hours(2.0e9));
    }

    #[test]
    #[should_panic(expected = "is not a representable duration")]
    fn test_from_hours_panics_on_nan() {
        from_hours(f64::NAN);
    }
}
