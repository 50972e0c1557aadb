use crate::archive::MemoryArchive;
use crate::assembler::GridAssembler;
use crate::grid::Grid;
use crate::models::*;
use crate::types::hours;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::{arr0, ArrayD, IxDyn};

/// Return the UTC instant at the top of the hour.
pub(crate) fn datetime(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// Create a record with a scalar value.
pub(crate) fn scalar_record(reference_time: DateTime<Utc>, lead_hours: f64, value: f64) -> Record {
    Record::new(
        reference_time,
        hours::from_hours(lead_hours),
        arr0(value).into_dyn(),
    )
}

/// Create a record with a one-dimensional value.
pub(crate) fn array_record(reference_time: DateTime<Utc>, lead_hours: f64, values: &[f64]) -> Record {
    Record::new(
        reference_time,
        hours::from_hours(lead_hours),
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap(),
    )
}

/// Create an ExtractionConfig object with only required fields set.
pub(crate) fn get_test_config() -> ExtractionConfig {
    ExtractionConfig {
        step: Duration::hours(6),
        lead_start: Duration::zero(),
        lead_end: Duration::hours(12),
        lead_step: Duration::hours(6),
        tolerance: Duration::hours(3),
        boundary: BoundaryPolicy::default(),
        reduction: ReductionMode::Mean,
        spacing: Duration::hours(6),
        unit_scale: None,
        on_window_failure: WindowFailurePolicy::default(),
        axis_tolerance: 0.01,
    }
}

/// Create an ExtractionConfig object with all fields set.
pub(crate) fn get_test_config_optional() -> ExtractionConfig {
    ExtractionConfig {
        step: Duration::hours(12),
        lead_start: Duration::hours(3),
        lead_end: Duration::hours(15),
        lead_step: Duration::hours(6),
        tolerance: Duration::hours(3),
        boundary: BoundaryPolicy::Inclusive,
        reduction: ReductionMode::GrowthRate,
        spacing: Duration::hours(6),
        unit_scale: Some(UnitScale::new(24.0, "m/day")),
        on_window_failure: WindowFailurePolicy::MarkMissing,
        axis_tolerance: 0.05,
    }
}

/// Scalar "hres" grid on 2016-09-05 with reference times every 6 hours from `start_hour` to
/// `end_hour` and lead times 0, 6 and 12 hours. Each value is `100 * hour + lead hours`.
pub(crate) fn scalar_grid(start_hour: u32, end_hour: u32) -> Grid {
    let mut assembler = GridAssembler::new("hres", ReductionMode::Mean, "m", 0.01);
    for hour in (start_hour..=end_hour).step_by(6) {
        for lead in [0, 6, 12] {
            let coordinate = Coordinate::new(datetime(2016, 9, 5, hour), Duration::hours(lead));
            let value = (100 * hour) as f64 + lead as f64;
            assembler
                .insert(Sample::new(coordinate, arr0(value).into_dyn()))
                .unwrap();
        }
    }
    assembler.finish().unwrap()
}

/// Scalar records for `count` reference times every 6 hours from 2016-09-05T00Z, with lead
/// times every 3 hours from 0 to 15 hours. Each value is `100 * hour + lead hours`.
pub(crate) fn mean_records(count: u32) -> Vec<Record> {
    let mut records = Vec::new();
    for hour in (0..count).map(|i| 6 * i) {
        for lead in (0..=15).step_by(3) {
            let value = (100 * hour) as f64 + lead as f64;
            records.push(scalar_record(datetime(2016, 9, 5, hour), lead as f64, value));
        }
    }
    records
}

/// In-memory "hres" archive holding [mean_records].
pub(crate) fn mean_archive(count: u32) -> MemoryArchive {
    MemoryArchive::new().with_variant("hres", "m", mean_records(count))
}

/// In-memory "hres" archive with records every 6 hours of lead time from 0 to 18 hours,
/// growing by 1 m/h from 500 m.
pub(crate) fn growth_archive(count: u32) -> MemoryArchive {
    let mut records = Vec::new();
    for hour in (0..count).map(|i| 6 * i) {
        for lead in (0..=18).step_by(6) {
            records.push(scalar_record(
                datetime(2016, 9, 5, hour),
                lead as f64,
                500.0 + lead as f64,
            ));
        }
    }
    MemoryArchive::new().with_variant("hres", "m", records)
}

/// In-memory "hres" archive holding `records` except those at `reference_time` with the given
/// lead hours.
pub(crate) fn archive_without(
    records: Vec<Record>,
    reference_time: DateTime<Utc>,
    lead_hours: &[f64],
) -> MemoryArchive {
    let records = records
        .into_iter()
        .filter(|record| {
            record.reference_time != reference_time
                || !lead_hours.contains(&hours::as_hours(record.lead_time))
        })
        .collect();
    MemoryArchive::new().with_variant("hres", "m", records)
}
