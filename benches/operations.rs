/// Benchmarks for window reductions.
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use leadgrid::models::{Record, Window};
use leadgrid::operation::Operation;
use leadgrid::operations;
use leadgrid::types::Missing;
use ndarray::{ArrayD, IxDyn};

fn get_test_records(size: usize) -> Vec<Record> {
    let reference_time = Utc.with_ymd_and_hms(2016, 9, 5, 0, 0, 0).unwrap();
    [3, 9]
        .into_iter()
        .map(|lead| {
            let data: Vec<f64> = (0..size).map(|i| ((i + lead) % 256) as f64).collect();
            let value = ArrayD::from_shape_vec(IxDyn(&[size]), data).unwrap();
            Record::new(reference_time, Duration::hours(lead as i64), value)
        })
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let window = Window::new(
        Utc.with_ymd_and_hms(2016, 9, 5, 0, 0, 0).unwrap(),
        Duration::hours(6),
        Duration::hours(3),
    );
    for size_k in [64, 256, 1024] {
        let size = size_k * 1024;
        let records = get_test_records(size);
        let records: Vec<&Record> = records.iter().collect();
        let missings = vec![
            None,
            Some(Missing::MissingValue(42.0)),
            Some(Missing::MissingValues(vec![42.0])),
            Some(Missing::ValidMax(128.0)),
            Some(Missing::ValidMin(128.0)),
            Some(Missing::ValidRange(5.0, 250.0)),
        ];
        let operations: [(&str, Box<dyn Operation>); 2] = [
            ("mean", Box::new(operations::Mean {})),
            (
                "growth_rate",
                Box::new(operations::GrowthRate {
                    spacing: Duration::hours(6),
                }),
            ),
        ];
        for (op_name, operation) in operations.iter() {
            for missing in missings.iter() {
                let name = format!("{}({}, {:?})", op_name, size, missing);
                c.bench_function(&name, |b| {
                    b.iter(|| {
                        operation
                            .execute(&window, black_box(&records), missing.as_ref())
                            .unwrap();
                    })
                });
            }
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
