//! Benchmarks for the streaming response transformer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use promhouse_core::transform::{JsonEvents, RowStream};
use promhouse_core::writer::{stage_rows, StagingConfig};
use std::io::Cursor;

fn response(series: usize, samples: usize) -> Vec<u8> {
    let mut body = String::from(r#"{"status":"success","data":{"resultType":"matrix","result":["#);
    for i in 0..series {
        if i > 0 {
            body.push(',');
        }
        body.push_str(&format!(
            r#"{{"metric":{{"__name__":"node_cpu_seconds_total","cpu":"{}","instance":"host-{}:9100","mode":"idle"}},"values":["#,
            i % 64,
            i
        ));
        for j in 0..samples {
            if j > 0 {
                body.push(',');
            }
            body.push_str(&format!(r#"[{},"{}.{}"]"#, 1700000000 + 15 * j, i, j));
        }
        body.push_str("]}");
    }
    body.push_str("]}}");
    body.into_bytes()
}

fn bench_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_events");
    let body = response(100, 20);
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("tokenize", |b| {
        b.iter(|| JsonEvents::new(Cursor::new(black_box(&body[..]))).count());
    });
    group.finish();
}

fn bench_row_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_stream");

    for (series, samples) in [(10, 20), (100, 20), (1000, 20), (100, 240)].iter() {
        let body = response(*series, *samples);
        group.throughput(Throughput::Elements((series * samples) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", series, samples)),
            &body,
            |b, body| {
                b.iter(|| {
                    RowStream::new(Cursor::new(black_box(&body[..])))
                        .filter(|row| row.is_ok())
                        .count()
                });
            },
        );
    }
    group.finish();
}

fn bench_staging(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging");
    let dir = tempfile::tempdir().unwrap();
    let staging = StagingConfig {
        dir: dir.path().to_path_buf(),
        warn_bytes: u64::MAX,
    };
    let body = response(100, 20);

    group.bench_function("stage_2000_rows", |b| {
        b.iter(|| {
            let batch = stage_rows(RowStream::new(Cursor::new(&body[..])), &staging).unwrap();
            black_box(batch.bytes())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_events, bench_row_stream, bench_staging);
criterion_main!(benches);
