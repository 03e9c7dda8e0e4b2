use std::hint::black_box;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use criterion::{criterion_group, criterion_main, Bencher, BenchmarkId, Criterion};
use inferring_csv::error::SinkError;
use inferring_csv::value::{Sink, Value};
use inferring_csv::{read, ColumnMeta, ReaderOptions};

const NUM_COLUMNS: usize = 8;

/// Builds `rows` lines of `NUM_COLUMNS` comma-separated integers, with a
/// header row, so every column infers to `int` in one pass.
fn synthetic_csv(rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows * NUM_COLUMNS * 4);
    for i in 0..NUM_COLUMNS {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(format!("col{i}").as_bytes());
    }
    out.push(b'\n');
    for row in 0..rows {
        for col in 0..NUM_COLUMNS {
            if col > 0 {
                out.push(b',');
            }
            out.extend_from_slice((row * NUM_COLUMNS + col).to_string().as_bytes());
        }
        out.push(b'\n');
    }
    out
}

/// A sink that just counts writes, to keep the benchmark focused on the
/// tokenizer/inference pipeline rather than allocation in the sink.
struct CountingSink(usize);

impl Sink for CountingSink {
    fn append_value(&mut self, _row_index: u64, _value: Value<'_>) -> Result<(), SinkError> {
        self.0 += 1;
        Ok(())
    }
    fn append_null(&mut self, _row_index: u64) -> Result<(), SinkError> {
        self.0 += 1;
        Ok(())
    }
    fn truncate_and_reopen(&mut self) -> Result<(), SinkError> {
        self.0 = 0;
        Ok(())
    }
}

fn run_inferring_csv(b: &mut Bencher, slice: &[u8], concurrent: bool) {
    b.iter(|| {
        let mut options = ReaderOptions::default();
        options.concurrent = concurrent;
        let summary = read(slice, options, |_meta: ColumnMeta<'_>| {
            Box::new(CountingSink(0)) as Box<dyn Sink>
        })
        .unwrap();
        black_box(summary.num_rows);
    })
}

fn run_csv_crate(b: &mut Bencher, slice: &[u8]) {
    b.iter(|| {
        let cursor = Cursor::new(slice);
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(cursor);
        let counts: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        for record in reader.records() {
            let record = record.unwrap();
            *counts.lock().unwrap() += record.len();
        }
        black_box(*counts.lock().unwrap());
    })
}

fn bench_readers(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let mut group = c.benchmark_group("Readers");
    for rows in [1_000, 10_000, 50_000] {
        let data = synthetic_csv(rows);
        group.bench_with_input(BenchmarkId::new("inferring_csv (sequential)", rows), &rows, |b, _| {
            run_inferring_csv(b, &data, false)
        });
        group.bench_with_input(BenchmarkId::new("inferring_csv (concurrent)", rows), &rows, |b, _| {
            run_inferring_csv(b, &data, true)
        });
        group.bench_with_input(BenchmarkId::new("csv", rows), &rows, |b, _| run_csv_crate(b, &data));
    }
    group.finish();
}

criterion_group!(benches, bench_readers);
criterion_main!(benches);
