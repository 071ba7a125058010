use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reconcile_core::{content_hash, Payload, Snapshot};
use reconcile_engine::ConflictDetector;
use serde_json::json;

fn sample_payload(fields: usize, index: usize) -> Payload {
    (0..fields)
        .map(|i| (format!("field-{i}"), json!(format!("value-{index}-{i}"))))
        .collect()
}

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");

    for fields in [4, 16, 64].iter() {
        let payload = sample_payload(*fields, 0);
        group.bench_with_input(BenchmarkId::new("hash_payload", fields), fields, |b, _| {
            b.iter(|| black_box(content_hash(&payload, false).unwrap()));
        });
    }

    let reordered_a = sample_payload(32, 1);
    let mut reordered_b: Payload = reordered_a.clone().into_iter().rev().collect();
    reordered_b.insert("extra_null".to_string(), serde_json::Value::Null);
    group.bench_function("hash_stable_under_reorder", |b| {
        b.iter(|| {
            black_box(content_hash(&reordered_a, false).unwrap());
            black_box(content_hash(&reordered_b, false).unwrap());
        });
    });

    group.finish();
}

fn bench_conflict_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_detection");
    let detector = ConflictDetector::new();

    for size in [100, 1_000, 10_000].iter() {
        let local: Vec<Snapshot> = (0..*size)
            .map(|i| {
                let mut s = Snapshot::new(format!("id-{i}"), "todos", sample_payload(8, i));
                s.version = 2;
                s.last_modified = Utc::now();
                s
            })
            .collect();

        // Half the records diverge (different content + version), half
        // align exactly so the detector's cheap equal-content path is
        // also represented rather than hitting the hashing path every time.
        let remote: Vec<Snapshot> = local
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let mut r = l.clone();
                r.version = 3;
                r.last_modified = l.last_modified + Duration::seconds(5);
                if i % 2 == 0 {
                    r.payload = sample_payload(8, i + 1_000_000);
                }
                r
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("detect", size), size, |b, _| {
            b.iter(|| black_box(detector.detect("todos", &local, &remote).unwrap()));
        });
    }

    group.finish();
}

fn bench_conflict_detection_no_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_detection_no_conflicts");
    let detector = ConflictDetector::new();

    for size in [100, 1_000, 10_000].iter() {
        let local: Vec<Snapshot> = (0..*size)
            .map(|i| Snapshot::new(format!("id-{i}"), "todos", sample_payload(8, i)))
            .collect();
        let empty_remote: Vec<Snapshot> = Vec::new();

        group.bench_with_input(BenchmarkId::new("all_absent_remote", size), size, |b, _| {
            b.iter(|| black_box(detector.detect("todos", &local, &empty_remote).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_content_hash,
    bench_conflict_detection,
    bench_conflict_detection_no_conflicts
);
criterion_main!(benches);
