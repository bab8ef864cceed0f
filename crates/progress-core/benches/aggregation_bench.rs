use criterion::{black_box, criterion_group, criterion_main, Criterion};
use progress_core::{
    progress_trend, subset_stats, ContractId, FreelancerId, ProgressUpdate, ProjectId, UpdateId,
};
use time::macros::{date, datetime};
use time::Duration;

fn fixture(count: i64) -> Vec<ProgressUpdate> {
    (0..count)
        .map(|i| {
            let at = datetime!(2026-01-01 00:00 UTC) + Duration::minutes(i * 11);
            ProgressUpdate {
                id: UpdateId::new(),
                project_id: ProjectId(i % 8),
                contract_id: ContractId(i % 5),
                freelancer_id: FreelancerId(i % 13),
                title: format!("report {i}"),
                description: (i % 3 == 0).then(|| "weekly milestone review".to_string()),
                progress_percentage: u8::try_from((i * 7) % 101).unwrap_or(0),
                created_at: at,
                updated_at: at,
            }
        })
        .collect()
}

fn bench_trend(c: &mut Criterion) {
    let updates = fixture(10_000);
    c.bench_function("progress_trend_90_days", |b| {
        b.iter(|| progress_trend(black_box(&updates), date!(2026-01-01), date!(2026-03-31)));
    });
}

fn bench_subset_stats(c: &mut Criterion) {
    let updates = fixture(10_000);
    c.bench_function("subset_stats_10k", |b| {
        b.iter(|| subset_stats(black_box(&updates)));
    });
}

criterion_group!(benches, bench_trend, bench_subset_stats);
criterion_main!(benches);
