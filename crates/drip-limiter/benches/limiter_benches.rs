//! Criterion benchmarks for the admission hot path.
//!
//! Covers: single IP check, composite faucet check, and read-only status.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use drip_limiter::{AdmissionEngine, KeyKind, LimitRule, LimiterConfig, ManualClock};

fn engine() -> AdmissionEngine {
    // Limits high enough that the bench never hits the blocked branch.
    let cfg = LimiterConfig {
        ip: LimitRule::new(u32::MAX, 60_000),
        wallet: LimitRule::new(u32::MAX, 60_000),
        global: LimitRule::new(u32::MAX, 60_000),
        ..LimiterConfig::default()
    };
    AdmissionEngine::with_clock(cfg, Arc::new(ManualClock::new(0))).unwrap()
}

fn bench_check_ip(c: &mut Criterion) {
    let engine = engine();
    c.bench_function("check_ip", |b| {
        b.iter(|| engine.check_ip(black_box("203.0.113.9")))
    });
}

fn bench_check_all(c: &mut Criterion) {
    let engine = engine();
    let wallet = format!("0x{}", "ab".repeat(32));
    c.bench_function("check_all_with_wallet", |b| {
        b.iter(|| engine.check_all(black_box("203.0.113.9"), black_box(Some(wallet.as_str()))))
    });
}

fn bench_status_of(c: &mut Criterion) {
    let engine = engine();
    engine.check_ip("203.0.113.9");
    c.bench_function("status_of", |b| {
        b.iter(|| engine.status_of(black_box("203.0.113.9"), KeyKind::Ip))
    });
}

criterion_group!(benches, bench_check_ip, bench_check_all, bench_status_of);
criterion_main!(benches);
