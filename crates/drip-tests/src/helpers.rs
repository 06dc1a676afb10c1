//! Shared helpers for the adversarial tests.

use std::sync::Arc;

use drip_limiter::{AdmissionEngine, LimitRule, LimiterConfig, ManualClock};

pub const MINUTE: u64 = 60_000;
pub const HOUR: u64 = 60 * MINUTE;

/// Production-shaped limits: 50 per IP per 15 minutes, 1 per wallet per
/// hour, 1000 service-wide per hour.
pub fn faucet_config() -> LimiterConfig {
    LimiterConfig {
        ip: LimitRule::new(50, 15 * MINUTE),
        wallet: LimitRule::new(1, HOUR),
        global: LimitRule::new(1_000, HOUR),
        ..LimiterConfig::default()
    }
}

/// Uniform limits, handy when a test only cares about one dimension.
pub fn uniform_config(max: u32, window_ms: u64) -> LimiterConfig {
    let rule = LimitRule::new(max, window_ms);
    LimiterConfig {
        ip: rule,
        wallet: rule,
        global: rule,
        ..LimiterConfig::default()
    }
}

/// Engine on a manual clock starting at `start`.
pub fn engine_with(config: LimiterConfig, start: u64) -> (Arc<AdmissionEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let engine = AdmissionEngine::with_clock(config, clock.clone())
        .expect("test config must be valid");
    (Arc::new(engine), clock)
}

/// Canonical wallet address built from a seed byte.
pub fn wallet(seed: u8) -> String {
    format!("0x{}", format!("{seed:02x}").repeat(32))
}
