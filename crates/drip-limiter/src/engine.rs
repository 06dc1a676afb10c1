//! Admission policy engine.
//!
//! Decides, per request, whether the caller may proceed based on independent
//! limits per client IP, per destination wallet and across the whole service.
//!
//! # Usage
//!
//! The HTTP boundary calls [`AdmissionEngine::check_all`] once per faucet
//! request (and [`AdmissionEngine::check_ip`] for everything else), then turns
//! a denied [`Admission`] into a 429. Checks never block and never fail: an
//! inconsistent record is logged, reset, and the request is allowed.

use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::{LimitRule, LimiterConfig};
use crate::error::ConfigError;
use crate::key::{normalize_identifier, KeyKind, TrackingKey};
use crate::store::{EntryStore, StoreStats};
use crate::verdict::{Admission, LimitStatus, Verdict};
use crate::window::{Decision, FixedWindow, WindowAlgorithm};

/// Introspection snapshot for admin and health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub bypassed_keys: usize,
}

/// Multi-key fixed-window admission control.
pub struct AdmissionEngine {
    config: LimiterConfig,
    store: EntryStore,
    bypass: DashSet<String>,
    clock: Arc<dyn Clock>,
    algorithm: Box<dyn WindowAlgorithm>,
}

impl AdmissionEngine {
    /// Build an engine on the system clock with fixed-window counting.
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Self::with_parts(config, clock, Box::new(FixedWindow))
    }

    /// Build an engine from explicit parts. Validates `config` once.
    pub fn with_parts(
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        algorithm: Box<dyn WindowAlgorithm>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let bypass = DashSet::new();
        for raw in &config.exempt {
            bypass.insert(normalize_identifier(raw));
        }

        info!(
            enabled = config.enabled,
            ip_max = config.ip.max_requests,
            ip_window_ms = config.ip.window_ms,
            wallet_max = config.wallet.max_requests,
            wallet_window_ms = config.wallet.window_ms,
            global_max = config.global.max_requests,
            global_window_ms = config.global.window_ms,
            exempt = bypass.len(),
            "admission: engine configured"
        );

        Ok(Self {
            config,
            store: EntryStore::new(),
            bypass,
            clock,
            algorithm,
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn now_ms(&self) -> Timestamp {
        self.clock.now_ms()
    }

    // -------------------------------------------------------------------------
    // Checks
    // -------------------------------------------------------------------------

    /// Count a request from client `ip`.
    pub fn check_ip(&self, ip: &str) -> Verdict {
        if self.is_bypassed(ip) {
            return self.unrestricted(KeyKind::Ip);
        }
        self.charge(&TrackingKey::ip(ip)).0
    }

    /// Count a request for destination `address`.
    pub fn check_wallet(&self, address: &str) -> Verdict {
        if self.is_bypassed(address) {
            return self.unrestricted(KeyKind::Wallet);
        }
        self.charge(&TrackingKey::new(KeyKind::Wallet, address)).0
    }

    /// Count a request against the service-wide counter.
    pub fn check_global(&self) -> Verdict {
        self.charge(&TrackingKey::global()).0
    }

    /// Composite check for a faucet request.
    ///
    /// Global and IP checks always run; the wallet check runs when an address
    /// is given. If the IP or the wallet is exempt, no check runs at all.
    ///
    /// A request always counts against its own IP. The wallet and global
    /// counters are shared, so they are only charged by a request that every
    /// other dimension admits: behind a denied IP they are projected without
    /// counting, and a wallet charge is released again if the global check
    /// then denies. A blocked client therefore cannot drain budgets that
    /// belong to other callers.
    pub fn check_all(&self, ip: &str, address: Option<&str>) -> Admission {
        if self.is_bypassed(ip) || address.is_some_and(|a| self.is_bypassed(a)) {
            debug!(%ip, ?address, "admission: exempt caller");
            return Admission::exempt(self.unrestricted(KeyKind::Global));
        }

        let ip_key = TrackingKey::ip(ip);
        let wallet_key = address.map(|a| TrackingKey::new(KeyKind::Wallet, a));
        let global_key = TrackingKey::global();

        let (ip_verdict, _) = self.charge(&ip_key);

        let mut wallet = wallet_key.as_ref().map(|key| {
            if ip_verdict.allowed {
                self.charge(key)
            } else {
                (self.project(key), None)
            }
        });
        let wallet_allowed = wallet.as_ref().is_none_or(|(v, _)| v.allowed);

        let global_verdict = if ip_verdict.allowed && wallet_allowed {
            let (verdict, _) = self.charge(&global_key);
            if !verdict.allowed {
                if let (Some(key), Some((_, Some(window_start)))) = (&wallet_key, wallet) {
                    self.release(key, window_start);
                    wallet = Some((self.project(key), None));
                }
            }
            verdict
        } else {
            self.project(&global_key)
        };

        let mut checks = Vec::with_capacity(3);
        checks.push(global_verdict);
        checks.push(ip_verdict);
        if let Some((wallet_verdict, _)) = wallet {
            checks.push(wallet_verdict);
        }

        let admission = Admission::from_checks(checks, self.unrestricted(KeyKind::Global));
        if !admission.allowed() {
            debug!(
                %ip,
                ?address,
                dimension = %admission.verdict.kind,
                reset_time = admission.verdict.reset_time,
                "admission: request denied"
            );
        }
        admission
    }

    /// Count one request against `key`. On allow, also returns the start of
    /// the window the request was counted in.
    fn charge(&self, key: &TrackingKey) -> (Verdict, Option<Timestamp>) {
        let rule = *self.config.rule(key.kind());
        if !self.config.enabled {
            return (self.unrestricted(key.kind()), None);
        }

        let now = self.clock.now_ms();
        let (decision, window_start) = self.store.with_record(key, now, |record| {
            let outcome = self.algorithm.admit(record, &rule, now);
            record.last_seen = now;
            let decision = outcome.unwrap_or_else(|e| {
                // Fail open: a limiter fault must never deny legitimate traffic.
                error!(%key, error = %e, "admission: inconsistent record, allowing request");
                record.restart(now);
                Decision {
                    allowed: true,
                    remaining: rule.max_requests.saturating_sub(1),
                    reset_time: now.saturating_add(rule.window_ms),
                }
            });
            (decision, record.window_start)
        });

        let verdict = Verdict {
            kind: key.kind(),
            allowed: decision.allowed,
            limit: rule.max_requests,
            remaining: decision.remaining,
            reset_time: decision.reset_time,
        };
        (verdict, decision.allowed.then_some(window_start))
    }

    /// What the next request for `key` would see, without counting it.
    fn project(&self, key: &TrackingKey) -> Verdict {
        let rule = self.config.rule(key.kind());
        if !self.config.enabled {
            return self.unrestricted(key.kind());
        }

        let record = self.store.get(key);
        let decision = self.algorithm.project(record.as_ref(), rule, self.clock.now_ms());
        Verdict {
            kind: key.kind(),
            allowed: decision.allowed,
            limit: rule.max_requests,
            remaining: decision.remaining,
            reset_time: decision.reset_time,
        }
    }

    /// Undo a [`charge`](Self::charge) that did not lead to an admission.
    fn release(&self, key: &TrackingKey, window_start: Timestamp) {
        let now = self.clock.now_ms();
        self.store.with_record(key, now, |record| {
            self.algorithm.release(record, window_start);
        });
        debug!(%key, "admission: charge released");
    }

    fn unrestricted(&self, kind: KeyKind) -> Verdict {
        Verdict::unrestricted(kind, self.config.rule(kind), self.clock.now_ms())
    }

    // -------------------------------------------------------------------------
    // Administration
    // -------------------------------------------------------------------------

    /// Forget the record for `key`; its next request starts a fresh window.
    /// Returns `true` if the key was tracked.
    pub fn reset(&self, key: &str, kind: KeyKind) -> bool {
        let key = TrackingKey::new(kind, key);
        let removed = self.store.remove(&key);
        info!(%key, removed, "admission: limit reset");
        removed
    }

    /// Forget every record. Erases all abuse history.
    pub fn reset_all(&self) -> usize {
        let removed = self.store.clear();
        warn!(removed, "admission: ALL rate limit state cleared");
        removed
    }

    /// Exempt `key` (a client IP or wallet address) from every check.
    ///
    /// Any record already tracked for it is dropped.
    pub fn bypass(&self, key: &str) {
        let id = normalize_identifier(key);
        self.store.remove(&TrackingKey::new(KeyKind::Ip, &id));
        self.store.remove(&TrackingKey::new(KeyKind::Wallet, &id));
        info!(key = %id, "admission: bypass granted");
        self.bypass.insert(id);
    }

    /// Revoke an exemption. Returns `true` if `key` was exempt.
    pub fn unbypass(&self, key: &str) -> bool {
        let id = normalize_identifier(key);
        let removed = self.bypass.remove(&id).is_some();
        if removed {
            info!(key = %id, "admission: bypass revoked");
        }
        removed
    }

    pub fn is_bypassed(&self, key: &str) -> bool {
        !self.bypass.is_empty() && self.bypass.contains(&normalize_identifier(key))
    }

    /// Current state of `key` without counting a request.
    pub fn status_of(&self, key: &str, kind: KeyKind) -> LimitStatus {
        let verdict = if kind != KeyKind::Global && self.is_bypassed(key) {
            let rule: &LimitRule = self.config.rule(kind);
            let now = self.clock.now_ms();
            let fresh = self.algorithm.project(None, rule, now);
            Verdict {
                kind,
                allowed: fresh.allowed,
                limit: rule.max_requests,
                remaining: fresh.remaining,
                reset_time: fresh.reset_time,
            }
        } else {
            self.project(&TrackingKey::new(kind, key))
        };

        LimitStatus {
            kind,
            limit: verdict.limit,
            remaining: verdict.remaining,
            reset_time: verdict.reset_time,
            blocked: !verdict.allowed,
        }
    }

    // -------------------------------------------------------------------------
    // Housekeeping
    // -------------------------------------------------------------------------

    /// Run one eviction sweep. Records idle longer than the longest
    /// configured window are dropped.
    pub fn evict_expired(&self) -> usize {
        self.store
            .evict_expired(self.config.max_window_ms(), self.clock.now_ms())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: self.store.stats(),
            bypassed_keys: self.bypass.len(),
        }
    }
}

impl std::fmt::Debug for AdmissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("config", &self.config)
            .field("tracked_keys", &self.store.len())
            .field("bypassed_keys", &self.bypass.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LimiterError;
    use crate::store::TrackingRecord;

    const HOUR: u64 = 3_600_000;
    const WALLET: &str = "0xaa";

    fn config(ip: u32, wallet: u32, global: u32) -> LimiterConfig {
        LimiterConfig {
            ip: LimitRule::new(ip, HOUR),
            wallet: LimitRule::new(wallet, HOUR),
            global: LimitRule::new(global, HOUR),
            ..LimiterConfig::default()
        }
    }

    fn engine(cfg: LimiterConfig) -> (AdmissionEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let engine = AdmissionEngine::with_clock(cfg, clock.clone()).unwrap();
        (engine, clock)
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let err = AdmissionEngine::new(config(0, 1, 1)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroMaxRequests { kind: KeyKind::Ip });
    }

    #[test]
    fn wallet_claim_scenario() {
        let (engine, clock) = engine(config(50, 1, 1000));

        let first = engine.check_wallet(WALLET);
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        clock.set(1_000);
        let second = engine.check_wallet(WALLET);
        assert!(!second.allowed);
        assert_eq!(second.reset_time, HOUR);

        clock.set(HOUR + 1);
        let third = engine.check_wallet(WALLET);
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn wallet_spellings_share_counter() {
        let (engine, _) = engine(config(50, 1, 1000));
        assert!(engine.check_wallet("0xAA").allowed);
        assert!(!engine.check_wallet(&format!("0x{:0>64}", "aa")).allowed);
    }

    #[test]
    fn ips_are_independent() {
        let (engine, _) = engine(config(2, 1, 1000));
        for _ in 0..3 {
            engine.check_ip("10.0.0.1");
        }
        assert!(!engine.check_ip("10.0.0.1").allowed);
        assert!(engine.check_ip("10.0.0.2").allowed);
        assert!(engine.check_all("10.0.0.3", None).allowed());
    }

    #[test]
    fn check_all_reports_every_dimension() {
        let (engine, _) = engine(config(1, 5, 100));
        assert!(engine.check_all("10.0.0.1", Some(WALLET)).allowed());

        // IP is now exhausted; wallet and global are reported but not charged.
        let denied = engine.check_all("10.0.0.1", Some(WALLET));
        assert!(!denied.allowed());
        assert_eq!(denied.verdict.kind, KeyKind::Ip);
        assert_eq!(denied.checks.len(), 3);
        assert_eq!(denied.check(KeyKind::Global).unwrap().remaining, 99);
        assert_eq!(denied.check(KeyKind::Wallet).unwrap().remaining, 4);
    }

    #[test]
    fn blocked_ip_cannot_drain_global() {
        let (engine, _) = engine(config(5, 1, 100));
        let admitted = (0..100)
            .filter(|_| engine.check_all("203.0.113.66", None).allowed())
            .count();
        assert_eq!(admitted, 5);

        let fresh = engine.check_all("198.51.100.7", Some(WALLET));
        assert!(fresh.allowed());
        assert_eq!(fresh.check(KeyKind::Global).unwrap().remaining, 94);
    }

    #[test]
    fn wallet_denial_does_not_charge_global() {
        let (engine, _) = engine(config(10, 1, 100));
        assert!(engine.check_all("10.0.0.1", Some(WALLET)).allowed());
        for _ in 0..5 {
            let denied = engine.check_all("10.0.0.1", Some(WALLET));
            assert_eq!(denied.verdict.kind, KeyKind::Wallet);
        }
        assert_eq!(engine.status_of("", KeyKind::Global).remaining, 99);
        assert_eq!(engine.status_of("10.0.0.1", KeyKind::Ip).remaining, 4);
    }

    #[test]
    fn global_denial_releases_wallet_charge() {
        let (engine, clock) = engine(config(10, 1, 1));
        assert!(engine.check_all("10.0.0.1", Some("0xaa")).allowed());

        let denied = engine.check_all("10.0.0.2", Some("0xbb"));
        assert_eq!(denied.verdict.kind, KeyKind::Global);
        assert_eq!(denied.check(KeyKind::Wallet).unwrap().remaining, 1);
        let wallet = engine.status_of("0xbb", KeyKind::Wallet);
        assert_eq!(wallet.remaining, 1);
        assert!(!wallet.blocked);

        clock.advance(HOUR);
        assert!(engine.check_all("10.0.0.2", Some("0xbb")).allowed());
    }

    #[test]
    fn check_all_without_wallet_skips_wallet() {
        let (engine, _) = engine(config(5, 1, 100));
        let admission = engine.check_all("10.0.0.1", None);
        assert_eq!(admission.checks.len(), 2);
        assert!(admission.check(KeyKind::Wallet).is_none());
        assert_eq!(engine.stats().store.wallet_keys, 0);
    }

    #[test]
    fn global_limit_denies_everyone() {
        let (engine, clock) = engine(config(10, 10, 2));
        assert!(engine.check_all("10.0.0.1", None).allowed());
        assert!(engine.check_all("10.0.0.2", None).allowed());

        let denied = engine.check_all("10.0.0.3", None);
        assert!(!denied.allowed());
        assert_eq!(denied.verdict.kind, KeyKind::Global);

        clock.advance(HOUR);
        assert!(engine.check_all("10.0.0.3", None).allowed());
    }

    #[test]
    fn reset_gives_fresh_window() {
        let (engine, clock) = engine(config(1, 1, 100));
        engine.check_ip("10.0.0.1");
        assert!(!engine.check_ip("10.0.0.1").allowed);

        assert!(engine.reset("10.0.0.1", KeyKind::Ip));
        clock.advance(10);
        let v = engine.check_ip("10.0.0.1");
        assert!(v.allowed);
        assert_eq!(v.reset_time, 10 + HOUR, "window restarts at the new request");
        assert!(!engine.reset("10.0.0.9", KeyKind::Ip));
    }

    #[test]
    fn reset_all_clears_store() {
        let (engine, _) = engine(config(1, 1, 100));
        engine.check_all("10.0.0.1", Some(WALLET));
        assert_eq!(engine.reset_all(), 3);
        assert_eq!(engine.stats().store.tracked_keys, 0);
    }

    #[test]
    fn bypassed_ip_is_never_tracked() {
        let (engine, _) = engine(config(1, 1, 1));
        engine.bypass("10.0.0.1");
        for _ in 0..10 {
            let admission = engine.check_all("10.0.0.1", Some(WALLET));
            assert!(admission.allowed());
            assert!(admission.exempt);
        }
        assert_eq!(engine.stats().store.tracked_keys, 0);
        assert_eq!(engine.stats().bypassed_keys, 1);
        // The global counter is untouched.
        assert!(engine.check_global().allowed);
    }

    #[test]
    fn bypass_matches_wallet_spellings() {
        let (engine, _) = engine(config(5, 1, 100));
        engine.bypass("0xAA");
        assert!(engine.check_all("10.0.0.1", Some("aa")).exempt);
        assert!(engine.unbypass(&format!("0x{:0>64}", "aa")));
        assert!(!engine.check_all("10.0.0.1", Some("aa")).exempt);
    }

    #[test]
    fn bypass_drops_existing_record() {
        let (engine, _) = engine(config(1, 1, 100));
        engine.check_ip("10.0.0.1");
        engine.check_ip("10.0.0.1");
        engine.bypass("10.0.0.1");
        assert_eq!(engine.stats().store.ip_keys, 0);
        engine.unbypass("10.0.0.1");
        assert!(engine.check_ip("10.0.0.1").allowed);
    }

    #[test]
    fn exempt_list_from_config() {
        let cfg = LimiterConfig {
            exempt: vec!["127.0.0.1".to_string(), "0xAA".to_string()],
            ..config(1, 1, 1)
        };
        let (engine, _) = engine(cfg);
        assert!(engine.is_bypassed(" 127.0.0.1"));
        assert!(engine.is_bypassed(&format!("0x{:0>64}", "aa")));
        assert!(!engine.is_bypassed("10.0.0.1"));
    }

    #[test]
    fn disabled_engine_allows_without_tracking() {
        let cfg = LimiterConfig {
            enabled: false,
            ..config(1, 1, 1)
        };
        let (engine, _) = engine(cfg);
        for _ in 0..5 {
            assert!(engine.check_all("10.0.0.1", Some(WALLET)).allowed());
        }
        assert_eq!(engine.stats().store.tracked_keys, 0);
    }

    #[test]
    fn status_does_not_count() {
        let (engine, _) = engine(config(3, 1, 100));
        engine.check_ip("10.0.0.1");
        for _ in 0..10 {
            let status = engine.status_of("10.0.0.1", KeyKind::Ip);
            assert_eq!(status.remaining, 2);
            assert!(!status.blocked);
        }
        assert_eq!(engine.check_ip("10.0.0.1").remaining, 1);
    }

    #[test]
    fn status_of_untracked_and_blocked() {
        let (engine, clock) = engine(config(3, 1, 100));
        clock.set(500);
        let fresh = engine.status_of(WALLET, KeyKind::Wallet);
        assert_eq!(fresh.remaining, 1);
        assert_eq!(fresh.reset_time, 500 + HOUR);
        assert_eq!(engine.stats().store.tracked_keys, 0, "status must not create records");

        engine.check_wallet(WALLET);
        engine.check_wallet(WALLET);
        let blocked = engine.status_of(WALLET, KeyKind::Wallet);
        assert!(blocked.blocked);
        assert_eq!(blocked.reset_time, 500 + HOUR);
    }

    #[test]
    fn eviction_restores_fresh_window() {
        let cfg = LimiterConfig {
            ip: LimitRule::new(1, 1_000),
            wallet: LimitRule::new(1, 2_000),
            global: LimitRule::new(100, 1_000),
            ..LimiterConfig::default()
        };
        let (engine, clock) = engine(cfg);
        engine.check_ip("10.0.0.1");
        assert!(!engine.check_ip("10.0.0.1").allowed);

        clock.advance(1_500);
        assert_eq!(engine.evict_expired(), 0, "idle less than the longest window");

        clock.advance(1_000);
        assert_eq!(engine.evict_expired(), 1);
        assert_eq!(engine.stats().store.tracked_keys, 0);
        assert!(engine.check_ip("10.0.0.1").allowed);
    }

    /// An algorithm that always reports an inconsistent record.
    struct Broken;

    impl WindowAlgorithm for Broken {
        fn admit(
            &self,
            _record: &mut TrackingRecord,
            _rule: &LimitRule,
            _now: Timestamp,
        ) -> Result<Decision, LimiterError> {
            Err(LimiterError::CounterOverflow)
        }

        fn project(&self, record: Option<&TrackingRecord>, rule: &LimitRule, now: Timestamp) -> Decision {
            FixedWindow.project(record, rule, now)
        }
    }

    #[test]
    fn internal_fault_fails_open() {
        let clock = Arc::new(ManualClock::new(0));
        let engine =
            AdmissionEngine::with_parts(config(1, 1, 1), clock, Box::new(Broken)).unwrap();
        for _ in 0..5 {
            assert!(engine.check_all("10.0.0.1", Some(WALLET)).allowed());
        }
    }

    #[test]
    fn clock_skew_fails_open_and_recovers() {
        let (engine, clock) = engine(config(1, 1, 100));
        clock.set(10_000);
        engine.check_ip("10.0.0.1");

        clock.set(5_000);
        assert!(engine.check_ip("10.0.0.1").allowed, "skewed record fails open");
        // The record was restarted at the skewed time and counts normally again.
        assert!(!engine.check_ip("10.0.0.1").allowed);
    }
}
