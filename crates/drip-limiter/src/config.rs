//! Admission policy configuration.
//!
//! Loaded once by the host process and validated when the engine is built.
//! Nothing here is consulted for validity on the request path.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::key::KeyKind;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Requests allowed per fixed window for one key kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl LimitRule {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    fn validate(&self, kind: KeyKind) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroMaxRequests { kind });
        }
        if self.window_ms == 0 {
            return Err(ConfigError::ZeroWindow { kind });
        }
        Ok(())
    }
}

/// Configuration for the whole admission-control core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Master switch. When `false` every check allows without tracking.
    pub enabled: bool,
    /// Per client IP.
    pub ip: LimitRule,
    /// Per destination wallet.
    pub wallet: LimitRule,
    /// Across the whole service.
    pub global: LimitRule,
    /// How often the eviction sweep runs.
    pub cleanup_interval_ms: u64,
    /// Client IPs and wallet addresses exempt from every check.
    pub exempt: Vec<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip: LimitRule::new(50, 15 * MINUTE_MS),
            wallet: LimitRule::new(1, HOUR_MS),
            global: LimitRule::new(1000, HOUR_MS),
            cleanup_interval_ms: 5 * MINUTE_MS,
            exempt: Vec::new(),
        }
    }
}

impl LimiterConfig {
    /// Reject non-positive limits, windows and intervals, and blank exemptions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in KeyKind::ALL {
            self.rule(kind).validate(kind)?;
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        if let Some(pos) = self.exempt.iter().position(|e| e.trim().is_empty()) {
            return Err(ConfigError::BlankExemption(pos));
        }
        Ok(())
    }

    pub fn rule(&self, kind: KeyKind) -> &LimitRule {
        match kind {
            KeyKind::Ip => &self.ip,
            KeyKind::Wallet => &self.wallet,
            KeyKind::Global => &self.global,
        }
    }

    /// Longest window across all kinds; records idle longer than this are evicted.
    pub fn max_window_ms(&self) -> u64 {
        KeyKind::ALL
            .iter()
            .map(|k| self.rule(*k).window_ms)
            .max()
            .unwrap_or(0)
    }
}
