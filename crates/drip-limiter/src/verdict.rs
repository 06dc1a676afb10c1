//! Admission outcomes.

use serde::Serialize;

use crate::clock::Timestamp;
use crate::config::LimitRule;
use crate::key::KeyKind;

/// Outcome of a single-dimension check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub kind: KeyKind,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window (or block) ends, in ms since the epoch.
    pub reset_time: Timestamp,
}

impl Verdict {
    /// An allow that consumed nothing: used when limiting is off or the
    /// caller is exempt.
    pub fn unrestricted(kind: KeyKind, rule: &LimitRule, now: Timestamp) -> Self {
        Self {
            kind,
            allowed: true,
            limit: rule.max_requests,
            remaining: rule.max_requests,
            reset_time: now.saturating_add(rule.window_ms),
        }
    }

    /// Whole seconds until `reset_time`, rounded up. At least 1 when denied.
    pub fn retry_after_secs(&self, now: Timestamp) -> u64 {
        let secs = self.reset_time.saturating_sub(now).div_ceil(1000);
        if self.allowed { secs } else { secs.max(1) }
    }

    /// `reset_time` as Unix seconds, rounded up.
    pub fn reset_secs(&self) -> u64 {
        self.reset_time.div_ceil(1000)
    }
}

/// Composite outcome of [`AdmissionEngine::check_all`](crate::AdmissionEngine::check_all).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// The aggregate verdict.
    pub verdict: Verdict,
    /// Every check that ran, in evaluation order (global, ip, wallet).
    pub checks: Vec<Verdict>,
    /// The caller matched the bypass set; no check ran.
    pub exempt: bool,
}

impl Admission {
    /// Aggregate a non-empty list of checks.
    ///
    /// A request is allowed only if every check allowed. On deny the
    /// aggregate is the denied check that resets last; on allow it is the
    /// check with the fewest remaining requests.
    pub fn from_checks(checks: Vec<Verdict>, fallback: Verdict) -> Self {
        let denied = checks
            .iter()
            .filter(|v| !v.allowed)
            .max_by_key(|v| v.reset_time);

        let verdict = match denied {
            Some(v) => *v,
            None => checks
                .iter()
                .min_by(|a, b| {
                    a.remaining
                        .cmp(&b.remaining)
                        .then(b.reset_time.cmp(&a.reset_time))
                })
                .copied()
                .unwrap_or(fallback),
        };

        Self {
            verdict,
            checks,
            exempt: false,
        }
    }

    pub fn exempt(verdict: Verdict) -> Self {
        Self {
            verdict,
            checks: Vec::new(),
            exempt: true,
        }
    }

    pub fn allowed(&self) -> bool {
        self.verdict.allowed
    }

    /// The check for one dimension, if it ran.
    pub fn check(&self, kind: KeyKind) -> Option<&Verdict> {
        self.checks.iter().find(|v| v.kind == kind)
    }
}

/// Read-only projection of a key's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitStatus {
    pub kind: KeyKind,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: Timestamp,
    /// The next request for this key would be denied.
    pub blocked: bool,
}
