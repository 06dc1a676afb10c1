//! Window algorithms.
//!
//! The engine delegates all counting to a [`WindowAlgorithm`], so the
//! fixed-window counter below can be replaced (sliding window, token bucket)
//! without touching the store or the public API.
//!
//! [`FixedWindow`] counts hits from `window_start`. Once a key exceeds
//! `max_requests` it is blocked until the window ends. A burst straddling a
//! window boundary can therefore be admitted up to twice the limit.

use crate::clock::Timestamp;
use crate::config::LimitRule;
use crate::error::LimiterError;
use crate::store::TrackingRecord;

/// Allow/deny decision before it is tagged with a key kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: Timestamp,
}

/// Counting strategy applied to a single tracking record.
pub trait WindowAlgorithm: Send + Sync {
    /// Count one request against `record` and decide whether it may proceed.
    ///
    /// Runs under the record's lock. An `Err` means the record is in a state
    /// the algorithm cannot interpret.
    fn admit(
        &self,
        record: &mut TrackingRecord,
        rule: &LimitRule,
        now: Timestamp,
    ) -> Result<Decision, LimiterError>;

    /// What the next request would see, without counting anything.
    /// `None` means the key is untracked.
    fn project(&self, record: Option<&TrackingRecord>, rule: &LimitRule, now: Timestamp) -> Decision;

    /// Give back one request admitted in the window that began at
    /// `window_start`. A window that has since rolled over is left alone,
    /// and a block already placed on the key stays in force.
    fn release(&self, record: &mut TrackingRecord, window_start: Timestamp) {
        if record.window_start == window_start {
            record.hits = record.hits.saturating_sub(1);
        }
    }
}

/// Fixed-window counter with block-until-reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWindow;

impl WindowAlgorithm for FixedWindow {
    fn admit(
        &self,
        record: &mut TrackingRecord,
        rule: &LimitRule,
        now: Timestamp,
    ) -> Result<Decision, LimiterError> {
        if let Some(until) = record.blocked_until.filter(|until| now < *until) {
            return Ok(Decision {
                allowed: false,
                remaining: 0,
                reset_time: until,
            });
        }

        if record.window_start > now {
            return Err(LimiterError::ClockSkew {
                window_start: record.window_start,
                now,
            });
        }

        if now - record.window_start >= rule.window_ms {
            record.restart(now);
            return Ok(Decision {
                allowed: true,
                remaining: rule.max_requests.saturating_sub(1),
                reset_time: now.saturating_add(rule.window_ms),
            });
        }

        if record.hits > rule.max_requests {
            return Err(LimiterError::UnblockedOverLimit {
                hits: record.hits,
                max: rule.max_requests,
            });
        }

        record.hits = record
            .hits
            .checked_add(1)
            .ok_or(LimiterError::CounterOverflow)?;
        let window_end = record.window_start.saturating_add(rule.window_ms);

        if record.hits > rule.max_requests {
            record.blocked_until = Some(window_end);
            return Ok(Decision {
                allowed: false,
                remaining: 0,
                reset_time: window_end,
            });
        }

        Ok(Decision {
            allowed: true,
            remaining: rule.max_requests - record.hits,
            reset_time: window_end,
        })
    }

    fn project(&self, record: Option<&TrackingRecord>, rule: &LimitRule, now: Timestamp) -> Decision {
        let fresh = Decision {
            allowed: true,
            remaining: rule.max_requests,
            reset_time: now.saturating_add(rule.window_ms),
        };

        let Some(record) = record else {
            return fresh;
        };

        if let Some(until) = record.blocked_until.filter(|until| now < *until) {
            return Decision {
                allowed: false,
                remaining: 0,
                reset_time: until,
            };
        }

        if now.saturating_sub(record.window_start) >= rule.window_ms {
            return fresh;
        }

        let remaining = rule.max_requests.saturating_sub(record.hits);
        Decision {
            allowed: remaining > 0,
            remaining,
            reset_time: record.window_start.saturating_add(rule.window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000;

    fn admit(record: &mut TrackingRecord, rule: &LimitRule, now: u64) -> Decision {
        FixedWindow.admit(record, rule, now).unwrap()
    }

    /// One claim per hour: allowed, denied, allowed again after the window.
    #[test]
    fn single_claim_per_window() {
        let rule = LimitRule::new(1, HOUR);
        let mut record = TrackingRecord::new(0);

        let first = admit(&mut record, &rule, 0);
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = admit(&mut record, &rule, 1_000);
        assert!(!second.allowed);
        assert_eq!(second.reset_time, HOUR);
        assert_eq!(record.blocked_until, Some(HOUR));

        let third = admit(&mut record, &rule, HOUR + 1);
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(record.hits, 1);
        assert_eq!(record.blocked_until, None);
    }

    #[test]
    fn exactly_max_allowed_then_denied() {
        let rule = LimitRule::new(5, 1_000);
        let mut record = TrackingRecord::new(0);
        for i in 0..5 {
            let d = admit(&mut record, &rule, 10);
            assert!(d.allowed, "request {i} should be allowed");
            assert_eq!(d.remaining, 4 - i);
        }
        assert!(!admit(&mut record, &rule, 10).allowed);
    }

    #[test]
    fn blocked_requests_do_not_count() {
        let rule = LimitRule::new(1, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        admit(&mut record, &rule, 1);
        let hits = record.hits;
        for t in 2..50 {
            assert!(!admit(&mut record, &rule, t).allowed);
        }
        assert_eq!(record.hits, hits);
    }

    #[test]
    fn window_boundary_resets_at_exact_end() {
        let rule = LimitRule::new(1, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        assert!(!admit(&mut record, &rule, 999).allowed);
        assert!(admit(&mut record, &rule, 1_000).allowed);
    }

    /// Fixed windows admit up to twice the limit across a boundary.
    #[test]
    fn double_burst_across_boundary() {
        let rule = LimitRule::new(3, 1_000);
        let mut record = TrackingRecord::new(0);
        let late: usize = (0..3).filter(|_| admit(&mut record, &rule, 999).allowed).count();
        let early: usize = (0..3).filter(|_| admit(&mut record, &rule, 1_000).allowed).count();
        assert_eq!(late + early, 6);
    }

    #[test]
    fn clock_skew_is_reported() {
        let rule = LimitRule::new(3, 1_000);
        let mut record = TrackingRecord::new(500);
        assert_eq!(
            FixedWindow.admit(&mut record, &rule, 100),
            Err(LimiterError::ClockSkew { window_start: 500, now: 100 })
        );
    }

    #[test]
    fn over_limit_without_block_is_reported() {
        let rule = LimitRule::new(2, 1_000);
        let mut record = TrackingRecord::new(0);
        record.hits = 7;
        assert_eq!(
            FixedWindow.admit(&mut record, &rule, 10),
            Err(LimiterError::UnblockedOverLimit { hits: 7, max: 2 })
        );
    }

    #[test]
    fn project_does_not_mutate() {
        let rule = LimitRule::new(3, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        let before = record.clone();

        let view = FixedWindow.project(Some(&record), &rule, 10);
        assert_eq!(view.remaining, 2);
        assert_eq!(view.reset_time, 1_000);
        assert_eq!(record, before);
    }

    #[test]
    fn project_untracked_and_expired() {
        let rule = LimitRule::new(3, 1_000);
        let untracked = FixedWindow.project(None, &rule, 50);
        assert_eq!(untracked.remaining, 3);
        assert_eq!(untracked.reset_time, 1_050);

        let mut record = TrackingRecord::new(0);
        record.hits = 3;
        let expired = FixedWindow.project(Some(&record), &rule, 5_000);
        assert!(expired.allowed);
        assert_eq!(expired.remaining, 3);
    }

    #[test]
    fn project_blocked() {
        let rule = LimitRule::new(1, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        admit(&mut record, &rule, 1);
        let view = FixedWindow.project(Some(&record), &rule, 2);
        assert!(!view.allowed);
        assert_eq!(view.reset_time, 1_000);
    }

    #[test]
    fn release_gives_back_one_slot() {
        let rule = LimitRule::new(2, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        admit(&mut record, &rule, 10);
        FixedWindow.release(&mut record, 0);
        assert_eq!(record.hits, 1);
        assert!(admit(&mut record, &rule, 20).allowed);
    }

    #[test]
    fn release_ignores_rolled_over_window() {
        let rule = LimitRule::new(1, 1_000);
        let mut record = TrackingRecord::new(0);
        admit(&mut record, &rule, 0);
        admit(&mut record, &rule, 1_500);
        FixedWindow.release(&mut record, 0);
        assert_eq!(record.hits, 1);
        assert_eq!(record.window_start, 1_500);
    }
}
