//! Error types for the admission-control core.
use thiserror::Error;

use crate::key::KeyKind;

/// Invalid limiter configuration. Only ever raised at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} limit: max_requests must be positive")] ZeroMaxRequests { kind: KeyKind },
    #[error("{kind} limit: window must be positive")] ZeroWindow { kind: KeyKind },
    #[error("cleanup interval must be positive")] ZeroCleanupInterval,
    #[error("blank entry at position {0} of the exempt list")] BlankExemption(usize),
}

/// Malformed tracking key input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("empty wallet address")] EmptyAddress,
    #[error("wallet address longer than 64 hex digits: {0}")] AddressTooLong(usize),
    #[error("invalid character in wallet address: {0:?}")] InvalidAddressChar(char),
    #[error("unknown key kind: {0}")] UnknownKind(String),
}

/// Internal inconsistency detected while evaluating a record.
///
/// Never surfaced to callers of the engine: the engine logs it and admits
/// the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("window starts in the future: window_start {window_start} > now {now}")] ClockSkew { window_start: u64, now: u64 },
    #[error("hit counter overflow")] CounterOverflow,
    #[error("record over limit but not blocked: hits {hits} > max {max}")] UnblockedOverLimit { hits: u32, max: u32 },
}
