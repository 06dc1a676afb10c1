//! # drip-limiter
//! In-memory admission control for the Drip testnet faucet.
//!
//! Tracks independent fixed-window counters per client IP, per destination
//! wallet and for the service as a whole. State is process-local and is lost
//! on restart.
//!
//! - [`store::EntryStore`] — concurrent map of tracking records
//! - [`window::WindowAlgorithm`] — counting strategy ([`window::FixedWindow`])
//! - [`AdmissionEngine`] — checks, reset, bypass and status queries
//! - [`sweeper::spawn_sweeper`] — background eviction of idle records

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod store;
pub mod sweeper;
pub mod verdict;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{LimitRule, LimiterConfig};
pub use engine::{AdmissionEngine, EngineStats};
pub use error::{ConfigError, KeyError, LimiterError};
pub use key::{KeyKind, TrackingKey};
pub use sweeper::spawn_sweeper;
pub use verdict::{Admission, LimitStatus, Verdict};
