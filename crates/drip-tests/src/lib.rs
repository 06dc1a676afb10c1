//! Adversarial test suite for the Drip faucet admission engine.
//!
//! This crate contains integration tests that try to get more requests
//! through than the configured limits allow, from an abuser's perspective.

pub mod helpers;
