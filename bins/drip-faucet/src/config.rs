//! Faucet configuration loaded from environment variables.

use std::net::IpAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use drip_limiter::{LimitRule, LimiterConfig};

#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server.
    pub bind_addr: String,
    /// Chain node JSON-RPC endpoint used to dispense funds.
    pub rpc_endpoint: String,
    /// JSON-RPC method called with `[address, amount]`.
    pub rpc_method: String,
    /// Amount to dispense per request, in the chain's smallest unit.
    pub amount: u64,
    /// Bearer token for `/api/admin/*`. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
    /// `X-Api-Key` values that skip admission control. Kept apart from the
    /// limiter's exempt IPs and wallets.
    pub api_keys: Vec<String>,
    /// Socket peers whose `X-Forwarded-For` / `X-Real-IP` headers are
    /// believed. Forwarded headers from anyone else are ignored.
    pub trusted_proxies: Vec<IpAddr>,
    /// Admission-control settings.
    pub limits: LimiterConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("FAUCET_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let rpc_endpoint =
            lookup("FAUCET_RPC_ENDPOINT").unwrap_or_else(|| "http://127.0.0.1:8545".to_string());

        let rpc_method = lookup("FAUCET_RPC_METHOD").unwrap_or_else(|| "fund_account".to_string());

        let amount: u64 = parse(&lookup, "FAUCET_AMOUNT", 100_000_000)?;
        anyhow::ensure!(amount > 0, "FAUCET_AMOUNT must be greater than zero");

        let admin_token = lookup("FAUCET_ADMIN_TOKEN").filter(|t| !t.trim().is_empty());

        let api_keys = list(&lookup, "FAUCET_API_KEYS");

        let trusted_proxies = list(&lookup, "FAUCET_TRUSTED_PROXIES")
            .iter()
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .with_context(|| format!("FAUCET_TRUSTED_PROXIES has an invalid IP: {raw:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let defaults = LimiterConfig::default();
        let limits = LimiterConfig {
            enabled: parse(&lookup, "FAUCET_RATE_LIMIT_ENABLED", defaults.enabled)?,
            ip: rule(&lookup, "IP", &defaults.ip)?,
            wallet: rule(&lookup, "WALLET", &defaults.wallet)?,
            global: rule(&lookup, "GLOBAL", &defaults.global)?,
            cleanup_interval_ms: parse(
                &lookup,
                "FAUCET_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_ms / 1000,
            )?
            .saturating_mul(1000),
            exempt: list(&lookup, "FAUCET_EXEMPT"),
        };

        Ok(Config {
            bind_addr,
            rpc_endpoint,
            rpc_method,
            amount,
            admin_token,
            api_keys,
            trusted_proxies,
            limits,
        })
    }
}

/// Read `FAUCET_<KIND>_MAX_REQUESTS` and `FAUCET_<KIND>_WINDOW_SECS`.
fn rule(lookup: &impl Fn(&str) -> Option<String>, kind: &str, default: &LimitRule) -> Result<LimitRule> {
    let max_requests = parse(
        lookup,
        &format!("FAUCET_{kind}_MAX_REQUESTS"),
        default.max_requests,
    )?;
    let window_secs: u64 = parse(
        lookup,
        &format!("FAUCET_{kind}_WINDOW_SECS"),
        default.window_ms / 1000,
    )?;
    Ok(LimitRule::new(max_requests, window_secs.saturating_mul(1000)))
}

/// Comma-separated list; blank entries are dropped.
fn list(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
    lookup(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
