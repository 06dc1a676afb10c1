//! Tracking keys and identifier canonicalization.
//!
//! Every counter in the store is addressed by a [`TrackingKey`]: a
//! [`KeyKind`] plus a normalized identifier. Wallet addresses are
//! canonicalized to `0x` followed by 64 lower-case hex digits so that
//! `0xAB`, `ab` and `0x00…ab` all share one counter.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Number of hex digits in a canonical wallet address.
pub const WALLET_HEX_DIGITS: usize = 64;

/// Identifier used for the singleton global counter.
pub const GLOBAL_KEY_ID: &str = "global";

/// The dimension a limit is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Client IP address.
    Ip,
    /// Destination wallet address.
    Wallet,
    /// The whole service.
    Global,
}

impl KeyKind {
    pub const ALL: [KeyKind; 3] = [KeyKind::Ip, KeyKind::Wallet, KeyKind::Global];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Ip => "ip",
            KeyKind::Wallet => "wallet",
            KeyKind::Global => "global",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(KeyKind::Ip),
            "wallet" => Ok(KeyKind::Wallet),
            "global" => Ok(KeyKind::Global),
            other => Err(KeyError::UnknownKind(other.to_string())),
        }
    }
}

/// A normalized key into the tracked-entry store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    kind: KeyKind,
    id: String,
}

impl TrackingKey {
    /// Key for a client IP. Unparseable input is kept verbatim (trimmed).
    pub fn ip(raw: &str) -> Self {
        Self {
            kind: KeyKind::Ip,
            id: canonical_ip(raw),
        }
    }

    /// Key for a wallet address, canonicalized.
    pub fn wallet(raw: &str) -> Result<Self, KeyError> {
        Ok(Self {
            kind: KeyKind::Wallet,
            id: canonical_wallet(raw)?,
        })
    }

    /// The singleton global key.
    pub fn global() -> Self {
        Self {
            kind: KeyKind::Global,
            id: GLOBAL_KEY_ID.to_string(),
        }
    }

    /// Build a key of the given kind from raw input.
    ///
    /// Wallet input that fails canonicalization falls back to its trimmed,
    /// lower-cased form so lookups stay total. The global kind ignores `raw`.
    pub fn new(kind: KeyKind, raw: &str) -> Self {
        match kind {
            KeyKind::Ip => Self::ip(raw),
            KeyKind::Wallet => Self::wallet(raw).unwrap_or_else(|_| Self {
                kind: KeyKind::Wallet,
                id: raw.trim().to_ascii_lowercase(),
            }),
            KeyKind::Global => Self::global(),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Canonicalize a wallet address to `0x` + 64 lower-case hex digits.
///
/// Accepts an optional `0x`/`0X` prefix and short addresses, which are
/// left-padded with zeros.
///
/// # Examples
///
/// ```
/// use drip_limiter::key::canonical_wallet;
/// let short = canonical_wallet("0xAB").unwrap();
/// assert_eq!(short.len(), 66);
/// assert!(short.ends_with("00ab"));
/// assert_eq!(canonical_wallet("ab").unwrap(), short);
/// ```
pub fn canonical_wallet(raw: &str) -> Result<String, KeyError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(KeyError::EmptyAddress);
    }
    if digits.len() > WALLET_HEX_DIGITS {
        return Err(KeyError::AddressTooLong(digits.len()));
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(KeyError::InvalidAddressChar(bad));
    }

    Ok(format!(
        "0x{:0>width$}",
        digits.to_ascii_lowercase(),
        width = WALLET_HEX_DIGITS
    ))
}

/// Normalize an IP address spelling. Unparseable input is returned trimmed.
pub fn canonical_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Normalize an identifier for the bypass set.
///
/// IPs and wallet addresses are canonicalized so an exemption matches every
/// spelling of the same address; anything else is kept verbatim.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return ip.to_string();
    }
    canonical_wallet(trimmed).unwrap_or_else(|_| trimmed.to_string())
}
