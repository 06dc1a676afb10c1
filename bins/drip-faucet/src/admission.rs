//! Glue between axum and the admission engine: client identification,
//! rate-limit headers and the 429 response.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use drip_limiter::{Admission, KeyKind, Timestamp};
use serde_json::json;
use tracing::warn;

use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";

/// Per-dimension `[limit, remaining, reset]` header names.
fn dimension_headers(kind: KeyKind) -> [&'static str; 3] {
    match kind {
        KeyKind::Ip => [
            "x-ratelimit-ip-limit",
            "x-ratelimit-ip-remaining",
            "x-ratelimit-ip-reset",
        ],
        KeyKind::Wallet => [
            "x-ratelimit-wallet-limit",
            "x-ratelimit-wallet-remaining",
            "x-ratelimit-wallet-reset",
        ],
        KeyKind::Global => [
            "x-ratelimit-global-limit",
            "x-ratelimit-global-remaining",
            "x-ratelimit-global-reset",
        ],
    }
}

/// Client IP of the request.
///
/// Forwarded headers are only believed when the socket peer is one of
/// `trusted` proxies. `X-Forwarded-For` is walked right to left past the
/// trusted hops, so entries a client prepends itself are never used.
/// Without a trusted peer the socket address is the client.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    let peer = peer.map(|p| p.ip());
    let forwarded = peer
        .filter(|ip| trusted.contains(ip))
        .and_then(|_| forwarded_client(headers, trusted));

    forwarded
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        .to_string()
}

fn forwarded_client(headers: &HeaderMap, trusted: &[IpAddr]) -> Option<IpAddr> {
    if let Some(chain) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let mut nearest = None;
        for hop in chain.rsplit(',') {
            let Ok(ip) = hop.trim().parse::<IpAddr>() else {
                break;
            };
            if !trusted.contains(&ip) {
                return Some(ip);
            }
            nearest = Some(ip);
        }
        return nearest;
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Whether the request carries one of the configured `X-Api-Key` values.
pub fn has_exempt_credential(headers: &HeaderMap, state: &AppState) -> bool {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .is_some_and(|key| state.config.api_keys.iter().any(|k| k == key))
}

/// Write the aggregate and per-dimension rate-limit headers.
pub fn apply_headers(headers: &mut HeaderMap, admission: &Admission) {
    if admission.exempt {
        return;
    }
    let v = &admission.verdict;
    headers.insert(LIMIT, HeaderValue::from(v.limit));
    headers.insert(REMAINING, HeaderValue::from(v.remaining));
    headers.insert(RESET, HeaderValue::from(v.reset_secs()));

    for check in &admission.checks {
        let [limit, remaining, reset] = dimension_headers(check.kind);
        headers.insert(limit, HeaderValue::from(check.limit));
        headers.insert(remaining, HeaderValue::from(check.remaining));
        headers.insert(reset, HeaderValue::from(check.reset_secs()));
    }
}

/// 429 response for a denied admission.
pub fn too_many_requests(admission: &Admission, now: Timestamp) -> Response {
    let v = &admission.verdict;
    let retry_after = v.retry_after_secs(now);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": format!("Rate limit exceeded ({}). Try again in {retry_after}s.", v.kind),
            "retry_after": retry_after,
            "limit": v.limit,
            "remaining": v.remaining,
            "reset": v.reset_secs(),
            "dimension": v.kind,
        })),
    )
        .into_response();

    apply_headers(response.headers_mut(), admission);
    response
        .headers_mut()
        .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Per-IP admission for every route except the faucet itself, which runs
/// the composite check in its handler.
pub async fn ip_admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if has_exempt_credential(request.headers(), &state) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer, &state.config.trusted_proxies);
    if state.engine.is_bypassed(&ip) {
        return next.run(request).await;
    }

    let verdict = state.engine.check_ip(&ip);
    let admission = Admission::from_checks(vec![verdict], verdict);

    if !admission.allowed() {
        warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
        return too_many_requests(&admission, state.engine.now_ms());
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &admission);
    response
}
