//! Axum router and HTTP handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use drip_limiter::key::canonical_wallet;
use drip_limiter::KeyKind;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::admission::{apply_headers, client_ip, has_exempt_credential, ip_admission, too_many_requests};
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Everything except the faucet is admitted per IP by middleware; the
    // faucet handler runs the composite check itself once it knows the wallet.
    let ip_limited = Router::new()
        .route("/api/status", get(api_status))
        .route("/api/limits", get(api_limits))
        .route("/api/admin/stats", get(admin_stats))
        .route("/api/admin/limits", delete(admin_reset_all))
        .route(
            "/api/admin/limits/:kind/:key",
            get(admin_limit_status).delete(admin_reset_limit),
        )
        .route("/api/admin/bypass", post(admin_bypass))
        .route("/api/admin/bypass/:key", delete(admin_unbypass))
        .route_layer(middleware::from_fn_with_state(state.clone(), ip_admission));

    Router::new()
        .route("/api/faucet", post(api_faucet))
        .merge(ip_limited)
        .with_state(state)
        .layer(cors)
}

// ---------------------------------------------------------------------------
// Faucet
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FaucetRequest {
    address: String,
}

/// `POST /api/faucet` — dispense funds to the requested address.
async fn api_faucet(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<FaucetRequest>,
) -> Response {
    let ip = client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        &state.config.trusted_proxies,
    );

    let address = match canonical_wallet(&req.address) {
        Ok(a) => a,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Invalid wallet address: {e}")})),
            )
                .into_response();
        }
    };

    let admission = if has_exempt_credential(&headers, &state) {
        None
    } else {
        let admission = state.engine.check_all(&ip, Some(&address));
        if !admission.allowed() {
            warn!(
                %ip,
                %address,
                dimension = %admission.verdict.kind,
                "Faucet request rate limited"
            );
            return too_many_requests(&admission, state.engine.now_ms());
        }
        Some(admission)
    };

    info!(%address, %ip, "Faucet request");

    // The wallet's claim is spent at admission; a failed send does not refund it.
    let mut response = match state.dispenser.dispense(&address, state.config.amount).await {
        Ok(txid) => {
            info!(%txid, %address, "Faucet sent");
            (
                StatusCode::OK,
                Json(json!({
                    "txid": txid,
                    "amount": state.config.amount,
                    "address": address,
                })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, %address, "Faucet send failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    };

    if let Some(admission) = &admission {
        apply_headers(response.headers_mut(), admission);
    }
    response
}

/// `GET /api/status` — faucet settings and limiter occupancy.
async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let limits = state.engine.config();
    (
        StatusCode::OK,
        Json(json!({
            "amount_per_claim": state.config.amount,
            "rate_limit": {
                "enabled": limits.enabled,
                "ip": limits.ip,
                "wallet": limits.wallet,
                "global": limits.global,
                "cleanup_interval_ms": limits.cleanup_interval_ms,
            },
            "stats": state.engine.stats(),
        })),
    )
}

#[derive(Deserialize)]
struct LimitsQuery {
    address: Option<String>,
}

/// `GET /api/limits` — the caller's remaining allowance, without spending any.
async fn api_limits(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<LimitsQuery>,
) -> impl IntoResponse {
    let ip = client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        &state.config.trusted_proxies,
    );
    let wallet = query
        .address
        .as_deref()
        .map(|a| state.engine.status_of(a, KeyKind::Wallet));

    (
        StatusCode::OK,
        Json(json!({
            "ip": state.engine.status_of(&ip, KeyKind::Ip),
            "global": state.engine.status_of("", KeyKind::Global),
            "wallet": wallet,
        })),
    )
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// Check `Authorization: Bearer <token>` against the configured admin token.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Admin API not configured"})),
        )
            .into_response());
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim);

    if presented == Some(expected) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response())
    }
}

fn parse_kind(raw: &str) -> Result<KeyKind, Response> {
    raw.parse::<KeyKind>().map_err(|e| {
        (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
    })
}

/// `GET /api/admin/stats`
async fn admin_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    (StatusCode::OK, Json(json!(state.engine.stats()))).into_response()
}

/// `GET /api/admin/limits/:kind/:key` — read-only status of one key.
async fn admin_limit_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, key)): Path<(String, String)>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(bad) => return bad,
    };
    (StatusCode::OK, Json(json!(state.engine.status_of(&key, kind)))).into_response()
}

/// `DELETE /api/admin/limits/:kind/:key` — forget one key's counter.
async fn admin_reset_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((kind, key)): Path<(String, String)>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let kind = match parse_kind(&kind) {
        Ok(k) => k,
        Err(bad) => return bad,
    };
    let removed = state.engine.reset(&key, kind);
    (
        StatusCode::OK,
        Json(json!({"kind": kind, "key": key, "removed": removed})),
    )
        .into_response()
}

/// `DELETE /api/admin/limits` — forget every counter.
async fn admin_reset_all(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let cleared = state.engine.reset_all();
    (StatusCode::OK, Json(json!({"cleared": cleared}))).into_response()
}

#[derive(Deserialize)]
struct BypassRequest {
    key: String,
}

/// `POST /api/admin/bypass` — exempt an IP, wallet or API key.
async fn admin_bypass(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BypassRequest>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let key = req.key.trim();
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "key must not be empty"})))
            .into_response();
    }
    state.engine.bypass(key);
    (StatusCode::OK, Json(json!({"bypassed": key}))).into_response()
}

/// `DELETE /api/admin/bypass/:key` — revoke an exemption.
async fn admin_unbypass(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let removed = state.engine.unbypass(&key);
    (StatusCode::OK, Json(json!({"key": key, "removed": removed}))).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
