//! HTTP API for faucet service

use crate::error::{FaucetError, FaucetResult};
use crate::service::{FaucetService, FaucetStatus};
use crate::throttle::RequestThrottle;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use drip_common::Address;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaucetService>,
    pub throttle: Arc<RequestThrottle>,
}

impl AppState {
    pub fn new(service: Arc<FaucetService>) -> Self {
        let throttle = RequestThrottle::new(&service.config().throttle);
        Self {
            service,
            throttle: Arc::new(throttle),
        }
    }
}

/// Dispense request
#[derive(Debug, Deserialize)]
pub struct DispenseRequest {
    pub address: Option<String>,
}

/// Dispense success body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseResponse {
    pub success: bool,
    pub message: String,
    pub tx_hash: String,
    pub amount: String,
    pub network: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: FaucetStatus,
}

/// Routes plus CORS, body-size and tracing layers
pub fn router(state: AppState) -> Router {
    let config = state.service.config();

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/faucet/status", get(status_handler))
        .route("/api/faucet/send", post(dispense_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        app = app.layer(cors_layer(&config.allowed_origins));
        info!("CORS enabled");
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// The socket peer, unless proxy headers are trusted, in which case the
/// first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let peer_ip = || {
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    };
    if !trust_proxy {
        return peer_ip();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded.or(real_ip).map(str::to_string).unwrap_or_else(peer_ip)
}

/// Throttle wait in whole minutes, rounded up and never zero.
fn retry_minutes(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis().div_ceil(60_000))
        .unwrap_or(u64::MAX)
        .max(1)
}

/// Dispense handler
pub async fn dispense_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<DispenseRequest>, JsonRejection>,
) -> FaucetResult<Json<DispenseResponse>> {
    let ip = client_ip(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.service.config().trust_proxy_headers,
    );

    if let Err(wait) = state.throttle.check(&ip) {
        warn!(ip = %ip, "Transport throttle exceeded");
        return Err(FaucetError::RateLimitDenied {
            message: "Too many requests from this IP, please try again later.".to_string(),
            retry_after: retry_minutes(wait),
        });
    }

    let Json(request) = body.map_err(|e| FaucetError::Validation(e.body_text()))?;
    let address = parse_address(request.address.as_deref(), &state.service, &ip)?;

    info!(address = %address, ip = %ip, "Faucet request received");

    let result = state.service.dispense(&address, &ip).await;

    if result.success {
        let amount = result.amount.unwrap_or_default();
        return Ok(Json(DispenseResponse {
            success: true,
            message: format!("{} has been sent to your address", amount),
            tx_hash: result.tx_hash.unwrap_or_default(),
            amount,
            network: state.service.config().network_name.clone(),
        }));
    }

    let message = result
        .error
        .clone()
        .unwrap_or_else(|| "Transaction failed".to_string());
    match result.retry_after {
        Some(retry_after) if result.is_rate_limited() => {
            Err(FaucetError::RateLimitDenied { message, retry_after })
        }
        _ => {
            error!(address = %address, error = %message, ip = %ip, "Faucet transaction failed");
            Err(FaucetError::TransactionFailed(message))
        }
    }
}

fn parse_address(raw: Option<&str>, service: &FaucetService, ip: &str) -> FaucetResult<Address> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(FaucetError::Validation("Address is required".to_string()));
    }

    let address: Address = raw.parse().map_err(|_| {
        warn!(address = %raw, ip = %ip, "Invalid address format");
        FaucetError::Validation("Invalid Ethereum address format".to_string())
    })?;

    if address.is_zero() {
        return Err(FaucetError::Validation("Zero address not allowed".to_string()));
    }
    if address == service.faucet_address() {
        return Err(FaucetError::Validation("Cannot send to faucet address".to_string()));
    }
    Ok(address)
}

/// Status handler
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: state.service.status(),
    })
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "Drip Faucet"
    }))
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.metrics().render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            FaucetError::Internal(e.to_string()).into_response()
        }
    }
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Drip Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Abuse-resistant testnet faucet",
        "endpoints": {
            "POST /api/faucet/send": "Request tokens",
            "GET /api/faucet/status": "Get faucet status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
