//! HTTP API for the faucet

use crate::client_ip::client_identity;
use crate::dispatcher::{ClaimContext, ClaimRequest, ClaimResult, Dispatcher, FaucetInfo, NetworkList};
use crate::error::{FaucetError, FaucetResult};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error};

pub const CAPTCHA_HEADER: &str = "h-captcha-response";

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn router(dispatcher: Arc<Dispatcher>, cors_enabled: bool) -> Router {
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/claim", post(claim_handler))
        .route("/api/info", get(info_handler))
        .route("/api/networks", get(networks_handler))
        .route("/api/stats/:network", get(stats_handler))
        .route("/api/history/:network/:address", get(history_handler))
        .with_state(dispatcher);

    if cors_enabled {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

pub async fn claim_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return FaucetError::InvalidRequest(rejection.body_text()).into_response(),
    };

    let context = ClaimContext {
        client_identity: client_identity(&headers, peer, dispatcher.trusted_proxy_hops()),
        captcha_response: headers
            .get(CAPTCHA_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    debug!(client = %context.client_identity, address = %request.address, "Claim request");

    match dispatcher.claim(request, context).await {
        Ok(receipt) => Json(ClaimResult::from(receipt)).into_response(),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!(error = %e, "Claim failed");
            }
            e.into_response()
        }
    }
}

pub async fn info_handler(State(dispatcher): State<Arc<Dispatcher>>) -> Json<FaucetInfo> {
    Json(dispatcher.info().await)
}

pub async fn networks_handler(State(dispatcher): State<Arc<Dispatcher>>) -> Json<NetworkList> {
    Json(dispatcher.networks())
}

pub async fn stats_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(network): Path<String>,
) -> FaucetResult<impl IntoResponse> {
    let stats = dispatcher.statistics(&network)?;
    Ok(Json(SuccessResponse::new(stats)))
}

pub async fn history_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path((network, address)): Path<(String, String)>,
) -> FaucetResult<impl IntoResponse> {
    let records = dispatcher.history(&network, &address)?;
    Ok(Json(SuccessResponse::new(records)))
}

pub async fn metrics_handler(State(dispatcher): State<Arc<Dispatcher>>) -> Response {
    let text = match dispatcher.metrics().map(|m| m.gather()).transpose() {
        Ok(text) => text.unwrap_or_default(),
        Err(e) => return FaucetError::Internal(e.to_string()).into_response(),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response()
}

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "multifaucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-network EVM faucet",
        "endpoints": {
            "POST /api/claim": "Request a payout",
            "GET /api/info": "Configured pools and network catalog",
            "GET /api/networks": "Configured network names",
            "GET /api/stats/:network": "Distribution statistics",
            "GET /api/history/:network/:address": "Distributions to one address",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
