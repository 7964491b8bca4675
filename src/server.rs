// src/server.rs

//! Demo HTTP API served behind the rate-limit middleware.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::context::OpContext;
use crate::limiter::RateLimiter;
use crate::middleware::{api_token, client_ip, RateLimitLayer};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
struct AppState {
    limiter: Arc<RateLimiter>,
    request_timeout: Duration,
}

/// Routes of the demo API, all behind the rate limiter
pub fn router(limiter: Arc<RateLimiter>, request_timeout: Duration) -> Router {
    let state = AppState {
        limiter: Arc::clone(&limiter),
        request_timeout,
    };

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/api/data", post(data))
        .route("/api/info", get(info))
        .with_state(state)
        .layer(RateLimitLayer::new(limiter).with_timeout(request_timeout))
        .layer(middleware::from_fn(request_id))
}

/// Tags every response, rejections included, with a request id
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let mut response = next.run(request).await;
    if let Some(id) = id {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

async fn home() -> Json<Value> {
    Json(json!({
        "message": "Welcome to Rate Limiter API",
        "endpoints": [
            "GET /health - Health check",
            "GET /api/info - Get API information",
            "POST /api/data - Submit data",
        ],
        "usage": {
            "rate_limit_by_ip": "Requests are limited by IP address",
            "rate_limit_by_token": "Use API_KEY header to authenticate and get higher limits",
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn data(body: String) -> Response {
    match serde_json::from_str::<Value>(&body) {
        Ok(data) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Data received successfully",
                "data": data,
            })),
        )
            .into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    }
}

async fn info(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<Value> {
    let token = api_token(&headers);
    let remote = connect_info.map(|ConnectInfo(addr)| addr.to_string());
    let ip = client_ip(&headers, remote.as_deref());

    let ctx = OpContext::with_timeout(state.request_timeout);
    let remaining = match state.limiter.get_remaining_requests(&ctx, &ip, &token).await {
        Ok(remaining) => Some(remaining),
        Err(e) => {
            warn!("Could not read remaining requests: {}", e);
            None
        }
    };

    let mut response = json!({
        "message": "API Information",
        "version": env!("CARGO_PKG_VERSION"),
        "authenticated": !token.is_empty(),
        "remaining_requests": remaining,
    });
    if !token.is_empty() {
        response["token"] = Value::String(token);
    }

    Json(response)
}
