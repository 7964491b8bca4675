// src/middleware.rs

//! Tower middleware that puts a [`RateLimiter`] in front of any axum service.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::context::OpContext;
use crate::limiter::RateLimiter;

/// Header carrying the caller's token
pub const API_KEY_HEADER: &str = "API_KEY";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
pub const REAL_IP_HEADER: &str = "X-Real-IP";

pub const RATE_LIMIT_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Layer producing [`RateLimitService`]
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds the storage work done for a single request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            timeout: self.timeout,
        }
    }
}

/// Wraps `inner` so that every request is admitted by `limiter` first
pub fn rate_limited<S>(limiter: Arc<RateLimiter>, inner: S) -> RateLimitService<S> {
    RateLimitLayer::new(limiter).layer(inner)
}

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // the clone may not be ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.timeout;

        Box::pin(async move {
            let token = api_token(request.headers());
            let remote = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string());
            if remote.is_none() {
                warn_missing_connect_info();
            }
            let ip = client_ip(request.headers(), remote.as_deref());

            let ctx = OpContext::with_timeout(timeout);
            match limiter.check_limit(&ctx, &ip, &token).await {
                Ok(true) => inner.call(request).await,
                Ok(false) => {
                    warn!(ip = ip.as_str(), has_token = !token.is_empty(), "Rate limit exceeded");
                    Ok(too_many_requests())
                }
                Err(e) => {
                    error!(ip = ip.as_str(), "Rate limit check failed: {}", e);
                    Ok(internal_error())
                }
            }
        })
    }
}

static MISSING_CONNECT_INFO: Once = Once::new();

// Without ConnectInfo every caller lacking proxy headers shares one bucket
fn warn_missing_connect_info() {
    MISSING_CONNECT_INFO.call_once(|| {
        warn!(
            "Request has no ConnectInfo; callers without forwarding headers are limited as \"unknown\". \
             Serve with into_make_service_with_connect_info::<SocketAddr>()"
        );
    });
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Token presented in the `API_KEY` header, or an empty string
pub fn api_token(headers: &HeaderMap) -> String {
    header_str(headers, API_KEY_HEADER)
        .unwrap_or_default()
        .to_string()
}

/// Caller IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// connection's remote address without its port.
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<&str>) -> String {
    if let Some(first) = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header_str(headers, REAL_IP_HEADER) {
        return real_ip.to_string();
    }

    match remote_addr {
        Some(addr) => strip_port(addr),
        None => "unknown".to_string(),
    }
}

/// `10.0.0.5:54321` -> `10.0.0.5`, `[::1]:80` -> `::1`
pub fn strip_port(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    if addr.parse::<IpAddr>().is_ok() {
        return addr.to_string();
    }
    match addr.rfind(':') {
        Some(idx) => addr[..idx].to_string(),
        None => addr.to_string(),
    }
}

/// 429 with the fixed JSON message
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({ "message": RATE_LIMIT_MESSAGE })),
    )
        .into_response()
}

pub fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
