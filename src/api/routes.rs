//! API Routes
//!
//! Configures the Axum router with the monitoring endpoints and the
//! rate-limit middleware guarding them.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    flush_handler, health_handler, invalidate_handler, metrics_handler, stats_handler, AppState,
};
use crate::models::ErrorResponse;
use crate::ratelimit::{client_key, RateLimitDecision, UNKNOWN_CLIENT};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Connection state, never rate limited
/// - `GET /stats` - Store summary and cache metrics
/// - `GET /metrics` - Cache metrics only
/// - `POST /admin/flush` - Remove every key on every master
/// - `DELETE /admin/cache/:prefix/:pattern` - Pattern invalidation
///
/// # Middleware
/// - Rate limiting per route and client address. `X-Forwarded-For` is
///   only honoured when the limiter is configured to trust the proxy.
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limited = Router::new()
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admin/flush", post(flush_handler))
        .route("/admin/cache/:prefix/:pattern", delete(invalidate_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_handler))
        .merge(limited)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// == Rate Limit Middleware ==
/// Counts the request against its route's budget and rejects it with 429
/// once the budget is spent.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let limiter = state
        .rate_limiter
        .for_route(request.method().as_str(), &route);
    let client = client_address(&request, state.rate_limiter.trust_proxy());

    match limiter.check(&client_key(&client)).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new("Too many requests, please try again later")),
            )
                .into_response();
            apply_headers(response.headers_mut(), &decision);
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(reset_secs(&decision)),
            );
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Peer address of the request. With `trust_proxy` the first
/// `X-Forwarded-For` hop wins.
fn client_address(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn reset_secs(decision: &RateLimitDecision) -> u64 {
    decision.reset_after_ms.div_ceil(1000)
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if decision.skipped {
        return;
    }
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset_secs(decision)));
}
