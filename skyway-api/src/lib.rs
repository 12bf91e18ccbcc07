use axum::{
    routing::get,
    Router,
    http::Method,
    extract::{ConnectInfo, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use std::net::SocketAddr;

pub mod auth;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod sessions;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let sessions = sessions::routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::customer_auth_middleware,
    ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(auth::routes())
        .merge(sessions)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::circuit_breaker_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let redis = match &state.redis {
        Some(redis) => if redis.ping().await.is_ok() { "up" } else { "down" },
        None => "disabled",
    };
    Json(json!({
        "status": "ok",
        "active_sessions": state.coordinator.active_sessions().await,
        "redis": redis,
    }))
}

/// Fixed-window limit per client IP. Fails open when Redis is unavailable.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let (Some(redis), Some(ConnectInfo(addr))) =
        (&state.redis, req.extensions().get::<ConnectInfo<SocketAddr>>().cloned())
    else {
        return Ok(next.run(req).await);
    };

    let key = format!("ratelimit:{}", addr.ip());
    match redis.check_rate_limit(&key, state.rate_limit_per_minute, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((axum::http::StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")),
        Err(e) => {
            tracing::warn!("Rate limiter unavailable: {}", e);
            Ok(next.run(req).await)
        }
    }
}
