use axum::{
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    /// Failing fast
    Open,
    /// One trial request decides between Closed and Open
    HalfOpen,
}

#[derive(Debug)]
struct Window {
    state: CircuitState,
    failures: usize,
    opened_at: Option<Instant>,
}

/// Consecutive-failure breaker in front of the booking API.
pub struct CircuitBreaker {
    pub name: String,
    failure_threshold: usize,
    reset_timeout: Duration,
    window: RwLock<Window>,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: threshold,
            reset_timeout: timeout,
            window: RwLock::new(Window { state: CircuitState::Closed, failures: 0, opened_at: None }),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.window.read().await.state
    }

    /// Whether a request may go through now. While half-open only the first
    /// caller is admitted until its outcome is recorded.
    pub async fn allow(&self) -> bool {
        let mut window = self.window.write().await;
        match window.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = window.opened_at.is_some_and(|at| at.elapsed() >= self.reset_timeout);
                if !cooled {
                    return false;
                }
                window.state = CircuitState::HalfOpen;
                tracing::info!("Circuit breaker [{}] half-open, admitting one trial request", self.name);
                self.trial_in_flight.store(true, Ordering::SeqCst);
                true
            }
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }

    pub async fn record_success(&self) {
        let mut window = self.window.write().await;
        if window.state == CircuitState::HalfOpen {
            tracing::info!("Circuit breaker [{}] closed again", self.name);
        }
        window.state = CircuitState::Closed;
        window.failures = 0;
        window.opened_at = None;
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let mut window = self.window.write().await;
        window.failures += 1;
        if window.state == CircuitState::HalfOpen || window.failures >= self.failure_threshold {
            if window.state != CircuitState::Open {
                tracing::error!("Circuit breaker [{}] opened after {} failures", self.name, window.failures);
            }
            window.state = CircuitState::Open;
            window.opened_at = Some(Instant::now());
        }
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

/// Routes whose handler talks to the booking API. Reads, cancel and payment
/// reopen stay local and must keep working while the upstream is down.
fn reaches_gateway(method: &Method, path: &str) -> bool {
    let Some(rest) = path.strip_prefix("/v1/sessions") else {
        return false;
    };
    if rest.is_empty() || rest == "/" {
        return method == Method::POST;
    }
    match rest.rsplit('/').next() {
        Some("advance") | Some("lookups") => method == Method::POST,
        Some("booking") => method == Method::GET,
        _ => false,
    }
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    if !reaches_gateway(req.method(), req.uri().path()) {
        return next.run(req).await.into_response();
    }

    let cb = &state.resiliency.gateway_cb;
    if !cb.allow().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "error": format!("Circuit breaker [{}] is open", cb.name),
                "code": "CIRCUIT_OPEN",
            })),
        )
            .into_response();
    }

    let response = next.run(req).await;
    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }
    response.into_response()
}
