use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use skyway_core::session::{BookingSession, CallOutcome};

use crate::{error::AppError, state::AppState};

pub struct Metrics {
    registry: Registry,
    pub sessions_created: IntCounter,
    /// By step and outcome (ok or error code)
    pub advances: IntCounterVec,
    pub advance_duration: HistogramVec,
    /// By endpoint and result kind
    pub gateway_calls: IntCounterVec,
    pub events_relayed: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sessions_created = IntCounter::new("skyway_sessions_created_total", "Booking sessions created")?;
        let advances = IntCounterVec::new(
            Opts::new("skyway_advances_total", "Step advance requests by step and outcome"),
            &["step", "outcome"],
        )?;
        let advance_duration = HistogramVec::new(
            HistogramOpts::new("skyway_advance_duration_seconds", "Step advance latency including retries")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["step"],
        )?;
        let gateway_calls = IntCounterVec::new(
            Opts::new("skyway_gateway_calls_total", "Remote booking API attempts by endpoint and result"),
            &["endpoint", "result"],
        )?;
        let events_relayed = IntCounterVec::new(
            Opts::new("skyway_events_relayed_total", "Session events relayed to Kafka"),
            &["result"],
        )?;

        registry.register(Box::new(sessions_created.clone()))?;
        registry.register(Box::new(advances.clone()))?;
        registry.register(Box::new(advance_duration.clone()))?;
        registry.register(Box::new(gateway_calls.clone()))?;
        registry.register(Box::new(events_relayed.clone()))?;

        Ok(Self { registry, sessions_created, advances, advance_duration, gateway_calls, events_relayed })
    }

    /// Count the gateway attempts a session made since `since`.
    pub fn observe_calls(&self, session: &BookingSession, since: chrono::DateTime<chrono::Utc>) {
        for record in session.history.iter().filter(|r| r.started_at >= since) {
            let result = match &record.outcome {
                CallOutcome::Ok { .. } => "ok",
                CallOutcome::Err { kind, .. } => kind.as_str(),
            };
            self.gateway_calls.with_label_values(&[record.endpoint.as_str(), result]).inc();
        }
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::InternalServerError(format!("Metrics encoding failed: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
