use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use skyway_booking::LookupKind;
use skyway_core::gateway::{GatewayError, GatewayResponse, RetrieveResponse};
use skyway_core::search::{FlightOffer, SearchParameters};
use skyway_core::session::{BookingSession, ItineraryRef, RemoteCallRecord, SessionStatus, Ticketing, TripSelection};
use skyway_core::step::AdvanceRequest;
use skyway_core::Step;
use std::convert::Infallible;
use std::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};

/// Session as returned to clients. The remote credential never leaves the
/// service.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub status: SessionStatus,
    pub step: Option<Step>,
    pub next_step: Option<Step>,
    pub version: u64,
    pub tui: Option<String>,
    pub params: SearchParameters,
    pub results: Vec<FlightOffer>,
    pub selection: Option<TripSelection>,
    pub itinerary: Option<ItineraryRef>,
    pub transaction_id: Option<String>,
    pub ticketing: Option<Ticketing>,
    pub failed_step: Option<Step>,
    pub last_error: Option<GatewayError>,
    pub in_flight: bool,
    pub history: Vec<RemoteCallRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&BookingSession> for SessionView {
    fn from(s: &BookingSession) -> Self {
        Self {
            id: s.id,
            status: s.status,
            step: s.step,
            next_step: skyway_core::validator::next_step(s),
            version: s.version,
            tui: s.tui.clone(),
            params: s.params.clone(),
            results: s.results.clone(),
            selection: s.selection.clone(),
            itinerary: s.itinerary.clone(),
            transaction_id: s.transaction_id.clone(),
            ticketing: s.ticketing.clone(),
            failed_step: s.failed_step,
            last_error: s.last_error.clone(),
            in_flight: s.in_flight.is_some(),
            history: s.history.clone(),
            created_at: s.created_at,
            updated_at: s.updated_at,
            expires_at: s.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub kind: LookupKind,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{id}", get(get_session))
        .route("/v1/sessions/{id}/advance", post(advance_session))
        .route("/v1/sessions/{id}/cancel", post(cancel_session))
        .route("/v1/sessions/{id}/payment/retry", post(retry_payment))
        .route("/v1/sessions/{id}/lookups", post(lookup))
        .route("/v1/sessions/{id}/booking", get(retrieve_booking))
        .route("/v1/sessions/{id}/stream", get(stream_session))
}

/// Load a session and make sure the caller owns it.
async fn owned_session(state: &AppState, id: Uuid, claims: &CustomerClaims) -> Result<BookingSession, AppError> {
    let session = state.coordinator.get_session(id).await?;
    if session.owner.as_deref() != Some(claims.sub.as_str()) {
        return Err(AppError::AuthorizationError("Session belongs to another customer".to_string()));
    }
    Ok(session)
}

/// POST /v1/sessions
async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(params): Json<SearchParameters>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.coordinator.create_session(params, Some(claims.sub.clone())).await?;
    state.metrics.sessions_created.inc();
    info!("Session {} opened for {}", session.id, claims.sub);
    Ok(Json(SessionView::from(&session)))
}

/// GET /v1/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = owned_session(&state, id, &claims).await?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /v1/sessions/{id}/advance
async fn advance_session(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<SessionView>, AppError> {
    owned_session(&state, id, &claims).await?;

    let step = req.step.to_string();
    let since = Utc::now();
    let started = Instant::now();
    let result = state.coordinator.advance(id, req).await;
    state
        .metrics
        .advance_duration
        .with_label_values(&[step.as_str()])
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(session) => {
            state.metrics.advances.with_label_values(&[step.as_str(), "ok"]).inc();
            state.metrics.observe_calls(&session, since);
            Ok(Json(SessionView::from(&session)))
        }
        Err(failure) => {
            state.metrics.advances.with_label_values(&[step.as_str(), failure.error.code()]).inc();
            if let Some(session) = &failure.session {
                state.metrics.observe_calls(session, since);
            }
            Err(failure.into())
        }
    }
}

/// POST /v1/sessions/{id}/cancel
async fn cancel_session(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    owned_session(&state, id, &claims).await?;
    let session = state.coordinator.cancel(id).await?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /v1/sessions/{id}/payment/retry
async fn retry_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    owned_session(&state, id, &claims).await?;
    let session = state.coordinator.retry_payment(id).await?;
    Ok(Json(SessionView::from(&session)))
}

/// POST /v1/sessions/{id}/lookups
async fn lookup(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<GatewayResponse>, AppError> {
    owned_session(&state, id, &claims).await?;
    let response = state.coordinator.lookup(id, req.kind).await?;
    Ok(Json(response))
}

/// GET /v1/sessions/{id}/booking
async fn retrieve_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetrieveResponse>, AppError> {
    owned_session(&state, id, &claims).await?;
    let booking = state.coordinator.retrieve(id).await?;
    Ok(Json(booking))
}

/// GET /v1/sessions/{id}/stream
/// Server-sent events for one session's state changes.
async fn stream_session(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    owned_session(&state, id, &claims).await?;
    let rx = state.coordinator.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.session_id == id => Event::default()
                .event("session")
                .json_data(&event)
                .ok()
                .map(Ok),
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
