use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::gateway::{Credential, Endpoint, GatewayError, GatewayErrorKind, GatewayResponse};
use crate::search::{FlightOffer, Money, SearchParameters};
use crate::step::Step;

/// Session status in the booking lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Searching,
    Priced,
    ItineraryCreated,
    PaymentPending,
    Ticketed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// No step may run on a session in one of these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ticketed | SessionStatus::Failed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Searching => "SEARCHING",
            SessionStatus::Priced => "PRICED",
            SessionStatus::ItineraryCreated => "ITINERARY_CREATED",
            SessionStatus::PaymentPending => "PAYMENT_PENDING",
            SessionStatus::Ticketed => "TICKETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedTrip {
    pub index: usize,
    pub fare_id: String,
    pub flight_number: String,
}

/// Trips confirmed by a pricing response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripSelection {
    pub trips: Vec<SelectedTrip>,
    pub total_fare: Money,
    pub priced_at: DateTime<Utc>,
}

impl TripSelection {
    pub fn fare_ids(&self) -> Vec<String> {
        self.trips.iter().map(|t| t.fare_id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItineraryRef {
    pub itinerary_id: String,
    pub total_fare: Money,
    pub passenger_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticketing {
    pub pnr: String,
    pub ticket_numbers: Vec<String>,
}

/// Result of one remote call, as kept in the audit history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallOutcome {
    Ok { response: serde_json::Value },
    Err { kind: GatewayErrorKind, detail: String },
}

/// One outbound gateway attempt. Appended to the session history and never
/// changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteCallRecord {
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub step: Option<Step>,
    pub attempt: u32,
    pub idempotency_key: String,
    pub request: serde_json::Value,
    pub outcome: CallOutcome,
    pub latency_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the session was cancelled before this call completed.
    #[serde(default)]
    pub discarded: bool,
}

impl RemoteCallRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        endpoint: Endpoint,
        step: Option<Step>,
        attempt: u32,
        idempotency_key: &str,
        request: serde_json::Value,
        result: Result<&GatewayResponse, &GatewayError>,
        started_at: DateTime<Utc>,
        latency: std::time::Duration,
    ) -> Self {
        let outcome = match result {
            Ok(response) => CallOutcome::Ok {
                response: serde_json::to_value(response).unwrap_or(serde_json::Value::Null),
            },
            Err(e) => CallOutcome::Err { kind: e.kind, detail: e.detail.clone() },
        };
        let latency_ms = latency.as_millis() as u64;

        Self {
            id: Uuid::new_v4(),
            endpoint,
            step,
            attempt,
            idempotency_key: idempotency_key.to_string(),
            request,
            outcome,
            latency_ms,
            started_at,
            finished_at: started_at + Duration::milliseconds(latency_ms as i64),
            discarded: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, CallOutcome::Ok { .. })
    }
}

/// Marker for the one outstanding remote call a session may have.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InFlight {
    pub lease_id: Uuid,
    pub endpoint: Endpoint,
    pub step: Option<Step>,
    pub started_at: DateTime<Utc>,
}

/// State change produced by one successful step.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPatch {
    Searched { tui: String, results: Vec<FlightOffer> },
    Priced { tui: String, selection: TripSelection },
    ItineraryCreated { itinerary: ItineraryRef },
    PaymentAccepted { transaction_id: String },
    Ticketed { ticketing: Ticketing },
}

impl SessionPatch {
    pub fn step(&self) -> Step {
        match self {
            SessionPatch::Searched { .. } => Step::Search,
            SessionPatch::Priced { .. } => Step::Price,
            SessionPatch::ItineraryCreated { .. } => Step::Itinerary,
            SessionPatch::PaymentAccepted { .. } => Step::Payment,
            SessionPatch::Ticketed { .. } => Step::Ticket,
        }
    }
}

/// The single authoritative record of one booking attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSession {
    pub id: Uuid,
    pub owner: Option<String>,
    pub credential: Credential,
    pub tui: Option<String>,
    /// Last completed step; `None` until the search has come back.
    pub step: Option<Step>,
    pub status: SessionStatus,
    pub params: SearchParameters,
    pub results: Vec<FlightOffer>,
    pub selection: Option<TripSelection>,
    pub itinerary: Option<ItineraryRef>,
    pub transaction_id: Option<String>,
    pub ticketing: Option<Ticketing>,
    pub failed_step: Option<Step>,
    pub last_error: Option<GatewayError>,
    pub in_flight: Option<InFlight>,
    /// Remote itinerary still to be cancelled upstream after a local cancel.
    #[serde(default)]
    pub pending_release: Option<String>,
    #[serde(default)]
    pub remote_cancelled: bool,
    pub version: u64,
    pub history: Vec<RemoteCallRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BookingSession {
    pub fn new(params: SearchParameters, owner: Option<String>, credential: Credential, ttl: Duration) -> Self {
        let now = Utc::now();
        // The remote token bounds how long the session is usable.
        let expires_at = std::cmp::min(now + ttl, credential.expires_at);
        Self {
            id: Uuid::new_v4(),
            owner,
            credential,
            tui: None,
            step: None,
            status: SessionStatus::Searching,
            params,
            results: Vec::new(),
            selection: None,
            itinerary: None,
            transaction_id: None,
            ticketing: None,
            failed_step: None,
            last_error: None,
            in_flight: None,
            pending_release: None,
            remote_cancelled: false,
            version: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Token used for idempotency keys: the remote TUI once issued, else our id.
    pub fn correlation_token(&self) -> String {
        self.tui.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn apply(&mut self, patch: SessionPatch) {
        let step = patch.step();
        match patch {
            SessionPatch::Searched { tui, results } => {
                self.tui = Some(tui);
                self.results = results;
            }
            SessionPatch::Priced { tui, selection } => {
                self.tui = Some(tui);
                self.selection = Some(selection);
            }
            SessionPatch::ItineraryCreated { itinerary } => {
                self.itinerary = Some(itinerary);
            }
            SessionPatch::PaymentAccepted { transaction_id } => {
                self.transaction_id = Some(transaction_id);
            }
            SessionPatch::Ticketed { ticketing } => {
                self.ticketing = Some(ticketing);
            }
        }
        self.step = Some(step);
        self.status = step.completed_status();
        self.last_error = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
