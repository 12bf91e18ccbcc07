use crate::policy::{Recovery, RecoveryPolicy, RetryConfig};
use crate::store::{CallLease, FailureDisposition, SessionStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use skyway_core::gateway::*;
use skyway_core::repository::SessionSnapshots;
use skyway_core::search::SearchParameters;
use skyway_core::session::{
    BookingSession, ItineraryRef, RemoteCallRecord, SelectedTrip, SessionPatch, SessionStatus, Ticketing,
    TripSelection,
};
use skyway_core::step::AdvanceRequest;
use skyway_core::{validator, BookingError, BookingResult, Step, StepInput};
use skyway_shared::{SessionEvent, SessionEventKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a session stays usable, further bounded by its credential
    pub session_ttl: chrono::Duration,
    /// Upper bound on a single gateway call
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::minutes(30),
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Ancillary lookups available once a selection is priced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupKind {
    Ssr,
    SeatLayout,
    FareRule,
}

impl LookupKind {
    pub fn endpoint(self) -> Endpoint {
        match self {
            LookupKind::Ssr => Endpoint::Ssr,
            LookupKind::SeatLayout => Endpoint::SeatLayout,
            LookupKind::FareRule => Endpoint::FareRule,
        }
    }
}

/// A refused or failed advance, with the session as it stands afterwards
/// (the last good step unless the failure was terminal).
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AdvanceFailure {
    pub error: BookingError,
    pub session: Option<BookingSession>,
}

impl From<BookingError> for AdvanceFailure {
    fn from(error: BookingError) -> Self {
        Self { error, session: None }
    }
}

/// One prepared outbound call for a step.
struct PreparedCall {
    request: GatewayRequest,
    key: IdempotencyKey,
}

/// Drives booking sessions through Search → Price → Itinerary → Payment →
/// Ticket against the remote booking API.
pub struct BookingCoordinator {
    store: SessionStore,
    gateway: Arc<dyn RemoteGateway>,
    policy: RecoveryPolicy,
    config: CoordinatorConfig,
    snapshots: Option<Arc<dyn SessionSnapshots>>,
    /// Serializes snapshot writes per session
    snapshot_gates: std::sync::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl BookingCoordinator {
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store: SessionStore::new(),
            gateway,
            policy: RecoveryPolicy::new(config.retry.clone()),
            config,
            snapshots: None,
            snapshot_gates: std::sync::Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SessionSnapshots>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn active_sessions(&self) -> usize {
        self.store.active_count().await
    }

    /// Validate the search, obtain a credential and open a new session.
    pub async fn create_session(
        &self,
        params: SearchParameters,
        owner: Option<String>,
    ) -> BookingResult<BookingSession> {
        params.validate().map_err(BookingError::InvalidParameters)?;

        let credential = self.gateway.authenticate().await.map_err(|e| {
            warn!("Gateway authentication failed: {}", e);
            BookingError::from(e)
        })?;

        let session = self
            .store
            .create(params, owner, credential, self.config.session_ttl)
            .await;
        info!("Created booking session {} (expires {})", session.id, session.expires_at);

        self.publish(&session, SessionEventKind::Created, None, None);
        self.persist(&session).await;
        Ok(session)
    }

    /// Memory first, then the snapshot repository.
    pub async fn get_session(&self, id: Uuid) -> BookingResult<BookingSession> {
        match self.store.get(id).await {
            Err(BookingError::NotFound(_)) => {}
            other => return other,
        }

        let Some(snapshots) = &self.snapshots else {
            return Err(BookingError::NotFound(id));
        };
        match snapshots.load(id).await {
            Ok(Some(session)) => {
                debug!("Restored session {} from snapshot", id);
                Ok(self.store.restore(session).await)
            }
            Ok(None) => Err(BookingError::NotFound(id)),
            Err(e) => {
                warn!("Failed to load snapshot for session {}: {}", id, e);
                Err(BookingError::NotFound(id))
            }
        }
    }

    /// Run one step of the booking flow.
    pub async fn advance(&self, id: Uuid, request: AdvanceRequest) -> Result<BookingSession, AdvanceFailure> {
        let step = request.step;
        let current = self.get_session(id).await?;
        let now = Utc::now();

        if let Err(error) = precheck(&current, request.expected_version, now) {
            return Err(AdvanceFailure { error, session: Some(current) });
        }
        if let Err(reason) = validator::validate(&current, step, &request.input) {
            debug!("Session {} refused {}: {}", id, step, reason);
            self.publish(&current, SessionEventKind::StepRejected, Some(step), Some(reason.to_string()));
            return Err(AdvanceFailure {
                error: BookingError::denied(&current, step, reason),
                session: Some(current),
            });
        }

        let expected = request.expected_version.unwrap_or(current.version);
        let (session, lease) = match self.store.begin(id, step, Some(expected), now).await {
            Ok(claimed) => claimed,
            Err(error) => return Err(AdvanceFailure { error, session: self.store.get(id).await.ok() }),
        };

        let prepared = match prepare(&session, &request.input) {
            Ok(prepared) => prepared,
            Err(error) => {
                if let Err(e) = self.store.release(&lease).await {
                    warn!("Could not release session {} after a rejected {}: {}", id, step, e);
                }
                return Err(AdvanceFailure { error, session: Some(session) });
            }
        };

        let mut attempt = 1;
        let outcome = loop {
            let result = self
                .call_once(&lease, &session.credential, &prepared, attempt, |response| {
                    interpret(&session, &request.input, &prepared.request, response)
                })
                .await;

            let error = match result {
                Ok(patch) => break Ok(patch),
                Err(error) => error,
            };
            match self.policy.decide(Some(step), &error, attempt) {
                Recovery::Retry { delay } => {
                    if self.is_cancelled(id).await {
                        break Err((error, FailureDisposition::Unchanged));
                    }
                    warn!(
                        "Session {} {} attempt {} failed ({}), retrying in {:?}",
                        id, step, attempt, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    if self.is_cancelled(id).await {
                        break Err((error, FailureDisposition::Unchanged));
                    }
                    attempt += 1;
                }
                Recovery::FailSession => break Err((error, FailureDisposition::Terminal)),
                Recovery::Surface => break Err((error, FailureDisposition::Unchanged)),
            }
        };

        match outcome {
            Ok(patch) => self.finish_step(&lease, patch).await,
            Err((gateway_error, disposition)) => self.finish_failure(&lease, gateway_error, disposition).await,
        }
    }

    /// Cancel a session. Any upstream booking is released now, or once the
    /// call in flight has come back.
    pub async fn cancel(&self, id: Uuid) -> BookingResult<BookingSession> {
        self.get_session(id).await?;
        let session = self.store.cancel(id).await?;
        info!("Cancelled session {} at {:?}", id, session.step);

        self.publish(&session, SessionEventKind::Cancelled, session.step, None);
        self.persist(&session).await;

        self.release_remote(id).await;
        self.store.get(id).await
    }

    /// Reopen a session whose payment failed, so payment can be attempted
    /// again with a new transaction id.
    pub async fn retry_payment(&self, id: Uuid) -> BookingResult<BookingSession> {
        self.get_session(id).await?;
        let session = self.store.reopen_payment(id, Utc::now()).await?;
        info!("Session {} reopened for a new payment attempt", id);

        self.publish(&session, SessionEventKind::PaymentReopened, Some(Step::Payment), None);
        self.persist(&session).await;
        Ok(session)
    }

    /// SSR, seat layout or fare-rule lookup for the priced selection.
    pub async fn lookup(&self, id: Uuid, kind: LookupKind) -> BookingResult<GatewayResponse> {
        let session = self.get_session(id).await?;
        validator::lookup_allowed(&session)
            .map_err(|reason| BookingError::denied(&session, kind.endpoint(), reason))?;

        let request = AncillaryRequest {
            tui: session.correlation_token(),
            fare_ids: session.selection.as_ref().map(|s| s.fare_ids()).unwrap_or_default(),
        };
        let request = match kind {
            LookupKind::Ssr => GatewayRequest::Ssr(request),
            LookupKind::SeatLayout => GatewayRequest::SeatLayout(request),
            LookupKind::FareRule => GatewayRequest::FareRule(request),
        };
        self.run_auxiliary(&session, request).await
    }

    /// Current state of the booking on the remote side.
    pub async fn retrieve(&self, id: Uuid) -> BookingResult<RetrieveResponse> {
        let session = self.get_session(id).await?;
        validator::validate_retrieve(&session)
            .map_err(|reason| BookingError::denied(&session, Endpoint::Retrieve, reason))?;

        let request = GatewayRequest::Retrieve(RetrieveRequest {
            itinerary_id: session.itinerary.as_ref().map(|i| i.itinerary_id.clone()).unwrap_or_default(),
            pnr: session.ticketing.as_ref().map(|t| t.pnr.clone()),
        });
        Ok(self.run_auxiliary(&session, request).await?.into_retrieve()?)
    }

    /// Drop expired sessions from memory along with their snapshots.
    pub async fn purge_expired(&self) -> usize {
        let purged = self.store.purge_expired(Utc::now()).await;
        if let Some(snapshots) = &self.snapshots {
            for id in &purged {
                let gate = self.snapshot_gate(*id);
                let _ordered = gate.lock().await;
                if let Err(e) = snapshots.delete(*id).await {
                    warn!("Failed to drop snapshot for session {}: {}", id, e);
                }
            }
            let mut gates = self.snapshot_gates.lock().unwrap_or_else(|e| e.into_inner());
            for id in &purged {
                gates.remove(id);
            }
        }
        if !purged.is_empty() {
            info!("Purged {} expired sessions", purged.len());
        }
        purged.len()
    }

    async fn finish_step(&self, lease: &CallLease, patch: SessionPatch) -> Result<BookingSession, AdvanceFailure> {
        let step = patch.step();
        match self.store.commit(lease, patch).await {
            Ok(session) => {
                info!("Session {} completed {} (version {})", session.id, step, session.version);
                self.publish(&session, SessionEventKind::StepCompleted, Some(step), None);
                self.persist(&session).await;
                Ok(session)
            }
            Err(error) => Err(self.after_lost_lease(lease.session_id, error).await),
        }
    }

    async fn finish_failure(
        &self,
        lease: &CallLease,
        gateway_error: GatewayError,
        disposition: FailureDisposition,
    ) -> Result<BookingSession, AdvanceFailure> {
        let step = lease.step;
        match self.store.fail(lease, gateway_error.clone(), disposition).await {
            Ok(session) => {
                let kind = match disposition {
                    FailureDisposition::Terminal => {
                        error!("Session {} failed at {}: {}", session.id, lease.endpoint, gateway_error);
                        SessionEventKind::Failed
                    }
                    FailureDisposition::Unchanged => {
                        warn!("Session {} {} call failed: {}", session.id, lease.endpoint, gateway_error);
                        SessionEventKind::StepRejected
                    }
                };
                self.publish(&session, kind, step, Some(gateway_error.to_string()));
                self.persist(&session).await;
                Err(AdvanceFailure { error: gateway_error.into(), session: Some(session) })
            }
            Err(error) => Err(self.after_lost_lease(lease.session_id, error).await),
        }
    }

    /// The lease could not be settled normally, usually because the session
    /// was cancelled while the call was out.
    async fn after_lost_lease(&self, id: Uuid, error: BookingError) -> AdvanceFailure {
        if let BookingError::SessionCancelled(_) = error {
            info!("Session {} was cancelled in flight; result discarded", id);
            self.release_remote(id).await;
        }
        let session = self.store.get(id).await.ok();
        if let Some(session) = &session {
            self.persist(session).await;
        }
        AdvanceFailure { error, session }
    }

    /// Cancel a booking still held upstream for a cancelled session.
    async fn release_remote(&self, id: Uuid) {
        let Some((session, lease, itinerary_id)) = self.store.begin_release(id).await else {
            return;
        };

        let prepared = PreparedCall {
            key: IdempotencyKey::new(&session.correlation_token(), Endpoint::Cancel),
            request: GatewayRequest::Cancel(CancelRequest {
                itinerary_id: itinerary_id.clone(),
                pnr: session.ticketing.as_ref().map(|t| t.pnr.clone()),
            }),
        };
        let released = match self
            .call_once(&lease, &session.credential, &prepared, 1, |r| r.into_cancel())
            .await
        {
            Ok(response) if response.cancelled => {
                info!("Released itinerary {} of session {}", itinerary_id, id);
                true
            }
            Ok(_) => {
                warn!("Upstream refused to cancel itinerary {} of session {}", itinerary_id, id);
                false
            }
            Err(e) => {
                warn!("Failed to cancel itinerary {} of session {}: {}", itinerary_id, id, e);
                false
            }
        };

        match self.store.finish_release(&lease, released).await {
            Ok(session) => self.persist(&session).await,
            Err(e) => warn!("Could not settle release of session {}: {}", id, e),
        }
    }

    /// Lookups and retrieval: hold the session lease, retry per policy, never
    /// change the session beyond its history.
    async fn run_auxiliary(&self, session: &BookingSession, request: GatewayRequest) -> BookingResult<GatewayResponse> {
        let endpoint = request.endpoint();
        let (_, lease) = self.store.begin_auxiliary(session.id, endpoint, Utc::now()).await?;
        let prepared = PreparedCall {
            key: IdempotencyKey::new(&session.correlation_token(), endpoint),
            request,
        };

        let mut attempt = 1;
        let result = loop {
            match self.call_once(&lease, &session.credential, &prepared, attempt, Ok).await {
                Ok(response) => break Ok(response),
                Err(error) => match self.policy.decide(None, &error, attempt) {
                    Recovery::Retry { delay } => {
                        debug!("{} lookup for session {} failed ({}), retrying", endpoint, session.id, error);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => break Err(error),
                },
            }
        };

        match self.store.release(&lease).await {
            Ok(released) => self.persist(&released).await,
            Err(e) => warn!("Could not release session {} after {}: {}", lease.session_id, endpoint, e),
        }
        Ok(result?)
    }

    /// One bounded gateway call. The outcome, after `check` has looked at the
    /// response, is appended to the session history.
    async fn call_once<T>(
        &self,
        lease: &CallLease,
        credential: &Credential,
        prepared: &PreparedCall,
        attempt: u32,
        check: impl FnOnce(GatewayResponse) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let endpoint = prepared.request.endpoint();
        let started_at = Utc::now();
        let started = Instant::now();

        let result = match tokio::time::timeout(
            self.config.call_timeout,
            self.gateway.call(&prepared.key, credential, &prepared.request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::network(format!(
                "{} call timed out after {}ms",
                endpoint,
                self.config.call_timeout.as_millis()
            ))),
        };
        let result = result.and_then(|response| {
            if response.endpoint() != endpoint {
                return Err(GatewayError::malformed(format!(
                    "expected {} response, got {}",
                    endpoint,
                    response.endpoint()
                )));
            }
            Ok(response)
        });
        let latency = started.elapsed();

        let (recorded, outcome) = match result {
            Ok(response) => match check(response.clone()) {
                Ok(value) => (Ok(response), Ok(value)),
                Err(e) => (Err(e.clone()), Err(e)),
            },
            Err(e) => (Err(e.clone()), Err(e)),
        };

        let record = RemoteCallRecord::completed(
            endpoint,
            lease.step,
            attempt,
            prepared.key.as_str(),
            prepared.request.audit_payload(),
            recorded.as_ref(),
            started_at,
            latency,
        );
        if let Err(e) = self.store.append_record(lease, record).await {
            warn!("Could not record {} call for session {}: {}", endpoint, lease.session_id, e);
        }
        debug!(
            "{} call for session {} attempt {} took {}ms",
            endpoint,
            lease.session_id,
            attempt,
            latency.as_millis()
        );
        outcome
    }

    async fn is_cancelled(&self, id: Uuid) -> bool {
        matches!(self.store.get(id).await, Ok(s) if s.status == SessionStatus::Cancelled)
    }

    fn publish(&self, session: &BookingSession, kind: SessionEventKind, step: Option<Step>, detail: Option<String>) {
        let mut event = SessionEvent::new(
            session.id,
            kind,
            session.status.to_string(),
            step.map(|s| s.to_string()),
            session.version,
        );
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn snapshot_gate(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.snapshot_gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(id).or_default().clone()
    }

    /// Save the store's current copy of the session. Writes for one session
    /// happen one at a time and each reads the latest state, so the snapshot
    /// never goes back to an older version.
    async fn persist(&self, session: &BookingSession) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let gate = self.snapshot_gate(session.id);
        let _ordered = gate.lock().await;

        let latest = match self.store.get(session.id).await {
            Ok(latest) => latest,
            Err(_) => return,
        };
        if let Err(e) = snapshots.save(&latest).await {
            warn!("Failed to save snapshot of session {}: {}", latest.id, e);
        }
    }
}

/// Checks that make a request stale or pointless regardless of the step.
fn precheck(session: &BookingSession, expected_version: Option<u64>, now: chrono::DateTime<Utc>) -> BookingResult<()> {
    if session.status == SessionStatus::Cancelled {
        return Err(BookingError::SessionCancelled(session.id));
    }
    if session.is_expired(now) {
        return Err(BookingError::SessionExpired(session.id));
    }
    if session.in_flight.is_some() || expected_version.is_some_and(|v| v != session.version) {
        return Err(BookingError::StaleSession(session.id));
    }
    Ok(())
}

/// Build the outbound request for a validated step.
fn prepare(session: &BookingSession, input: &StepInput) -> BookingResult<PreparedCall> {
    let step = input.step();
    let token = session.correlation_token();
    let missing = |reason| BookingError::denied(session, step, reason);

    let request = match input {
        StepInput::Search => GatewayRequest::Search(SearchRequest { params: session.params.clone() }),
        StepInput::Price { trips } => GatewayRequest::Pricing(PricingRequest {
            tui: token.clone(),
            fare_ids: trips
                .iter()
                .map(|&i| {
                    session
                        .results
                        .get(i)
                        .map(|offer| offer.fare_id.clone())
                        .ok_or_else(|| missing(validator::DenyReason::SelectionOutOfRange(i)))
                })
                .collect::<BookingResult<_>>()?,
        }),
        StepInput::Itinerary { travelers, contact } => {
            let selection = session
                .selection
                .as_ref()
                .ok_or_else(|| missing(validator::DenyReason::NoTripSelection))?;
            GatewayRequest::Itinerary(ItineraryRequest {
                tui: token.clone(),
                fare_ids: selection.fare_ids(),
                travelers: travelers.clone(),
                contact: contact.clone(),
            })
        }
        StepInput::Payment { method } => {
            let itinerary = session
                .itinerary
                .as_ref()
                .ok_or_else(|| missing(validator::DenyReason::NoItinerary))?;
            let transaction_id = format!("TX-{}", Uuid::new_v4().simple()).to_uppercase();
            // Each payment attempt carries its own transaction id, so a
            // reopened payment must not be deduplicated against the failed one.
            let key = IdempotencyKey::new(&format!("{}:{}", token, transaction_id), Endpoint::Payment);
            return Ok(PreparedCall {
                key,
                request: GatewayRequest::Payment(PaymentRequest {
                    tui: token,
                    itinerary_id: itinerary.itinerary_id.clone(),
                    transaction_id,
                    amount: itinerary.total_fare.clone(),
                    method: method.clone(),
                }),
            });
        }
        StepInput::Ticket => {
            let itinerary = session
                .itinerary
                .as_ref()
                .ok_or_else(|| missing(validator::DenyReason::NoItinerary))?;
            let transaction_id = session
                .transaction_id
                .clone()
                .ok_or_else(|| missing(validator::DenyReason::NoTransactionId))?;
            GatewayRequest::Ticket(TicketRequest {
                tui: token.clone(),
                itinerary_id: itinerary.itinerary_id.clone(),
                transaction_id,
            })
        }
    };

    Ok(PreparedCall {
        key: IdempotencyKey::new(&token, request.endpoint()),
        request,
    })
}

/// Turn a step response into the change it makes to the session.
fn interpret(
    session: &BookingSession,
    input: &StepInput,
    request: &GatewayRequest,
    response: GatewayResponse,
) -> Result<SessionPatch, GatewayError> {
    match (input, request) {
        (StepInput::Search, _) => {
            let response = response.into_search()?;
            let results = response
                .offers
                .into_iter()
                .enumerate()
                .map(|(index, mut offer)| {
                    offer.index = index;
                    offer
                })
                .collect();
            Ok(SessionPatch::Searched { tui: response.tui, results })
        }
        (StepInput::Price { trips }, _) => {
            let response = response.into_pricing()?;
            if response.fare_ids.len() != trips.len() {
                return Err(GatewayError::malformed(format!(
                    "priced {} fares for {} selected trips",
                    response.fare_ids.len(),
                    trips.len()
                )));
            }
            let trips = trips
                .iter()
                .zip(response.fare_ids)
                .map(|(&index, fare_id)| SelectedTrip {
                    index,
                    fare_id,
                    flight_number: session
                        .results
                        .get(index)
                        .map(|offer| offer.flight_number.clone())
                        .unwrap_or_default(),
                })
                .collect();
            Ok(SessionPatch::Priced {
                tui: response.tui,
                selection: TripSelection { trips, total_fare: response.total_fare, priced_at: Utc::now() },
            })
        }
        (StepInput::Itinerary { travelers, .. }, _) => {
            let response = response.into_itinerary()?;
            Ok(SessionPatch::ItineraryCreated {
                itinerary: ItineraryRef {
                    itinerary_id: response.itinerary_id,
                    total_fare: response.total_fare,
                    passenger_count: travelers.len(),
                },
            })
        }
        (StepInput::Payment { .. }, GatewayRequest::Payment(sent)) => {
            let response = response.into_payment()?;
            if response.status == RemotePaymentStatus::Declined {
                return Err(GatewayError::rejected(format!(
                    "payment declined: {}",
                    response.reason.unwrap_or_else(|| "no reason given".to_string())
                )));
            }
            if response.transaction_id != sent.transaction_id {
                return Err(GatewayError::malformed(format!(
                    "payment answered for transaction {}, sent {}",
                    response.transaction_id, sent.transaction_id
                )));
            }
            Ok(SessionPatch::PaymentAccepted { transaction_id: response.transaction_id })
        }
        (StepInput::Ticket, _) => {
            let response = response.into_ticket()?;
            Ok(SessionPatch::Ticketed {
                ticketing: Ticketing { pnr: response.pnr, ticket_numbers: response.ticket_numbers },
            })
        }
        (StepInput::Payment { .. }, other) => Err(GatewayError::malformed(format!(
            "payment step prepared a {} request",
            other.endpoint()
        ))),
    }
}
