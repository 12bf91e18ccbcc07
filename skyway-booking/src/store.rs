use chrono::{DateTime, Duration, Utc};
use skyway_core::gateway::{Credential, Endpoint, GatewayError};
use skyway_core::search::SearchParameters;
use skyway_core::session::{BookingSession, InFlight, RemoteCallRecord, SessionPatch, SessionStatus};
use skyway_core::{validator, BookingError, BookingResult, DenyReason, Step};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Proof that the holder owns the single outstanding call of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLease {
    pub session_id: Uuid,
    pub lease_id: Uuid,
    pub endpoint: Endpoint,
    pub step: Option<Step>,
}

/// What a failed step does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Session moves to `Failed`
    Terminal,
    /// Session stays at its last good step
    Unchanged,
}

/// In-memory authoritative store of booking sessions.
///
/// Every mutation happens under the write lock, so the version check, the
/// in-flight check and the transition check are one atomic decision.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, BookingSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session for a fresh search
    pub async fn create(
        &self,
        params: SearchParameters,
        owner: Option<String>,
        credential: Credential,
        ttl: Duration,
    ) -> BookingSession {
        let session = BookingSession::new(params, owner, credential, ttl);
        self.sessions.write().await.insert(session.id, session.clone());
        session
    }

    /// Snapshot of a session
    pub async fn get(&self, id: Uuid) -> BookingResult<BookingSession> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(BookingError::NotFound(id))
    }

    /// Put a persisted snapshot back. A snapshot never carries a live call, so
    /// any in-flight marker is dropped. Existing entries win.
    pub async fn restore(&self, mut session: BookingSession) -> BookingSession {
        session.in_flight = None;
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.id).or_insert(session).clone()
    }

    /// Claim the session for one step call.
    pub async fn begin(
        &self,
        id: Uuid,
        step: Step,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> BookingResult<(BookingSession, CallLease)> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, id)?;

        Self::ensure_open(session, now)?;
        if let Some(expected) = expected_version {
            if expected != session.version {
                return Err(BookingError::StaleSession(id));
            }
        }
        validator::check_order(session, step)
            .map_err(|reason| BookingError::denied(session, step, reason))?;

        let lease = Self::claim(session, Endpoint::for_step(step), Some(step), now);
        Ok((session.clone(), lease))
    }

    /// Claim the session for a call that does not advance it (lookups,
    /// retrieval).
    pub async fn begin_auxiliary(
        &self,
        id: Uuid,
        endpoint: Endpoint,
        now: DateTime<Utc>,
    ) -> BookingResult<(BookingSession, CallLease)> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, id)?;

        if session.is_expired(now) {
            return Err(BookingError::SessionExpired(id));
        }
        if session.in_flight.is_some() {
            return Err(BookingError::StaleSession(id));
        }

        let lease = Self::claim(session, endpoint, None, now);
        Ok((session.clone(), lease))
    }

    /// Append an attempt to the audit history. Works on cancelled sessions too;
    /// the record is then flagged as discarded.
    pub async fn append_record(&self, lease: &CallLease, mut record: RemoteCallRecord) -> BookingResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, lease.session_id)?;

        if session.status == SessionStatus::Cancelled && lease.endpoint != Endpoint::Cancel {
            record.discarded = true;
        }
        session.history.push(record);
        session.touch();
        Ok(())
    }

    /// Apply a successful step and release the lease.
    pub async fn commit(&self, lease: &CallLease, patch: SessionPatch) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, lease.session_id)?;
        Self::release_lease(session, lease)?;

        if session.status == SessionStatus::Cancelled {
            // The result is discarded, but a booking it created upstream must
            // still be released.
            if let SessionPatch::ItineraryCreated { itinerary } = &patch {
                if !session.remote_cancelled {
                    session.pending_release = Some(itinerary.itinerary_id.clone());
                }
            }
            return Err(BookingError::SessionCancelled(session.id));
        }
        if Some(patch.step()) != lease.step {
            let to = patch.step();
            return Err(BookingError::denied(
                session,
                to,
                DenyReason::InputMismatch { step: lease.step.unwrap_or(to), input: to },
            ));
        }

        session.apply(patch);
        session.version += 1;
        Ok(session.clone())
    }

    /// Record a failed step and release the lease.
    pub async fn fail(
        &self,
        lease: &CallLease,
        error: GatewayError,
        disposition: FailureDisposition,
    ) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, lease.session_id)?;
        Self::release_lease(session, lease)?;

        if session.status == SessionStatus::Cancelled {
            return Err(BookingError::SessionCancelled(session.id));
        }

        session.last_error = Some(error);
        if disposition == FailureDisposition::Terminal {
            session.status = SessionStatus::Failed;
            session.failed_step = lease.step;
            session.version += 1;
        }
        session.touch();
        Ok(session.clone())
    }

    /// Release a lease taken with `begin_auxiliary`.
    pub async fn release(&self, lease: &CallLease) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, lease.session_id)?;
        Self::release_lease(session, lease)?;
        Ok(session.clone())
    }

    /// Mark a session cancelled. Allowed while a call is in flight; that call's
    /// result will be discarded.
    pub async fn cancel(&self, id: Uuid) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, id)?;

        if session.status == SessionStatus::Cancelled {
            return Err(BookingError::SessionCancelled(id));
        }

        session.status = SessionStatus::Cancelled;
        if !session.remote_cancelled {
            session.pending_release = session.itinerary.as_ref().map(|i| i.itinerary_id.clone());
        }
        session.version += 1;
        session.touch();
        Ok(session.clone())
    }

    /// Claim a cancelled session to release its upstream booking. Returns the
    /// itinerary to cancel, or `None` when there is nothing to do right now.
    pub async fn begin_release(&self, id: Uuid) -> Option<(BookingSession, CallLease, String)> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;

        if session.status != SessionStatus::Cancelled || session.in_flight.is_some() {
            return None;
        }
        let itinerary_id = session.pending_release.clone()?;
        let lease = Self::claim(session, Endpoint::Cancel, None, Utc::now());
        Some((session.clone(), lease, itinerary_id))
    }

    pub async fn finish_release(&self, lease: &CallLease, released: bool) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, lease.session_id)?;
        Self::release_lease(session, lease)?;

        if released {
            session.pending_release = None;
            session.remote_cancelled = true;
        }
        session.touch();
        Ok(session.clone())
    }

    /// Reopen a session whose payment failed so a fresh attempt can be made.
    pub async fn reopen_payment(&self, id: Uuid, now: DateTime<Utc>) -> BookingResult<BookingSession> {
        let mut sessions = self.sessions.write().await;
        let session = Self::session_mut(&mut sessions, id)?;

        if session.is_expired(now) {
            return Err(BookingError::SessionExpired(id));
        }
        if session.in_flight.is_some() {
            return Err(BookingError::StaleSession(id));
        }
        validator::validate_payment_retry(session)
            .map_err(|reason| BookingError::denied(session, Step::Payment, reason))?;

        session.status = SessionStatus::ItineraryCreated;
        session.step = Some(Step::Itinerary);
        session.failed_step = None;
        session.last_error = None;
        session.transaction_id = None;
        session.version += 1;
        session.touch();
        Ok(session.clone())
    }

    /// Drop expired sessions that have no call in flight
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut sessions = self.sessions.write().await;
        let mut purged = Vec::new();
        sessions.retain(|id, s| {
            let keep = !(s.is_expired(now) && s.in_flight.is_none());
            if !keep {
                purged.push(*id);
            }
            keep
        });
        purged
    }

    /// Count of sessions that can still make progress
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    fn session_mut(
        sessions: &mut HashMap<Uuid, BookingSession>,
        id: Uuid,
    ) -> BookingResult<&mut BookingSession> {
        sessions.get_mut(&id).ok_or(BookingError::NotFound(id))
    }

    fn ensure_open(session: &BookingSession, now: DateTime<Utc>) -> BookingResult<()> {
        if session.status == SessionStatus::Cancelled {
            return Err(BookingError::SessionCancelled(session.id));
        }
        if session.is_expired(now) {
            return Err(BookingError::SessionExpired(session.id));
        }
        if session.in_flight.is_some() {
            return Err(BookingError::StaleSession(session.id));
        }
        Ok(())
    }

    fn claim(session: &mut BookingSession, endpoint: Endpoint, step: Option<Step>, now: DateTime<Utc>) -> CallLease {
        let lease_id = Uuid::new_v4();
        session.in_flight = Some(InFlight { lease_id, endpoint, step, started_at: now });
        session.touch();
        CallLease { session_id: session.id, lease_id, endpoint, step }
    }

    fn release_lease(session: &mut BookingSession, lease: &CallLease) -> BookingResult<()> {
        match &session.in_flight {
            Some(in_flight) if in_flight.lease_id == lease.lease_id => {
                session.in_flight = None;
                Ok(())
            }
            _ => Err(BookingError::StaleSession(session.id)),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyway_core::gateway::GatewayErrorKind;
    use skyway_core::search::{Cabin, FlightOffer, Money, PaxCounts, SearchLeg, TripType};
    use skyway_core::session::{ItineraryRef, SelectedTrip, TripSelection};
    use skyway_shared::Masked;

    fn params() -> SearchParameters {
        SearchParameters {
            trip_type: TripType::OneWay,
            legs: vec![SearchLeg {
                origin_airport_code: "DEL".to_string(),
                destination_airport_code: "BOM".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            }],
            pax: PaxCounts { adults: 1, children: 0, infants: 0 },
            cabin: Cabin::Economy,
        }
    }

    fn credential() -> Credential {
        Credential {
            token: Masked::new("bearer".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn offer() -> FlightOffer {
        FlightOffer {
            index: 0,
            fare_id: "F0".to_string(),
            carrier: "AI".to_string(),
            flight_number: "AI101".to_string(),
            origin: "DEL".to_string(),
            destination: "BOM".to_string(),
            departure_time: Utc::now(),
            arrival_time: Utc::now(),
            fare: Money::new(5000, "INR"),
            seats_left: None,
        }
    }

    fn record(lease: &CallLease) -> RemoteCallRecord {
        RemoteCallRecord::completed(
            lease.endpoint,
            lease.step,
            1,
            "key",
            serde_json::json!({}),
            Err(&GatewayError::network("boom")),
            Utc::now(),
            std::time::Duration::from_millis(3),
        )
    }

    async fn new_session(store: &SessionStore) -> BookingSession {
        store.create(params(), None, credential(), Duration::minutes(15)).await
    }

    async fn run_step(store: &SessionStore, id: Uuid, patch: SessionPatch) -> BookingSession {
        let (_, lease) = store.begin(id, patch.step(), None, Utc::now()).await.unwrap();
        store.commit(&lease, patch).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let s = run_step(&store, id, SessionPatch::Searched { tui: "T".to_string(), results: vec![offer()] }).await;
        assert_eq!(s.status, SessionStatus::Searching);
        assert_eq!(s.version, 1);

        let s = run_step(&store, id, SessionPatch::Priced {
            tui: "T".to_string(),
            selection: TripSelection {
                trips: vec![SelectedTrip { index: 0, fare_id: "F0".to_string(), flight_number: "AI101".to_string() }],
                total_fare: Money::new(5000, "INR"),
                priced_at: Utc::now(),
            },
        }).await;
        assert_eq!(s.status, SessionStatus::Priced);

        let s = run_step(&store, id, SessionPatch::ItineraryCreated {
            itinerary: ItineraryRef {
                itinerary_id: "IT-1".to_string(),
                total_fare: Money::new(5000, "INR"),
                passenger_count: 1,
            },
        }).await;
        assert_eq!(s.status, SessionStatus::ItineraryCreated);
        assert!(s.transaction_id.is_none());

        let s = run_step(&store, id, SessionPatch::PaymentAccepted { transaction_id: "TX".to_string() }).await;
        assert_eq!(s.status, SessionStatus::PaymentPending);

        let s = run_step(&store, id, SessionPatch::Ticketed {
            ticketing: skyway_core::session::Ticketing { pnr: "PNR1".to_string(), ticket_numbers: vec![] },
        }).await;
        assert_eq!(s.status, SessionStatus::Ticketed);
        assert_eq!(s.version, 5);
        assert!(s.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_leaves_state_unchanged() {
        let store = SessionStore::new();
        let before = new_session(&store).await;

        let result = store.begin(before.id, Step::Payment, None, Utc::now()).await;
        assert!(matches!(result, Err(BookingError::InvalidTransition { .. })));

        let after = store.get(before.id).await.unwrap();
        assert_eq!(after.version, before.version);
        assert!(after.in_flight.is_none());
        assert!(after.history.is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_is_stale() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let (_, lease) = store.begin(id, Step::Search, Some(0), Utc::now()).await.unwrap();
        let second = store.begin(id, Step::Search, Some(0), Utc::now()).await;
        assert!(matches!(second, Err(BookingError::StaleSession(_))));

        store.commit(&lease, SessionPatch::Searched { tui: "T".to_string(), results: vec![] }).await.unwrap();
        // The loser retrying with its old version is still stale.
        let late = store.begin(id, Step::Price, Some(0), Utc::now()).await;
        assert!(matches!(late, Err(BookingError::StaleSession(_))));
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let later = Utc::now() + Duration::minutes(16);
        let result = store.begin(id, Step::Search, None, later).await;
        assert_eq!(result.unwrap_err(), BookingError::SessionExpired(id));

        assert_eq!(store.purge_expired(later).await, vec![id]);
        assert_eq!(store.get(id).await.unwrap_err(), BookingError::NotFound(id));
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let (_, lease) = store.begin(id, Step::Search, None, Utc::now()).await.unwrap();
        store.cancel(id).await.unwrap();

        store.append_record(&lease, record(&lease)).await.unwrap();
        let result = store.commit(&lease, SessionPatch::Searched { tui: "T".to_string(), results: vec![] }).await;
        assert_eq!(result.unwrap_err(), BookingError::SessionCancelled(id));

        let s = store.get(id).await.unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);
        assert!(s.tui.is_none());
        assert!(s.in_flight.is_none());
        assert_eq!(s.history.len(), 1);
        assert!(s.history[0].discarded);
    }

    #[tokio::test]
    async fn test_terminal_failure_and_payment_reopen() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;
        run_step(&store, id, SessionPatch::Searched { tui: "T".to_string(), results: vec![offer()] }).await;

        let (_, lease) = store.begin(id, Step::Price, None, Utc::now()).await.unwrap();
        let failed = store
            .fail(&lease, GatewayError::network("down"), FailureDisposition::Terminal)
            .await
            .unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);
        assert_eq!(failed.failed_step, Some(Step::Price));
        assert_eq!(failed.last_error.as_ref().map(|e| e.kind), Some(GatewayErrorKind::Network));

        // Only payment failures may be reopened.
        let reopen = store.reopen_payment(id, Utc::now()).await;
        assert!(matches!(reopen, Err(BookingError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_unchanged_failure_keeps_version() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let (_, lease) = store.begin(id, Step::Search, Some(0), Utc::now()).await.unwrap();
        let s = store
            .fail(&lease, GatewayError::rejected("bad date"), FailureDisposition::Unchanged)
            .await
            .unwrap();
        assert_eq!(s.status, SessionStatus::Searching);
        assert_eq!(s.version, 0);

        // Caller can resubmit with the version it already holds.
        assert!(store.begin(id, Step::Search, Some(0), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_after_cancel_of_created_itinerary() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;
        run_step(&store, id, SessionPatch::Searched { tui: "T".to_string(), results: vec![offer()] }).await;
        run_step(&store, id, SessionPatch::Priced {
            tui: "T".to_string(),
            selection: TripSelection {
                trips: vec![],
                total_fare: Money::new(1, "INR"),
                priced_at: Utc::now(),
            },
        }).await;

        let (_, lease) = store.begin(id, Step::Itinerary, None, Utc::now()).await.unwrap();
        assert!(store.begin_release(id).await.is_none());
        store.cancel(id).await.unwrap();

        let itinerary = ItineraryRef {
            itinerary_id: "IT-9".to_string(),
            total_fare: Money::new(1, "INR"),
            passenger_count: 1,
        };
        let result = store.commit(&lease, SessionPatch::ItineraryCreated { itinerary }).await;
        assert!(result.is_err());

        let (_, release, itinerary_id) = store.begin_release(id).await.unwrap();
        assert_eq!(itinerary_id, "IT-9");
        let s = store.finish_release(&release, true).await.unwrap();
        assert!(s.remote_cancelled);
        assert!(s.pending_release.is_none());
        assert!(s.itinerary.is_none());
    }

    #[tokio::test]
    async fn test_release_is_single_use() {
        let store = SessionStore::new();
        let id = new_session(&store).await.id;

        let (_, lease) = store.begin(id, Step::Search, None, Utc::now()).await.unwrap();
        let released = store.release(&lease).await.unwrap();
        assert!(released.in_flight.is_none());
        assert_eq!(released.version, 0);

        assert_eq!(store.release(&lease).await.unwrap_err(), BookingError::StaleSession(id));
    }
}
