use skyway_booking::{BookingCoordinator, CoordinatorConfig, RetryConfig, ScriptedGateway};
use skyway_core::gateway::{Endpoint, GatewayError, GatewayErrorKind};
use skyway_core::iata::{ContactInfo, PassengerType, PaymentKind, PaymentMethod, Traveler};
use skyway_core::search::{PaxCounts, SearchLeg, SearchParameters, TripType};
use skyway_core::session::{CallOutcome, SessionStatus};
use skyway_core::step::AdvanceRequest;
use skyway_core::{BookingError, Step, StepInput};
use skyway_shared::Masked;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn params(adults: u32) -> SearchParameters {
    SearchParameters {
        trip_type: TripType::RoundTrip,
        legs: vec![
            SearchLeg {
                origin_airport_code: "BOS".to_string(),
                destination_airport_code: "ORD".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2026, 12, 3).unwrap(),
            },
            SearchLeg {
                origin_airport_code: "ORD".to_string(),
                destination_airport_code: "BOS".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2026, 12, 9).unwrap(),
            },
        ],
        pax: PaxCounts { adults, children: 0, infants: 0 },
        cabin: Default::default(),
    }
}

fn setup(max_attempts: u32) -> (Arc<ScriptedGateway>, BookingCoordinator) {
    let gateway = Arc::new(ScriptedGateway::new());
    let coordinator = BookingCoordinator::new(
        gateway.clone(),
        CoordinatorConfig {
            retry: RetryConfig::immediate(max_attempts),
            call_timeout: Duration::from_millis(500),
            ..CoordinatorConfig::default()
        },
    );
    (gateway, coordinator)
}

fn travelers(count: usize) -> Vec<Traveler> {
    (0..count)
        .map(|i| Traveler {
            passenger_type: PassengerType::Adult,
            title: None,
            first_name: format!("Traveler{}", i),
            last_name: "Doe".to_string(),
            date_of_birth: None,
            passport_number: Some(Masked::new(format!("P00{}", i))),
        })
        .collect()
}

fn itinerary(count: usize) -> StepInput {
    StepInput::Itinerary {
        travelers: travelers(count),
        contact: ContactInfo {
            email: Masked::new("doe@example.test".to_string()),
            phone: Masked::new("+15550199".to_string()),
        },
    }
}

fn payment() -> StepInput {
    StepInput::Payment {
        method: PaymentMethod { kind: PaymentKind::Wallet, token: Masked::new("wallet-7781".to_string()) },
    }
}

async fn advance_to(coordinator: &BookingCoordinator, id: Uuid, inputs: Vec<StepInput>) {
    for input in inputs {
        coordinator.advance(id, AdvanceRequest::new(input)).await.unwrap();
    }
}

#[tokio::test]
async fn test_full_booking_reaches_ticketed() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(2), Some("guest-1".to_string())).await.unwrap().id;

    advance_to(
        &coordinator,
        id,
        vec![
            StepInput::Search,
            StepInput::Price { trips: vec![0, 4] },
            itinerary(2),
            payment(),
            StepInput::Ticket,
        ],
    )
    .await;

    let session = coordinator.get_session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Ticketed);
    assert_eq!(session.step, Some(Step::Ticket));
    assert_eq!(session.version, 5);
    assert_eq!(session.history.len(), 5);
    assert!(session.history.iter().all(|r| r.is_ok() && !r.discarded));

    let selection = session.selection.as_ref().unwrap();
    assert_eq!(selection.trips.len(), 2);
    assert_eq!(selection.trips[1].index, 4);
    assert_eq!(session.itinerary.as_ref().unwrap().passenger_count, 2);
    assert!(!session.ticketing.as_ref().unwrap().pnr.is_empty());
    assert_eq!(gateway.calls_to(Endpoint::Ticket), 1);

    let booking = coordinator.retrieve(id).await.unwrap();
    assert_eq!(booking.status, "TICKETED");
    assert_eq!(booking.itinerary_id, session.itinerary.unwrap().itinerary_id);
}

#[tokio::test]
async fn test_out_of_order_step_leaves_session_untouched() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search]).await;
    let before = coordinator.get_session(id).await.unwrap();

    let failure = coordinator.advance(id, AdvanceRequest::new(payment())).await.unwrap_err();
    assert!(matches!(failure.error, BookingError::InvalidTransition { .. }));

    let after = coordinator.get_session(id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Searching);
    assert_eq!(after.version, before.version);
    assert_eq!(after.history.len(), before.history.len());
    assert_eq!(gateway.calls_to(Endpoint::Payment), 0);
}

#[tokio::test]
async fn test_pricing_recovers_after_two_network_errors() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search]).await;

    gateway
        .push_error(Endpoint::Pricing, GatewayError::network("connection reset"))
        .push_error(Endpoint::Pricing, GatewayError::network("connection reset"));

    let session = coordinator
        .advance(id, AdvanceRequest::new(StepInput::Price { trips: vec![1] }))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Priced);

    let pricing: Vec<_> = session.history.iter().filter(|r| r.endpoint == Endpoint::Pricing).collect();
    assert_eq!(pricing.len(), 3);
    assert_eq!(pricing.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(!pricing[0].is_ok() && !pricing[1].is_ok() && pricing[2].is_ok());
    // Retries of a step reuse its idempotency key
    assert!(pricing.iter().all(|r| r.idempotency_key == pricing[0].idempotency_key));
}

#[tokio::test]
async fn test_search_fails_session_after_retries_exhausted() {
    let (gateway, coordinator) = setup(2);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    gateway
        .push_error(Endpoint::Search, GatewayError::from_status(502, "bad gateway"))
        .push_error(Endpoint::Search, GatewayError::from_status(503, "unavailable"));

    let failure = coordinator.advance(id, AdvanceRequest::new(StepInput::Search)).await.unwrap_err();
    assert!(matches!(failure.error, BookingError::Upstream5xx(_)));
    let session = failure.session.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failed_step, Some(Step::Search));
    assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn test_rejection_surfaces_and_keeps_last_good_step() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search, StepInput::Price { trips: vec![0] }]).await;

    gateway.push_error(Endpoint::Itinerary, GatewayError::from_status(422, "name too long"));
    let failure = coordinator.advance(id, AdvanceRequest::new(itinerary(1))).await.unwrap_err();
    assert_eq!(failure.error, BookingError::Upstream4xx("name too long".to_string()));

    let session = failure.session.unwrap();
    assert_eq!(session.status, SessionStatus::Priced);
    assert_eq!(session.version, 2);
    assert_eq!(gateway.calls_to(Endpoint::Itinerary), 1);

    // The caller may resubmit
    let session = coordinator.advance(id, AdvanceRequest::new(itinerary(1))).await.unwrap();
    assert_eq!(session.status, SessionStatus::ItineraryCreated);
}

#[tokio::test]
async fn test_payment_error_fails_without_retry() {
    let (gateway, coordinator) = setup(5);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(
        &coordinator,
        id,
        vec![StepInput::Search, StepInput::Price { trips: vec![2] }, itinerary(1)],
    )
    .await;

    gateway.push_error(Endpoint::Payment, GatewayError::from_status(504, "upstream timeout"));
    let failure = coordinator.advance(id, AdvanceRequest::new(payment())).await.unwrap_err();

    let session = failure.session.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.transaction_id.is_none());
    assert_eq!(gateway.calls_to(Endpoint::Payment), 1);

    let again = coordinator.advance(id, AdvanceRequest::new(payment())).await.unwrap_err();
    assert!(matches!(again.error, BookingError::InvalidTransition { .. }));
    assert_eq!(gateway.calls_to(Endpoint::Payment), 1);
}

#[tokio::test]
async fn test_concurrent_advances_yield_one_stale() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    gateway.set_latency(Endpoint::Search, Duration::from_millis(50));

    let (first, second) = tokio::join!(
        coordinator.advance(id, AdvanceRequest::new(StepInput::Search)),
        coordinator.advance(id, AdvanceRequest::new(StepInput::Search)),
    );

    let outcomes = [first, second];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    let stale = outcomes
        .iter()
        .filter(|r| matches!(r, Err(f) if f.error == BookingError::StaleSession(id)))
        .count();
    assert_eq!((succeeded, stale), (1, 1));
    assert_eq!(gateway.calls_to(Endpoint::Search), 1);
    assert_eq!(coordinator.get_session(id).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_expected_version_mismatch_is_stale() {
    let (_, coordinator) = setup(3);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search]).await;

    let failure = coordinator
        .advance(id, AdvanceRequest::new(StepInput::Price { trips: vec![0] }).at_version(0))
        .await
        .unwrap_err();
    assert_eq!(failure.error, BookingError::StaleSession(id));

    let session = coordinator
        .advance(id, AdvanceRequest::new(StepInput::Price { trips: vec![0] }).at_version(1))
        .await
        .unwrap();
    assert_eq!(session.version, 2);
}

#[tokio::test]
async fn test_cancel_in_flight_discards_result() {
    let (gateway, coordinator) = setup(3);
    let coordinator = Arc::new(coordinator);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search, StepInput::Price { trips: vec![0] }]).await;
    gateway.set_latency(Endpoint::Itinerary, Duration::from_millis(100));

    let runner = coordinator.clone();
    let advance = tokio::spawn(async move { runner.advance(id, AdvanceRequest::new(itinerary(1))).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancelled = coordinator.cancel(id).await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    let failure = advance.await.unwrap().unwrap_err();
    assert_eq!(failure.error, BookingError::SessionCancelled(id));

    let session = coordinator.get_session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert!(session.itinerary.is_none());
    let record = session.history.iter().find(|r| r.endpoint == Endpoint::Itinerary).unwrap();
    assert!(record.discarded);
    assert!(matches!(record.outcome, CallOutcome::Ok { .. }));

    // The itinerary created upstream by the discarded call is released
    assert_eq!(gateway.calls_to(Endpoint::Cancel), 1);
    assert!(session.remote_cancelled);
}

#[tokio::test]
async fn test_call_timeout_maps_to_network() {
    let (gateway, coordinator) = setup(1);
    let id = coordinator.create_session(params(1), None).await.unwrap().id;
    gateway.set_latency(Endpoint::Search, Duration::from_secs(2));

    let failure = coordinator.advance(id, AdvanceRequest::new(StepInput::Search)).await.unwrap_err();
    assert!(matches!(failure.error, BookingError::Network(_)));
    let session = failure.session.unwrap();
    match &session.history[0].outcome {
        CallOutcome::Err { kind, .. } => assert_eq!(*kind, GatewayErrorKind::Network),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_passenger_count_must_match_search() {
    let (gateway, coordinator) = setup(3);
    let id = coordinator.create_session(params(2), None).await.unwrap().id;
    advance_to(&coordinator, id, vec![StepInput::Search, StepInput::Price { trips: vec![0] }]).await;

    let failure = coordinator.advance(id, AdvanceRequest::new(itinerary(1))).await.unwrap_err();
    assert!(matches!(failure.error, BookingError::InvalidTransition { .. }));
    assert_eq!(gateway.calls_to(Endpoint::Itinerary), 0);
}
