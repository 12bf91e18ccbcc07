use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use skyway_api::{app, state::{AppState, AuthConfig}};
use skyway_booking::{BookingCoordinator, CoordinatorConfig, RetryConfig, ScriptedGateway};
use skyway_core::gateway::{Endpoint, GatewayError};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> (Router, Arc<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::new());
    let coordinator = BookingCoordinator::new(
        gateway.clone(),
        CoordinatorConfig { retry: RetryConfig::immediate(2), ..CoordinatorConfig::default() },
    );
    let state = AppState::new(
        Arc::new(coordinator),
        None,
        AuthConfig { secret: "test-secret".to_string(), expiration: 600 },
        100,
    )
    .unwrap();
    (app(state), gateway)
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn guest_token(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/v1/auth/guest", None, None).await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

fn search_body() -> Value {
    json!({
        "trip_type": "ONE_WAY",
        "legs": [{ "origin_airport_code": "LAX", "destination_airport_code": "JFK", "date": "2026-12-14" }],
        "pax": { "adults": 1 }
    })
}

async fn open_session(app: &Router, token: &str) -> String {
    let (status, body) = send(app, "POST", "/v1/sessions", Some(token), Some(search_body())).await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

fn advance(step: &str, input: Value) -> Value {
    json!({ "step": step, "input": input })
}

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redis"], "disabled");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sessions_require_token() {
    let (app, _) = test_app();
    let (status, _) = send(&app, "POST", "/v1/sessions", None, Some(search_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "POST", "/v1/sessions", Some("not-a-jwt"), Some(search_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_view_hides_credential() {
    let (app, _) = test_app();
    let token = guest_token(&app).await;
    let (status, body) = send(&app, "POST", "/v1/sessions", Some(&token), Some(search_body())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SEARCHING");
    assert_eq!(body["next_step"], "SEARCH");
    assert_eq!(body["version"], 0);
    assert!(body.get("credential").is_none());
    assert!(!body.to_string().contains("demo_"));
}

#[tokio::test]
async fn test_other_guest_cannot_read_session() {
    let (app, _) = test_app();
    let owner = guest_token(&app).await;
    let stranger = guest_token(&app).await;
    let id = open_session(&app, &owner).await;

    let (status, _) = send(&app, "GET", &format!("/v1/sessions/{}", id), Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "GET", &format!("/v1/sessions/{}", id), Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_search_is_unprocessable() {
    let (app, _) = test_app();
    let token = guest_token(&app).await;
    let body = json!({
        "trip_type": "ROUND_TRIP",
        "legs": [{ "origin_airport_code": "LAX", "destination_airport_code": "JFK", "date": "2026-12-14" }],
        "pax": { "adults": 1 }
    });
    let (status, body) = send(&app, "POST", "/v1/sessions", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_PARAMETERS");
}

#[tokio::test]
async fn test_booking_flow_over_http() {
    let (app, _) = test_app();
    let token = guest_token(&app).await;
    let id = open_session(&app, &token).await;
    let path = format!("/v1/sessions/{}/advance", id);

    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("SEARCH", json!({ "type": "search" })))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);

    let (status, body) = send(
        &app,
        "POST",
        &path,
        Some(&token),
        Some(advance("PRICE", json!({ "type": "price", "trips": [1] }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PRICED");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/sessions/{}/lookups", id),
        Some(&token),
        Some(json!({ "kind": "FARE_RULE" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoint"], "FARE_RULE");

    let itinerary = json!({
        "type": "itinerary",
        "travelers": [{ "passenger_type": "ADULT", "first_name": "Grace", "last_name": "Hopper" }],
        "contact": { "email": "grace@example.test", "phone": "+15550123" }
    });
    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("ITINERARY", itinerary))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ITINERARY_CREATED");
    assert!(!body.to_string().contains("grace@example.test"));

    let payment = json!({ "type": "payment", "method": { "kind": "CARD", "token": "tok_mastercard" } });
    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("PAYMENT", payment))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PAYMENT_PENDING");
    assert!(!body.to_string().contains("tok_mastercard"));

    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("TICKET", json!({ "type": "ticket" })))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "TICKETED");

    let (status, body) = send(&app, "GET", &format!("/v1/sessions/{}/booking", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "TICKETED");

    let metrics = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let text = axum::body::to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("skyway_advances_total"));
    assert!(text.contains("skyway_gateway_calls_total"));
}

#[tokio::test]
async fn test_error_statuses() {
    let (app, gateway) = test_app();
    let token = guest_token(&app).await;
    let id = open_session(&app, &token).await;
    let path = format!("/v1/sessions/{}/advance", id);

    // Out of order
    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("TICKET", json!({ "type": "ticket" })))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    assert_eq!(body["session"]["version"], 0);

    // Stale version
    let stale = json!({ "step": "SEARCH", "expected_version": 3, "input": { "type": "search" } });
    let (status, body) = send(&app, "POST", &path, Some(&token), Some(stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STALE_SESSION");

    // Upstream down through every attempt
    gateway
        .push_error(Endpoint::Search, GatewayError::network("connection refused"))
        .push_error(Endpoint::Search, GatewayError::network("connection refused"));
    let (status, body) = send(&app, "POST", &path, Some(&token), Some(advance("SEARCH", json!({ "type": "search" })))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "NETWORK");
    assert_eq!(body["session"]["status"], "FAILED");

    // Cancelled sessions are gone
    let (status, body) = send(&app, "POST", &format!("/v1/sessions/{}/cancel", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    let (status, _) = send(&app, "POST", &path, Some(&token), Some(advance("SEARCH", json!({ "type": "search" })))).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _) = send(&app, "GET", &format!("/v1/sessions/{}", uuid::Uuid::new_v4()), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_open_circuit_keeps_local_routes_available() {
    let (app, gateway) = test_app();
    let token = guest_token(&app).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(open_session(&app, &token).await);
    }
    for id in &ids {
        gateway
            .push_error(Endpoint::Search, GatewayError::from_status(503, "maintenance"))
            .push_error(Endpoint::Search, GatewayError::from_status(503, "maintenance"));
        let path = format!("/v1/sessions/{}/advance", id);
        let (status, _) = send(&app, "POST", &path, Some(&token), Some(advance("SEARCH", json!({ "type": "search" })))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    // Upstream-facing routes fail fast now.
    let (status, body) = send(&app, "POST", "/v1/sessions", Some(&token), Some(search_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "CIRCUIT_OPEN");

    let (status, body) = send(&app, "GET", &format!("/v1/sessions/{}", ids[0]), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAILED");

    let (status, body) = send(&app, "POST", &format!("/v1/sessions/{}/cancel", ids[0]), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
}
