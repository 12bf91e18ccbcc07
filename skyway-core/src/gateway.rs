use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use skyway_shared::Masked;
use std::fmt;

use crate::iata::{ContactInfo, PaymentMethod, Traveler};
use crate::search::{FlightOffer, Money, SearchParameters};
use crate::step::Step;

// ============================================================================
// Endpoints & errors
// ============================================================================

/// Remote booking API operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endpoint {
    Signature,
    Search,
    Pricing,
    Itinerary,
    Payment,
    Ticket,
    Cancel,
    Ssr,
    SeatLayout,
    FareRule,
    Retrieve,
}

impl Endpoint {
    pub fn for_step(step: Step) -> Self {
        match step {
            Step::Search => Endpoint::Search,
            Step::Price => Endpoint::Pricing,
            Step::Itinerary => Endpoint::Itinerary,
            Step::Payment => Endpoint::Payment,
            Step::Ticket => Endpoint::Ticket,
        }
    }

    /// Path relative to the gateway base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Signature => "auth/signature",
            Endpoint::Search => "flights/search",
            Endpoint::Pricing => "flights/pricing",
            Endpoint::Itinerary => "bookings/itinerary",
            Endpoint::Payment => "bookings/payment",
            Endpoint::Ticket => "bookings/ticket",
            Endpoint::Cancel => "bookings/cancel",
            Endpoint::Ssr => "flights/ssr",
            Endpoint::SeatLayout => "flights/seat-layout",
            Endpoint::FareRule => "flights/fare-rules",
            Endpoint::Retrieve => "bookings/retrieve",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Signature => "signature",
            Endpoint::Search => "search",
            Endpoint::Pricing => "pricing",
            Endpoint::Itinerary => "itinerary",
            Endpoint::Payment => "payment",
            Endpoint::Ticket => "ticket",
            Endpoint::Cancel => "cancel",
            Endpoint::Ssr => "ssr",
            Endpoint::SeatLayout => "seat_layout",
            Endpoint::FareRule => "fare_rule",
            Endpoint::Retrieve => "retrieve",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorKind {
    /// Connection failure or timeout
    Network,
    /// Payload rejected by the remote API
    Upstream4xx,
    /// Remote fault
    Upstream5xx,
    /// Response did not match the expected shape
    Malformed,
}

impl GatewayErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayErrorKind::Network => "network",
            GatewayErrorKind::Upstream4xx => "upstream_4xx",
            GatewayErrorKind::Upstream5xx => "upstream_5xx",
            GatewayErrorKind::Malformed => "malformed",
        }
    }
}

/// Normalized failure of a single gateway call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{} error: {detail}", .kind.as_str())]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub detail: String,
    pub status: Option<u16>,
}

impl GatewayError {
    pub fn network(detail: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Network, detail: detail.into(), status: None }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Malformed, detail: detail.into(), status: None }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self { kind: GatewayErrorKind::Upstream4xx, detail: detail.into(), status: None }
    }

    /// Classify a non-success HTTP status. Anything below 500 counts as a rejection.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let kind = if status >= 500 {
            GatewayErrorKind::Upstream5xx
        } else {
            GatewayErrorKind::Upstream4xx
        };
        Self { kind, detail: detail.into(), status: Some(status) }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, GatewayErrorKind::Network | GatewayErrorKind::Upstream5xx)
    }
}

/// Bearer credential from the signature exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub token: Masked<String>,
    pub expires_at: DateTime<Utc>,
}

/// Session token + operation. Stable across retries of the same step so a
/// deduplicating layer in front of the adapter can collapse them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(token: &str, endpoint: Endpoint) -> Self {
        Self(format!("{}:{}", token, endpoint.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub params: SearchParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub tui: String,
    pub offers: Vec<FlightOffer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingRequest {
    pub tui: String,
    pub fare_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingResponse {
    pub tui: String,
    pub fare_ids: Vec<String>,
    pub total_fare: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItineraryRequest {
    pub tui: String,
    pub fare_ids: Vec<String>,
    pub travelers: Vec<Traveler>,
    pub contact: ContactInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItineraryResponse {
    pub itinerary_id: String,
    pub total_fare: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRequest {
    pub tui: String,
    pub itinerary_id: String,
    pub transaction_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemotePaymentStatus {
    Succeeded,
    Pending,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentResponse {
    pub transaction_id: String,
    pub status: RemotePaymentStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketRequest {
    pub tui: String,
    pub itinerary_id: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketResponse {
    pub pnr: String,
    pub ticket_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelRequest {
    pub itinerary_id: String,
    pub pnr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub refund: Option<Money>,
}

/// Shared request shape for SSR, seat layout and fare rule lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AncillaryRequest {
    pub tui: String,
    pub fare_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsrOffer {
    pub code: String,
    pub description: String,
    pub flight_number: String,
    pub price: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsrResponse {
    pub services: Vec<SsrOffer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatOption {
    pub flight_number: String,
    pub seat_number: String,
    pub available: bool,
    pub price: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatLayoutResponse {
    pub seats: Vec<SeatOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FareRule {
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FareRuleResponse {
    pub rules: Vec<FareRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieveRequest {
    pub itinerary_id: String,
    pub pnr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieveResponse {
    pub itinerary_id: String,
    pub pnr: Option<String>,
    pub status: String,
    pub total_fare: Money,
}

// ============================================================================
// Tagged request / response
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "endpoint", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayRequest {
    Search(SearchRequest),
    Pricing(PricingRequest),
    Itinerary(ItineraryRequest),
    Payment(PaymentRequest),
    Ticket(TicketRequest),
    Cancel(CancelRequest),
    Ssr(AncillaryRequest),
    SeatLayout(AncillaryRequest),
    FareRule(AncillaryRequest),
    Retrieve(RetrieveRequest),
}

impl GatewayRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            GatewayRequest::Search(_) => Endpoint::Search,
            GatewayRequest::Pricing(_) => Endpoint::Pricing,
            GatewayRequest::Itinerary(_) => Endpoint::Itinerary,
            GatewayRequest::Payment(_) => Endpoint::Payment,
            GatewayRequest::Ticket(_) => Endpoint::Ticket,
            GatewayRequest::Cancel(_) => Endpoint::Cancel,
            GatewayRequest::Ssr(_) => Endpoint::Ssr,
            GatewayRequest::SeatLayout(_) => Endpoint::SeatLayout,
            GatewayRequest::FareRule(_) => Endpoint::FareRule,
            GatewayRequest::Retrieve(_) => Endpoint::Retrieve,
        }
    }

    /// Body sent over the wire (the inner payload, without the tag).
    pub fn body(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            GatewayRequest::Search(r) => serde_json::to_value(r),
            GatewayRequest::Pricing(r) => serde_json::to_value(r),
            GatewayRequest::Itinerary(r) => serde_json::to_value(r),
            GatewayRequest::Payment(r) => serde_json::to_value(r),
            GatewayRequest::Ticket(r) => serde_json::to_value(r),
            GatewayRequest::Cancel(r) => serde_json::to_value(r),
            GatewayRequest::Ssr(r) | GatewayRequest::SeatLayout(r) | GatewayRequest::FareRule(r) => {
                serde_json::to_value(r)
            }
            GatewayRequest::Retrieve(r) => serde_json::to_value(r),
        }
    }

    /// Body as stored in the call history: payment instrument and contact
    /// details are replaced.
    pub fn audit_payload(&self) -> serde_json::Value {
        let mut body = self.body().unwrap_or(serde_json::Value::Null);
        match self {
            GatewayRequest::Payment(_) => {
                if let Some(method) = body.get_mut("method") {
                    method["token"] = serde_json::Value::String("********".to_string());
                }
            }
            GatewayRequest::Itinerary(_) => {
                body["contact"] = serde_json::Value::String("********".to_string());
            }
            _ => {}
        }
        body
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "endpoint", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayResponse {
    Search(SearchResponse),
    Pricing(PricingResponse),
    Itinerary(ItineraryResponse),
    Payment(PaymentResponse),
    Ticket(TicketResponse),
    Cancel(CancelResponse),
    Ssr(SsrResponse),
    SeatLayout(SeatLayoutResponse),
    FareRule(FareRuleResponse),
    Retrieve(RetrieveResponse),
}

macro_rules! expect_variant {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Result<$ty, GatewayError> {
            match self {
                GatewayResponse::$variant(inner) => Ok(inner),
                other => Err(GatewayError::malformed(format!(
                    "expected {} response, got {}",
                    Endpoint::$variant,
                    other.endpoint()
                ))),
            }
        }
    };
}

impl GatewayResponse {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            GatewayResponse::Search(_) => Endpoint::Search,
            GatewayResponse::Pricing(_) => Endpoint::Pricing,
            GatewayResponse::Itinerary(_) => Endpoint::Itinerary,
            GatewayResponse::Payment(_) => Endpoint::Payment,
            GatewayResponse::Ticket(_) => Endpoint::Ticket,
            GatewayResponse::Cancel(_) => Endpoint::Cancel,
            GatewayResponse::Ssr(_) => Endpoint::Ssr,
            GatewayResponse::SeatLayout(_) => Endpoint::SeatLayout,
            GatewayResponse::FareRule(_) => Endpoint::FareRule,
            GatewayResponse::Retrieve(_) => Endpoint::Retrieve,
        }
    }

    /// Decode a raw body for `endpoint` into the matching variant.
    pub fn decode(endpoint: Endpoint, body: serde_json::Value) -> Result<Self, GatewayError> {
        fn parse<T: serde::de::DeserializeOwned>(endpoint: Endpoint, body: serde_json::Value) -> Result<T, GatewayError> {
            serde_json::from_value(body)
                .map_err(|e| GatewayError::malformed(format!("{} response: {}", endpoint, e)))
        }

        let response = match endpoint {
            Endpoint::Search => GatewayResponse::Search(parse(endpoint, body)?),
            Endpoint::Pricing => GatewayResponse::Pricing(parse(endpoint, body)?),
            Endpoint::Itinerary => GatewayResponse::Itinerary(parse(endpoint, body)?),
            Endpoint::Payment => GatewayResponse::Payment(parse(endpoint, body)?),
            Endpoint::Ticket => GatewayResponse::Ticket(parse(endpoint, body)?),
            Endpoint::Cancel => GatewayResponse::Cancel(parse(endpoint, body)?),
            Endpoint::Ssr => GatewayResponse::Ssr(parse(endpoint, body)?),
            Endpoint::SeatLayout => GatewayResponse::SeatLayout(parse(endpoint, body)?),
            Endpoint::FareRule => GatewayResponse::FareRule(parse(endpoint, body)?),
            Endpoint::Retrieve => GatewayResponse::Retrieve(parse(endpoint, body)?),
            Endpoint::Signature => {
                return Err(GatewayError::malformed("signature is not a booking call"));
            }
        };
        response.validate()?;
        Ok(response)
    }

    /// Shape checks serde cannot express.
    pub fn validate(&self) -> Result<(), GatewayError> {
        fn required(field: &str, value: &str) -> Result<(), GatewayError> {
            if value.trim().is_empty() {
                return Err(GatewayError::malformed(format!("missing {}", field)));
            }
            Ok(())
        }

        match self {
            GatewayResponse::Search(r) => {
                required("tui", &r.tui)?;
                for offer in &r.offers {
                    required("fare_id", &offer.fare_id)?;
                }
                Ok(())
            }
            GatewayResponse::Pricing(r) => {
                required("tui", &r.tui)?;
                if r.fare_ids.is_empty() {
                    return Err(GatewayError::malformed("pricing response has no fares"));
                }
                required("currency", &r.total_fare.currency)?;
                if r.total_fare.amount < 0 {
                    return Err(GatewayError::malformed("negative total fare"));
                }
                Ok(())
            }
            GatewayResponse::Itinerary(r) => required("itinerary_id", &r.itinerary_id),
            GatewayResponse::Payment(r) => required("transaction_id", &r.transaction_id),
            GatewayResponse::Ticket(r) => required("pnr", &r.pnr),
            GatewayResponse::Retrieve(r) => required("itinerary_id", &r.itinerary_id),
            GatewayResponse::Cancel(_)
            | GatewayResponse::Ssr(_)
            | GatewayResponse::SeatLayout(_)
            | GatewayResponse::FareRule(_) => Ok(()),
        }
    }

    expect_variant!(into_search, Search, SearchResponse);
    expect_variant!(into_pricing, Pricing, PricingResponse);
    expect_variant!(into_itinerary, Itinerary, ItineraryResponse);
    expect_variant!(into_payment, Payment, PaymentResponse);
    expect_variant!(into_ticket, Ticket, TicketResponse);
    expect_variant!(into_cancel, Cancel, CancelResponse);
    expect_variant!(into_retrieve, Retrieve, RetrieveResponse);
}

// ============================================================================
// Adapter contract
// ============================================================================

/// Uniform access to the third-party booking API.
///
/// Implementations make exactly one outbound call per `call` and keep no
/// per-call state; retries and timeouts belong to the caller.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Signature/login exchange producing the bearer credential for a session.
    async fn authenticate(&self) -> Result<Credential, GatewayError>;

    async fn call(
        &self,
        key: &IdempotencyKey,
        credential: &Credential,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError>;
}
