pub mod search;
pub mod iata;
pub mod step;
pub mod session;
pub mod gateway;
pub mod validator;
pub mod repository;

use uuid::Uuid;

pub use gateway::{GatewayError, GatewayErrorKind, RemoteGateway};
pub use session::{BookingSession, SessionStatus, RemoteCallRecord};
pub use step::{Step, StepInput};
pub use validator::DenyReason;

/// Everything that can go wrong while coordinating a booking session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: DenyReason,
    },
    #[error("Session expired: {0}")]
    SessionExpired(Uuid),
    #[error("Session was modified concurrently: {0}")]
    StaleSession(Uuid),
    #[error("Session not found: {0}")]
    NotFound(Uuid),
    #[error("Session cancelled: {0}")]
    SessionCancelled(Uuid),
    #[error("Invalid search parameters: {0}")]
    InvalidParameters(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Upstream rejected request: {0}")]
    Upstream4xx(String),
    #[error("Upstream fault: {0}")]
    Upstream5xx(String),
    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

impl BookingError {
    /// Stable machine-readable code, used in API bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BookingError::SessionExpired(_) => "SESSION_EXPIRED",
            BookingError::StaleSession(_) => "STALE_SESSION",
            BookingError::NotFound(_) => "NOT_FOUND",
            BookingError::SessionCancelled(_) => "SESSION_CANCELLED",
            BookingError::InvalidParameters(_) => "INVALID_PARAMETERS",
            BookingError::Network(_) => "NETWORK",
            BookingError::Upstream4xx(_) => "UPSTREAM_4XX",
            BookingError::Upstream5xx(_) => "UPSTREAM_5XX",
            BookingError::Malformed(_) => "MALFORMED",
        }
    }

    pub fn denied(session: &BookingSession, to: impl std::fmt::Display, reason: DenyReason) -> Self {
        BookingError::InvalidTransition {
            from: session.step.map(|s| s.to_string()).unwrap_or_else(|| "NEW".to_string()),
            to: to.to_string(),
            reason,
        }
    }
}

impl From<GatewayError> for BookingError {
    fn from(err: GatewayError) -> Self {
        match err.kind {
            GatewayErrorKind::Network => BookingError::Network(err.detail),
            GatewayErrorKind::Upstream4xx => BookingError::Upstream4xx(err.detail),
            GatewayErrorKind::Upstream5xx => BookingError::Upstream5xx(err.detail),
            GatewayErrorKind::Malformed => BookingError::Malformed(err.detail),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
