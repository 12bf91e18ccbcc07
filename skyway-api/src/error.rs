use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skyway_booking::AdvanceFailure;
use skyway_core::BookingError;

use crate::sessions::SessionView;

#[derive(Debug)]
pub enum AppError {
    AuthorizationError(String),
    /// Domain error, with the session as it stands when there is one
    Booking(BookingError, Option<Box<SessionView>>),
    InternalServerError(String),
}

pub fn booking_status(error: &BookingError) -> StatusCode {
    match error {
        BookingError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        BookingError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        BookingError::StaleSession(_) => StatusCode::CONFLICT,
        BookingError::SessionExpired(_) | BookingError::SessionCancelled(_) => StatusCode::GONE,
        BookingError::Upstream4xx(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::Network(_) | BookingError::Upstream5xx(_) | BookingError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::Booking(error, session) => {
                let status = booking_status(&error);
                if status == StatusCode::BAD_GATEWAY {
                    tracing::warn!("Booking API failure: {}", error);
                }
                (
                    status,
                    json!({
                        "error": error.to_string(),
                        "code": error.code(),
                        "session": session,
                    }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        AppError::Booking(err, None)
    }
}

impl From<AdvanceFailure> for AppError {
    fn from(failure: AdvanceFailure) -> Self {
        let session = failure.session.as_ref().map(|s| Box::new(SessionView::from(s)));
        AppError::Booking(failure.error, session)
    }
}
