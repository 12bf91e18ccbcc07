use axum::{
    extract::State,
    Json,
    routing::post,
    Router,
};
use serde::Serialize;
use jsonwebtoken::{encode, Header, EncodingKey};
use chrono::{Utc, Duration};
use uuid::Uuid;
use crate::{state::AppState, error::AppError, middleware::auth::{CustomerClaims, ROLE_GUEST}};

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub subject: String,
    pub expires_at: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// Anonymous shoppers get a short-lived identity that owns their sessions.
async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let expires_at = (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp();
    let claims = CustomerClaims {
        sub: format!("guest-{}", Uuid::new_v4()),
        email: None,
        role: ROLE_GUEST.to_owned(),
        exp: expires_at as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(state.auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    Ok(Json(AuthResponse { token, subject: claims.sub, expires_at }))
}
