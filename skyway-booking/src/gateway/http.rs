use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use skyway_core::gateway::{
    Credential, Endpoint, GatewayError, GatewayRequest, GatewayResponse, IdempotencyKey, RemoteGateway,
};
use skyway_shared::Masked;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest upstream error body kept in an error detail.
const MAX_DETAIL_LEN: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: Masked<String>,
    /// Per-request timeout enforced by the HTTP client
    pub timeout: Duration,
    /// Used when the signature response carries no expiry
    pub credential_ttl: ChronoDuration,
}

#[derive(Debug, Serialize)]
struct SignatureRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    token: String,
    expires_in: Option<i64>,
}

/// `RemoteGateway` over the third-party HTTP/JSON booking API.
pub struct HttpGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint.path())
    }

    async fn post(
        &self,
        endpoint: Endpoint,
        bearer: Option<&str>,
        key: Option<&IdempotencyKey>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut request = self.client.post(self.url(endpoint)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(key) = key {
            request = request.header("Idempotency-Key", key.as_str());
        }

        let response = request.send().await.map_err(|e| transport_error(endpoint, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(endpoint, e))?;

        if !status.is_success() {
            warn!("{} call returned {}", endpoint, status);
            return Err(GatewayError::from_status(status.as_u16(), truncate(&text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| GatewayError::malformed(format!("{} response is not JSON: {}", endpoint, e)))
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn authenticate(&self) -> Result<Credential, GatewayError> {
        let body = serde_json::to_value(SignatureRequest {
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose(),
        })
        .map_err(|e| GatewayError::malformed(e.to_string()))?;

        let value = self.post(Endpoint::Signature, None, None, &body).await?;
        let signature: SignatureResponse = serde_json::from_value(value)
            .map_err(|e| GatewayError::malformed(format!("signature response: {}", e)))?;
        if signature.token.trim().is_empty() {
            return Err(GatewayError::malformed("signature response has an empty token"));
        }

        let ttl = match signature.expires_in {
            Some(seconds) => ChronoDuration::try_seconds(seconds)
                .ok_or_else(|| GatewayError::malformed(format!("expires_in out of range: {}", seconds)))?,
            None => self.config.credential_ttl,
        };
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| GatewayError::malformed(format!("credential lifetime out of range: {}s", ttl.num_seconds())))?;
        debug!("Obtained gateway credential valid for {}s", ttl.num_seconds());

        Ok(Credential {
            token: Masked::new(signature.token),
            expires_at,
        })
    }

    async fn call(
        &self,
        key: &IdempotencyKey,
        credential: &Credential,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let endpoint = request.endpoint();
        let body = request
            .body()
            .map_err(|e| GatewayError::malformed(format!("cannot encode {} request: {}", endpoint, e)))?;

        let value = self
            .post(endpoint, Some(credential.token.expose()), Some(key), &body)
            .await?;
        GatewayResponse::decode(endpoint, value)
    }
}

fn transport_error(endpoint: Endpoint, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::network(format!("{} call timed out", endpoint))
    } else if err.is_decode() {
        GatewayError::malformed(format!("{} response could not be read: {}", endpoint, err))
    } else {
        GatewayError::network(format!("{} call failed: {}", endpoint, err))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_DETAIL_LEN {
        return text.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
