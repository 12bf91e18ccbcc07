use super::demo::DemoGateway;
use async_trait::async_trait;
use skyway_core::gateway::{
    Credential, Endpoint, GatewayError, GatewayRequest, GatewayResponse, IdempotencyKey, RemoteGateway,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Outcome = Result<GatewayResponse, GatewayError>;

/// Gateway whose outcomes are queued per endpoint ahead of time.
///
/// Endpoints with nothing queued answer like `DemoGateway`. Every call is
/// counted, including the ones that fail.
#[derive(Default)]
pub struct ScriptedGateway {
    fallback: DemoGateway,
    queued: Mutex<HashMap<Endpoint, VecDeque<Outcome>>>,
    latency: Mutex<HashMap<Endpoint, Duration>>,
    auth_failure: Mutex<Option<GatewayError>>,
    calls: Mutex<Vec<(Endpoint, String)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&self, endpoint: Endpoint, error: GatewayError) -> &Self {
        self.push(endpoint, Err(error))
    }

    pub fn push_response(&self, endpoint: Endpoint, response: GatewayResponse) -> &Self {
        self.push(endpoint, Ok(response))
    }

    /// Every call to `endpoint` sleeps this long before answering
    pub fn set_latency(&self, endpoint: Endpoint, latency: Duration) -> &Self {
        lock(&self.latency).insert(endpoint, latency);
        self
    }

    pub fn fail_authentication(&self, error: GatewayError) -> &Self {
        *lock(&self.auth_failure) = Some(error);
        self
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        lock(&self.calls).iter().filter(|(e, _)| *e == endpoint).count()
    }

    /// Idempotency keys sent to `endpoint`, in call order
    pub fn keys_for(&self, endpoint: Endpoint) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn push(&self, endpoint: Endpoint, outcome: Outcome) -> &Self {
        lock(&self.queued).entry(endpoint).or_default().push_back(outcome);
        self
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn authenticate(&self) -> Result<Credential, GatewayError> {
        let failure = lock(&self.auth_failure).clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.fallback.authenticate().await
    }

    async fn call(
        &self,
        key: &IdempotencyKey,
        _credential: &Credential,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let endpoint = request.endpoint();
        lock(&self.calls).push((endpoint, key.to_string()));

        let latency = lock(&self.latency).get(&endpoint).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let queued = lock(&self.queued).get_mut(&endpoint).and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(self.fallback.respond(request)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
