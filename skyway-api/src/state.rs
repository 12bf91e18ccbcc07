use crate::metrics::Metrics;
use crate::middleware::resiliency::CircuitBreaker;
use skyway_booking::BookingCoordinator;
use skyway_store::RedisClient;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

pub struct ResiliencyState {
    /// Trips when the booking API keeps answering with 5xx/502
    pub gateway_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            gateway_cb: CircuitBreaker::new("booking-gateway", 5, Duration::from_secs(30)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BookingCoordinator>,
    /// Rate limiting is skipped without Redis
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
    pub resiliency: Arc<ResiliencyState>,
    pub metrics: Arc<Metrics>,
    pub rate_limit_per_minute: i64,
}

impl AppState {
    pub fn new(
        coordinator: Arc<BookingCoordinator>,
        redis: Option<Arc<RedisClient>>,
        auth: AuthConfig,
        rate_limit_per_minute: i64,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            coordinator,
            redis,
            auth,
            resiliency: Arc::new(ResiliencyState::default()),
            metrics: Arc::new(Metrics::new()?),
            rate_limit_per_minute,
        })
    }
}
