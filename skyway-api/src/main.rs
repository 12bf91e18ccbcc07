use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use skyway_api::{app, state::{AppState, AuthConfig}, worker};
use skyway_booking::{BookingCoordinator, CoordinatorConfig, DemoGateway, HttpGateway, HttpGatewayConfig, RetryConfig};
use skyway_core::RemoteGateway;
use skyway_shared::Masked;
use skyway_store::app_config::{Config, GatewayMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyway_api=debug,skyway_booking=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Skyway API on port {}", config.server.port);

    let gateway: Arc<dyn RemoteGateway> = match config.gateway.mode {
        GatewayMode::Http => {
            tracing::info!("Using booking API at {}", config.gateway.base_url);
            Arc::new(
                HttpGateway::new(HttpGatewayConfig {
                    base_url: config.gateway.base_url.clone(),
                    client_id: config.gateway.client_id.clone(),
                    client_secret: Masked::new(config.gateway.client_secret.clone()),
                    timeout: Duration::from_millis(config.gateway.timeout_ms),
                    credential_ttl: chrono::Duration::seconds(config.gateway.credential_ttl_seconds),
                })
                .context("Failed to build HTTP gateway")?,
            )
        }
        GatewayMode::Demo => {
            tracing::warn!("Using the demo gateway: no real bookings will be made");
            Arc::new(DemoGateway::new())
        }
    };

    let rules = &config.booking;
    let coordinator_config = CoordinatorConfig {
        session_ttl: chrono::Duration::seconds(rules.session_ttl_seconds),
        call_timeout: Duration::from_millis(config.gateway.timeout_ms),
        retry: RetryConfig {
            max_attempts: rules.max_attempts,
            initial_backoff: Duration::from_millis(rules.initial_backoff_ms),
            max_backoff: Duration::from_millis(rules.max_backoff_ms),
            multiplier: rules.backoff_multiplier,
            jitter: rules.jitter,
        },
    };

    // Redis Connection
    let redis = Arc::new(
        skyway_store::RedisClient::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    // Kafka Connection
    let kafka = Arc::new(
        skyway_store::EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?,
    );

    let coordinator = Arc::new(BookingCoordinator::new(gateway, coordinator_config).with_snapshots(redis.clone()));

    let app_state = AppState::new(
        coordinator.clone(),
        Some(redis),
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        config.server.rate_limit_per_minute,
    )
    .context("Failed to register metrics")?;

    tokio::spawn(worker::start_event_relay(
        coordinator.subscribe(),
        kafka,
        config.kafka.topic.clone(),
        app_state.metrics.clone(),
    ));
    tokio::spawn(worker::start_expiry_sweeper(
        coordinator.clone(),
        Duration::from_secs(rules.sweep_interval_seconds),
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>()
    ).await?;
    Ok(())
}
