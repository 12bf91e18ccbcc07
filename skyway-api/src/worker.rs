use std::sync::Arc;
use std::time::Duration;
use skyway_booking::BookingCoordinator;
use skyway_shared::SessionEvent;
use skyway_store::EventProducer;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, error, warn};

use crate::metrics::Metrics;

/// Forward every session event to Kafka until the coordinator goes away.
pub async fn start_event_relay(
    mut rx: broadcast::Receiver<SessionEvent>,
    producer: Arc<EventProducer>,
    topic: String,
    metrics: Arc<Metrics>,
) {
    info!("Event relay started, publishing to {}", topic);

    loop {
        match rx.recv().await {
            Ok(event) => match producer.publish_session_event(&topic, &event).await {
                Ok(()) => metrics.events_relayed.with_label_values(&["ok"]).inc(),
                Err(e) => {
                    error!("Failed to relay {:?} for session {}: {}", event.kind, event.session_id, e);
                    metrics.events_relayed.with_label_values(&["error"]).inc();
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event relay lagged, {} events dropped", skipped);
                metrics.events_relayed.with_label_values(&["dropped"]).inc_by(skipped);
            }
            Err(RecvError::Closed) => {
                info!("Event channel closed, relay stopping");
                break;
            }
        }
    }
}

/// Periodically drop expired sessions from memory.
pub async fn start_expiry_sweeper(coordinator: Arc<BookingCoordinator>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    info!("Expiry sweeper started (every {:?})", every);

    loop {
        interval.tick().await;
        coordinator.purge_expired().await;
    }
}
