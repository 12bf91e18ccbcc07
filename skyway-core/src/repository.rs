use async_trait::async_trait;
use uuid::Uuid;
use crate::session::BookingSession;

/// Snapshot persistence for booking sessions.
///
/// Sessions live in memory while active; snapshots let another process (or a
/// restarted one) pick a session up where it was left.
#[async_trait]
pub trait SessionSnapshots: Send + Sync {
    async fn save(
        &self,
        session: &BookingSession,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn load(
        &self,
        id: Uuid,
    ) -> Result<Option<BookingSession>, Box<dyn std::error::Error + Send + Sync>>;

    async fn delete(
        &self,
        id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
