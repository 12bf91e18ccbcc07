use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, RedisResult};
use skyway_core::repository::SessionSnapshots;
use skyway_core::BookingSession;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

pub fn session_key(id: Uuid) -> String {
    format!("session:{}", id)
}

/// Seconds a snapshot should live: whatever validity the session has left,
/// at least one second.
pub fn snapshot_ttl(session: &BookingSession) -> u64 {
    (session.expires_at - Utc::now()).num_seconds().max(1) as u64
}

#[async_trait]
impl SessionSnapshots for RedisClient {
    async fn save(
        &self,
        session: &BookingSession,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(session)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(session_key(session.id), payload, snapshot_ttl(session)).await?;
        debug!("Snapshot saved: {} v{}", session.id, session.version);
        Ok(())
    }

    async fn load(
        &self,
        id: Uuid,
    ) -> Result<Option<BookingSession>, Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(session_key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(
        &self,
        id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(session_key(id)).await?;
        Ok(())
    }
}
