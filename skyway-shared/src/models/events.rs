use uuid::Uuid;

/// What happened to a booking session.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventKind {
    Created,
    StepCompleted,
    StepRejected,
    Failed,
    Cancelled,
    PaymentReopened,
}

/// Published on every session state change. Consumed by the SSE stream and
/// relayed to Kafka (`booking.sessions`).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub kind: SessionEventKind,
    pub status: String,
    pub step: Option<String>,
    pub version: u64,
    pub detail: Option<String>,
    pub timestamp: i64,
}

impl SessionEvent {
    pub fn new(
        session_id: Uuid,
        kind: SessionEventKind,
        status: impl Into<String>,
        step: Option<String>,
        version: u64,
    ) -> Self {
        Self {
            session_id,
            kind,
            status: status.into(),
            step,
            version,
            detail: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
