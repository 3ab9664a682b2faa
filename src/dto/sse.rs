use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::matches::{AnswerRevealedEvent, MatchView},
    state::MatchEvent,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// Serialized payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Render a match event for SSE observers.
    pub fn from_match_event(event: &MatchEvent) -> serde_json::Result<Self> {
        match event {
            MatchEvent::Updated(record) => Self::json(
                Some("match_updated".to_string()),
                &MatchView::from(record.as_ref()),
            ),
            MatchEvent::AnswerRevealed(reveal) => Self::json(
                Some("answer_revealed".to_string()),
                &AnswerRevealedEvent::from(reveal),
            ),
            MatchEvent::Deleted => Ok(Self {
                event: Some("match_deleted".to_string()),
                data: String::new(),
            }),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Observed match.
    pub match_id: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
    /// Current record, when it could be loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MatchView>,
}
