use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dto::matches::{AnswerRevealedEvent, MatchView},
    state::MatchEvent,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from match WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchInboundMessage {
    /// First message of every connection.
    Identification {
        /// Connecting user.
        user_id: String,
        /// Display name used when joining as a spectator.
        #[serde(default)]
        name: Option<String>,
        /// Avatar used when joining as a spectator.
        #[serde(default)]
        avatar: Option<String>,
    },
    /// Answer to the current question.
    Answer {
        /// Chosen option.
        option: usize,
    },
    /// Give up the match.
    Surrender,
    /// Explicit departure; pending disconnect handling is cancelled.
    Leave,
    /// Social reaction.
    React {
        /// Reaction text or emoji.
        value: String,
    },
    /// Any other message type; ignored.
    #[serde(other)]
    Unknown,
}

/// Role granted to a connection after identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// Plays in the match.
    Participant,
    /// Watches the match.
    Spectator,
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to match WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchOutboundMessage {
    /// Identification succeeded.
    Joined {
        /// Role granted to the connection.
        role: ConnectionRole,
        /// Record at join time.
        state: MatchView,
    },
    /// The record changed.
    MatchUpdated {
        /// Committed record.
        state: MatchView,
    },
    /// An answer is being revealed.
    AnswerRevealed(AnswerRevealedEvent),
    /// The record was removed; the server closes the socket.
    MatchDeleted,
    /// An action was ignored without changing the match.
    Rejected {
        /// Why nothing changed.
        reason: String,
    },
    /// The request failed.
    Error {
        /// Failure description.
        message: String,
    },
}

impl From<&MatchEvent> for MatchOutboundMessage {
    fn from(event: &MatchEvent) -> Self {
        match event {
            MatchEvent::Updated(record) => MatchOutboundMessage::MatchUpdated {
                state: record.as_ref().into(),
            },
            MatchEvent::AnswerRevealed(reveal) => MatchOutboundMessage::AnswerRevealed(reveal.into()),
            MatchEvent::Deleted => MatchOutboundMessage::MatchDeleted,
        }
    }
}
