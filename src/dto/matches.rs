use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        format_epoch_millis,
        validation::{validate_identifier, validate_reaction},
    },
    services::{
        match_service::{LeaveOutcome, SubmitOutcome},
        settlement_service::{AppliedAward, SettlementReport},
    },
    state::{
        Reveal,
        matches::{Match, MatchMode},
    },
};

/// Requested match mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchModeDto {
    /// Ranked two-player pairing.
    #[default]
    Auto,
    /// Private two-player room.
    Custom,
    /// Two to four participants answering every question.
    #[serde(alias = "4p")]
    Multi,
}

impl From<MatchModeDto> for MatchMode {
    fn from(value: MatchModeDto) -> Self {
        match value {
            MatchModeDto::Auto => MatchMode::Auto,
            MatchModeDto::Custom => MatchMode::Custom,
            MatchModeDto::Multi => MatchMode::Multi,
        }
    }
}

/// Participant seated at match creation.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ParticipantInput {
    /// Profile identifier.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    #[serde(default)]
    pub avatar: String,
}

impl Validate for ParticipantInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_identifier(&self.user_id) {
            errors.add("user_id", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload used to open a new match.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateMatchRequest {
    /// Explicit id; doubles as the question shuffle seed. Generated when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_identifier"))]
    pub match_id: Option<String>,
    /// Chapter id, or `ALL_<subject id>` for every chapter of a subject.
    #[validate(length(min = 1))]
    pub subject: String,
    /// Display title of the subject.
    #[serde(default)]
    pub subject_title: Option<String>,
    /// Match mode, `auto` by default.
    #[serde(default)]
    pub mode: MatchModeDto,
    /// Number of rounds; the configured default applies when omitted.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub question_limit: Option<u32>,
    /// Two participants for a duel, up to four in multi mode.
    #[validate(length(min = 2, max = 4), nested)]
    pub players: Vec<ParticipantInput>,
    /// Participant opening the first round; picked at random when omitted.
    #[serde(default)]
    pub first_turn: Option<String>,
}

/// Answer to the current question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    /// Index into the options as delivered by the question endpoint.
    pub option: usize,
}

/// Social reaction sent during a match.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReactionRequest {
    /// Reaction text or emoji.
    #[validate(custom(function = "validate_reaction"))]
    pub value: String,
}

/// Participant as shown to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PlayerView {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    pub avatar: String,
    /// Current score.
    pub score: u32,
    /// Profile level at join time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// `online` or `offline` once the participant connected at least once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<String>,
    /// RFC 3339 time of the last presence change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    /// Multi mode: participant already answered the current question.
    pub answered: bool,
}

/// Watcher as shown to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SpectatorView {
    /// User id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    pub avatar: String,
}

/// Last reaction as shown to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ReactionView {
    /// Reacting user.
    pub sender_id: String,
    /// Reaction text or emoji.
    pub value: String,
    /// RFC 3339 send time.
    pub sent_at: String,
}

/// Public projection of a match record.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct MatchView {
    /// Match identifier.
    pub match_id: String,
    /// `active`, `completed` or `cancelled`.
    pub status: String,
    /// `auto`, `custom` or `multi`.
    pub mode: String,
    /// Chapter id or `ALL_<subject id>`.
    pub subject: String,
    /// Display title of the subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_title: Option<String>,
    /// Rounds to play.
    pub question_limit: u32,
    /// Zero-based index of the question in play.
    pub current_question: u32,
    /// Participant allowed to answer (duels).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<String>,
    /// Answers given for the current question (duels).
    pub answers_count: u8,
    /// Participants in seat order.
    pub players: Vec<PlayerView>,
    /// Participant id, `draw` or `disconnect` once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Participant whose surrender or disconnect ended the match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forfeited_by: Option<String>,
    /// Watchers in join order.
    pub spectators: Vec<SpectatorView>,
    /// Most recent reaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reaction: Option<ReactionView>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<&Match> for MatchView {
    fn from(record: &Match) -> Self {
        Self {
            match_id: record.id.to_string(),
            status: record.status.as_str().to_string(),
            mode: record.mode.as_str().to_string(),
            subject: record.source.key(),
            subject_title: record.subject_title.clone(),
            question_limit: record.question_limit,
            current_question: record.current_q,
            turn: record.turn.as_ref().map(ToString::to_string),
            answers_count: record.answers_count,
            players: record
                .players
                .iter()
                .map(|(uid, player)| PlayerView {
                    user_id: uid.to_string(),
                    name: player.name.clone(),
                    avatar: player.avatar.clone(),
                    score: record.score_of(uid),
                    level: player.level,
                    presence: player.presence.map(|presence| presence.as_str().to_string()),
                    last_seen: player.last_seen.map(format_epoch_millis),
                    answered: record.current_answers.contains(uid),
                })
                .collect(),
            winner: record.winner.as_ref().map(|winner| winner.as_record_value()),
            forfeited_by: record.forfeited_by.as_ref().map(ToString::to_string),
            spectators: record
                .spectators
                .iter()
                .map(|(uid, spectator)| SpectatorView {
                    user_id: uid.to_string(),
                    name: spectator.name.clone(),
                    avatar: spectator.avatar.clone(),
                })
                .collect(),
            last_reaction: record.last_reaction.as_ref().map(|reaction| ReactionView {
                sender_id: reaction.sender.to_string(),
                value: reaction.value.clone(),
                sent_at: format_epoch_millis(reaction.timestamp),
            }),
            created_at: format_epoch_millis(record.created_at),
        }
    }
}

/// Immediate feedback on an answer, broadcast before the round is written.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AnswerRevealedEvent {
    /// Answering participant.
    pub user_id: String,
    /// Question the answer is for.
    pub question_index: u32,
    /// Chosen option.
    pub option: usize,
    /// Whether the chosen option is right.
    pub correct: bool,
    /// Index of the right option.
    pub correct_option: usize,
}

impl From<&Reveal> for AnswerRevealedEvent {
    fn from(reveal: &Reveal) -> Self {
        Self {
            user_id: reveal.user.to_string(),
            question_index: reveal.question_index,
            option: reveal.option,
            correct: reveal.correct,
            correct_option: reveal.correct_option,
        }
    }
}

/// Result of an answer submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitAnswerResponse {
    /// False when the answer was ignored (wrong turn, duplicate, stale).
    pub accepted: bool,
    /// Why the answer was ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Feedback for an accepted answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal: Option<AnswerRevealedEvent>,
    /// Record after an accepted answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MatchView>,
}

impl From<SubmitOutcome> for SubmitAnswerResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Accepted { reveal, record } => Self {
                accepted: true,
                reason: None,
                reveal: Some((&reveal).into()),
                state: Some((&record).into()),
            },
            SubmitOutcome::Ignored(reason) => Self {
                accepted: false,
                reason: Some(reason),
                reveal: None,
                state: None,
            },
        }
    }
}

/// Points credited to one participant.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AwardView {
    /// Credited participant.
    pub user_id: String,
    /// Points owed.
    pub points: u32,
    /// False when this match had already been credited to the user.
    pub applied: bool,
}

impl From<&AppliedAward> for AwardView {
    fn from(award: &AppliedAward) -> Self {
        Self {
            user_id: award.user.to_string(),
            points: award.points,
            applied: award.applied,
        }
    }
}

/// Match state after a surrender, with the resulting awards.
#[derive(Debug, Serialize, ToSchema)]
pub struct SurrenderResponse {
    /// Record after the surrender.
    pub state: MatchView,
    /// One entry per participant.
    pub awards: Vec<AwardView>,
}

impl SurrenderResponse {
    /// Combine the final record with its settlement.
    pub fn new(record: &Match, report: &SettlementReport) -> Self {
        Self {
            state: record.into(),
            awards: report.awards.iter().map(AwardView::from).collect(),
        }
    }
}

/// Result of leaving a match.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveResponse {
    /// The leave ended a running match by surrender.
    pub surrendered: bool,
    /// The record was removed because nobody remained.
    pub deleted: bool,
}

impl From<LeaveOutcome> for LeaveResponse {
    fn from(outcome: LeaveOutcome) -> Self {
        Self {
            surrendered: outcome.surrendered,
            deleted: outcome.deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_input_serialises_for_forwarded_requests() {
        let input = ParticipantInput {
            user_id: "ann".into(),
            name: "Ann".into(),
            avatar: String::new(),
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["user_id"], "ann");

        let back: ParticipantInput = serde_json::from_value(json).unwrap();
        assert!(back.validate().is_ok());
    }

    #[test]
    fn create_request_rejects_a_participant_with_a_path_in_its_id() {
        let request: CreateMatchRequest = serde_json::from_value(serde_json::json!({
            "subject": "chapter-1",
            "players": [
                {"user_id": "ann", "name": "Ann"},
                {"user_id": "bob/../x", "name": "Bob"}
            ]
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }
}
