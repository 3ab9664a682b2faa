//! Strongly typed match record and the validation boundary from persisted entities.

use std::{fmt, str::FromStr};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dao::models::{MatchEntity, PlayerEntity, ReactionEntity, SpectatorEntity};

/// Sentinel subject prefix selecting every chapter of a subject.
pub const ALL_CHAPTERS_PREFIX: &str = "ALL_";
const WINNER_DRAW: &str = "draw";
const WINNER_DISCONNECT: &str = "disconnect";

/// Identifier of a match; also the seed of its question shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

/// Identifier of a user (participant or spectator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl MatchId {
    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Rounds are still being played.
    Active,
    /// A verdict was written.
    Completed,
    /// Only ever set by the matchmaking side (room abandoned before start).
    Cancelled,
}

impl MatchStatus {
    /// Value stored in the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(MatchStatus::Active),
            "completed" => Ok(MatchStatus::Completed),
            "cancelled" => Ok(MatchStatus::Cancelled),
            other => Err(RecordError::UnknownStatus(other.to_string())),
        }
    }
}

/// How the match was set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Ranked/random pairing.
    Auto,
    /// Private room with a configurable question count.
    Custom,
    /// More than two participants answering each question in any order.
    Multi,
}

impl MatchMode {
    /// Value stored in the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Auto => "auto",
            MatchMode::Custom => "custom",
            MatchMode::Multi => "multi",
        }
    }

    /// Whether the mode uses the alternating two-player turn protocol.
    pub fn is_duel(&self) -> bool {
        !matches!(self, MatchMode::Multi)
    }
}

impl FromStr for MatchMode {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(MatchMode::Auto),
            "custom" => Ok(MatchMode::Custom),
            "multi" | "4p" => Ok(MatchMode::Multi),
            other => Err(RecordError::UnknownMode(other.to_string())),
        }
    }
}

/// Where the questions of a match come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuestionSource {
    /// A single chapter.
    Chapter(String),
    /// Every chapter of the given subject, merged.
    AllChapters(String),
}

impl QuestionSource {
    /// Interpret a stored subject string.
    pub fn parse(subject: &str) -> Self {
        match subject.strip_prefix(ALL_CHAPTERS_PREFIX) {
            Some(subject_id) => QuestionSource::AllChapters(subject_id.to_string()),
            None => QuestionSource::Chapter(subject.to_string()),
        }
    }

    /// The subject string as stored in the match record; also the cache key.
    pub fn key(&self) -> String {
        match self {
            QuestionSource::Chapter(chapter) => chapter.clone(),
            QuestionSource::AllChapters(subject) => format!("{ALL_CHAPTERS_PREFIX}{subject}"),
        }
    }
}

/// Final outcome of a completed match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Winner {
    /// This participant won.
    Player(UserId),
    /// Equal scores.
    Draw,
    /// A participant dropped without leaving; see `Match::forfeited_by`.
    Disconnect,
}

impl Winner {
    fn parse(value: &str, players: &IndexMap<UserId, Player>) -> Result<Self, RecordError> {
        match value {
            WINNER_DRAW => Ok(Winner::Draw),
            WINNER_DISCONNECT => Ok(Winner::Disconnect),
            uid if players.contains_key(&UserId::from(uid)) => Ok(Winner::Player(uid.into())),
            other => Err(RecordError::UnknownWinner(other.to_string())),
        }
    }

    /// Value stored in the record's `winner` field.
    pub fn as_record_value(&self) -> String {
        match self {
            Winner::Player(uid) => uid.0.clone(),
            Winner::Draw => WINNER_DRAW.to_string(),
            Winner::Disconnect => WINNER_DISCONNECT.to_string(),
        }
    }
}

/// Connection state a participant advertises in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// A connection is attached.
    Online,
    /// The last connection dropped.
    Offline,
}

impl Presence {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(Presence::Online),
            "offline" => Some(Presence::Offline),
            _ => None,
        }
    }

    /// Value stored in the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::Offline => "offline",
        }
    }
}

/// Participant entry of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    pub avatar: String,
    /// Profile level at join time.
    pub level: Option<u32>,
    /// Unset until the participant first connects.
    pub presence: Option<Presence>,
    /// Milliseconds since the Unix epoch.
    pub last_seen: Option<u64>,
}

/// Watcher entry of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spectator {
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    pub avatar: String,
}

/// Last social reaction sent in a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// Reacting user.
    pub sender: UserId,
    /// Reaction text or emoji.
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Reasons a persisted record is refused at the typed boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Status string outside the known set.
    #[error("unknown match status `{0}`")]
    UnknownStatus(String),
    /// Mode string outside the known set.
    #[error("unknown match mode `{0}`")]
    UnknownMode(String),
    /// Winner that is neither a participant nor a verdict.
    #[error("unknown winner `{0}`")]
    UnknownWinner(String),
    /// Wrong number of participants for the mode.
    #[error("match needs {expected} participants, found {found}")]
    ParticipantCount {
        /// Accepted count for the mode.
        expected: &'static str,
        /// Participants present in the record.
        found: usize,
    },
    /// Turn held by someone outside the match.
    #[error("turn holder `{0:?}` is not a participant")]
    InvalidTurn(Option<String>),
    /// Duel answer counter outside 0..=1.
    #[error("answers count {0} is out of range for an active duel")]
    InvalidAnswersCount(u8),
    /// Current question past the limit.
    #[error("current question {current} is beyond the limit {limit}")]
    QuestionOutOfRange {
        /// Stored question index.
        current: u32,
        /// Stored question limit.
        limit: u32,
    },
    /// Verdict set on a running match.
    #[error("active match already carries a winner")]
    WinnerWhileActive,
}

/// A single quiz match as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Record identifier.
    pub id: MatchId,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Setup mode.
    pub mode: MatchMode,
    /// Where the questions come from.
    pub source: QuestionSource,
    /// Display title of the subject.
    pub subject_title: Option<String>,
    /// Rounds to play.
    pub question_limit: u32,
    /// Zero-based index into the derived question sequence.
    pub current_q: u32,
    /// Participant allowed to answer (duel modes only).
    pub turn: Option<UserId>,
    /// Answers already given for the current question in a duel (0 or 1 while active).
    pub answers_count: u8,
    /// Participants that answered the current question (multi mode only).
    pub current_answers: IndexSet<UserId>,
    /// Score per participant, in seat order.
    pub scores: IndexMap<UserId, u32>,
    /// Participants in seat order.
    pub players: IndexMap<UserId, Player>,
    /// Verdict, set once completed.
    pub winner: Option<Winner>,
    /// Watchers in join order.
    pub spectators: IndexMap<UserId, Spectator>,
    /// Most recent reaction.
    pub last_reaction: Option<Reaction>,
    /// Participant who surrendered or disconnected, when that ended the match.
    pub forfeited_by: Option<UserId>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Match {
    /// Validate and normalise a persisted record.
    ///
    /// Missing scores become zero, a missing or zero limit becomes
    /// `default_question_limit`, and records breaking turn invariants are refused.
    pub fn from_entity(entity: MatchEntity, default_question_limit: u32) -> Result<Self, RecordError> {
        let status: MatchStatus = entity.status.parse()?;
        let mode = match entity.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => MatchMode::Auto,
        };

        let players: IndexMap<UserId, Player> = entity
            .players
            .into_iter()
            .map(|(uid, player)| (UserId(uid), player.into()))
            .collect();

        match (mode.is_duel(), players.len()) {
            (true, 2) => {}
            (true, found) => {
                return Err(RecordError::ParticipantCount {
                    expected: "exactly 2",
                    found,
                });
            }
            (false, found) if found >= 2 => {}
            (false, found) => {
                return Err(RecordError::ParticipantCount {
                    expected: "at least 2",
                    found,
                });
            }
        }

        let scores = players
            .keys()
            .map(|uid| (uid.clone(), entity.scores.get(&uid.0).copied().unwrap_or(0)))
            .collect();

        let question_limit = match entity.question_limit {
            Some(limit) if limit > 0 => limit,
            _ => default_question_limit,
        };
        if entity.current_q >= question_limit {
            return Err(RecordError::QuestionOutOfRange {
                current: entity.current_q,
                limit: question_limit,
            });
        }

        let turn = entity.turn.map(UserId);
        let answers_count = entity.answers_count.unwrap_or(0);
        if status == MatchStatus::Active && mode.is_duel() {
            if !turn.as_ref().is_some_and(|uid| players.contains_key(uid)) {
                return Err(RecordError::InvalidTurn(turn.map(|uid| uid.0)));
            }
            if answers_count > 1 {
                return Err(RecordError::InvalidAnswersCount(answers_count));
            }
        }

        let winner = entity
            .winner
            .as_deref()
            .map(|value| Winner::parse(value, &players))
            .transpose()?;
        if status == MatchStatus::Active && winner.is_some() {
            return Err(RecordError::WinnerWhileActive);
        }

        let current_answers = entity
            .current_answers
            .into_iter()
            .filter(|(_, answered)| *answered)
            .map(|(uid, _)| UserId(uid))
            .filter(|uid| players.contains_key(uid))
            .collect();

        Ok(Self {
            id: MatchId(entity.match_id),
            status,
            mode,
            source: QuestionSource::parse(&entity.subject),
            subject_title: entity.subject_title,
            question_limit,
            current_q: entity.current_q,
            turn,
            answers_count,
            current_answers,
            scores,
            players,
            winner,
            spectators: entity
                .spectators
                .into_iter()
                .map(|(uid, spectator)| {
                    (
                        UserId(uid),
                        Spectator {
                            name: spectator.name,
                            avatar: spectator.avatar,
                        },
                    )
                })
                .collect(),
            last_reaction: entity.last_reaction.map(|reaction| Reaction {
                sender: UserId(reaction.sender_id),
                value: reaction.value,
                timestamp: reaction.timestamp,
            }),
            forfeited_by: entity.surrendered_by.map(UserId),
            created_at: entity.created_at,
        })
    }

    /// Whether rounds are still being played.
    pub fn is_active(&self) -> bool {
        self.status == MatchStatus::Active
    }

    /// Whether `user` plays in this match.
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.players.contains_key(user)
    }

    /// Participants in seat order.
    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        self.players.keys()
    }

    /// First participant other than `user`.
    pub fn opponent_of(&self, user: &UserId) -> Option<&UserId> {
        self.participants().find(|uid| *uid != user)
    }

    /// Current score of `user`, zero when unknown.
    pub fn score_of(&self, user: &UserId) -> u32 {
        self.scores.get(user).copied().unwrap_or(0)
    }

    /// Participants currently advertising an online connection.
    pub fn online_participants(&self) -> impl Iterator<Item = &UserId> {
        self.players
            .iter()
            .filter(|(_, player)| player.presence == Some(Presence::Online))
            .map(|(uid, _)| uid)
    }

    /// Highest score wins; a tie at the top is a draw.
    pub fn decide_winner(scores: &IndexMap<UserId, u32>) -> Winner {
        let Some(best) = scores.values().copied().max() else {
            return Winner::Draw;
        };
        let mut leaders = scores.iter().filter(|(_, score)| **score == best);
        match (leaders.next(), leaders.next()) {
            (Some((uid, _)), None) => Winner::Player(uid.clone()),
            _ => Winner::Draw,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            name: value.name,
            avatar: value.avatar,
            level: value.level,
            presence: value.status.as_deref().and_then(Presence::parse),
            last_seen: value.last_seen,
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            name: value.name,
            avatar: value.avatar,
            level: value.level,
            status: value.presence.map(|presence| presence.as_str().to_string()),
            last_seen: value.last_seen,
        }
    }
}

impl From<Match> for MatchEntity {
    fn from(value: Match) -> Self {
        Self {
            match_id: value.id.0,
            status: value.status.as_str().to_string(),
            mode: Some(value.mode.as_str().to_string()),
            subject: value.source.key(),
            subject_title: value.subject_title,
            question_limit: Some(value.question_limit),
            current_q: value.current_q,
            turn: value.turn.map(|uid| uid.0),
            answers_count: Some(value.answers_count),
            current_answers: value
                .current_answers
                .into_iter()
                .map(|uid| (uid.0, true))
                .collect(),
            scores: value
                .scores
                .into_iter()
                .map(|(uid, score)| (uid.0, score))
                .collect(),
            players: value
                .players
                .into_iter()
                .map(|(uid, player)| (uid.0, player.into()))
                .collect(),
            winner: value.winner.map(|winner| winner.as_record_value()),
            spectators: value
                .spectators
                .into_iter()
                .map(|(uid, spectator)| {
                    (
                        uid.0,
                        SpectatorEntity {
                            name: spectator.name,
                            avatar: spectator.avatar,
                        },
                    )
                })
                .collect(),
            last_reaction: value.last_reaction.map(|reaction| ReactionEntity {
                sender_id: reaction.sender.0,
                value: reaction.value,
                timestamp: reaction.timestamp,
            }),
            surrendered_by: value.forfeited_by.map(|uid| uid.0),
            created_at: value.created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Active two-player match between `a` (turn holder) and `b`.
    pub fn duel(limit: u32) -> Match {
        let player = |name: &str| Player {
            name: name.to_string(),
            avatar: String::new(),
            level: None,
            presence: Some(Presence::Online),
            last_seen: None,
        };
        Match {
            id: "seed1".into(),
            status: MatchStatus::Active,
            mode: MatchMode::Auto,
            source: QuestionSource::Chapter("chapter-1".into()),
            subject_title: None,
            question_limit: limit,
            current_q: 0,
            turn: Some("a".into()),
            answers_count: 0,
            current_answers: IndexSet::new(),
            scores: [("a".into(), 0), ("b".into(), 0)].into_iter().collect(),
            players: [("a".into(), player("A")), ("b".into(), player("B"))]
                .into_iter()
                .collect(),
            winner: None,
            spectators: IndexMap::new(),
            last_reaction: None,
            forfeited_by: None,
            created_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fixtures::duel, *};

    fn entity() -> MatchEntity {
        duel(10).into()
    }

    #[test]
    fn record_round_trips_through_entity() {
        let record = duel(10);
        let back = Match::from_entity(record.clone().into(), 10).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_scores_and_limit_are_normalised() {
        let mut raw = entity();
        raw.scores.clear();
        raw.question_limit = None;
        raw.answers_count = None;

        let record = Match::from_entity(raw, 7).unwrap();
        assert_eq!(record.question_limit, 7);
        assert_eq!(record.answers_count, 0);
        assert_eq!(record.score_of(&"a".into()), 0);
        assert_eq!(record.scores.len(), 2);
    }

    #[test]
    fn active_duel_needs_participant_turn() {
        let mut raw = entity();
        raw.turn = Some("mallory".into());
        assert!(matches!(
            Match::from_entity(raw, 10),
            Err(RecordError::InvalidTurn(_))
        ));
    }

    #[test]
    fn answers_count_above_one_is_refused_while_active() {
        let mut raw = entity();
        raw.answers_count = Some(2);
        assert_eq!(
            Match::from_entity(raw.clone(), 10),
            Err(RecordError::InvalidAnswersCount(2))
        );

        raw.status = "completed".into();
        raw.winner = Some("draw".into());
        assert!(Match::from_entity(raw, 10).is_ok());
    }

    #[test]
    fn unknown_strings_are_refused() {
        let mut raw = entity();
        raw.status = "paused".into();
        assert!(matches!(
            Match::from_entity(raw, 10),
            Err(RecordError::UnknownStatus(_))
        ));

        let mut raw = entity();
        raw.status = "completed".into();
        raw.winner = Some("nobody".into());
        assert!(matches!(
            Match::from_entity(raw, 10),
            Err(RecordError::UnknownWinner(_))
        ));
    }

    #[test]
    fn legacy_four_player_mode_is_multi() {
        let mut raw = entity();
        raw.mode = Some("4p".into());
        raw.turn = None;
        let record = Match::from_entity(raw, 10).unwrap();
        assert_eq!(record.mode, MatchMode::Multi);
    }

    #[test]
    fn all_chapters_subject_is_detected() {
        assert_eq!(
            QuestionSource::parse("ALL_math"),
            QuestionSource::AllChapters("math".into())
        );
        assert_eq!(
            QuestionSource::parse("algebra"),
            QuestionSource::Chapter("algebra".into())
        );
        assert_eq!(QuestionSource::parse("ALL_math").key(), "ALL_math");
    }

    #[test]
    fn winner_is_decided_by_strict_comparison() {
        let scores = |a: u32, b: u32| -> IndexMap<UserId, u32> {
            [("a".into(), a), ("b".into(), b)].into_iter().collect()
        };
        assert_eq!(Match::decide_winner(&scores(6, 4)), Winner::Player("a".into()));
        assert_eq!(Match::decide_winner(&scores(2, 8)), Winner::Player("b".into()));
        assert_eq!(Match::decide_winner(&scores(14, 14)), Winner::Draw);
    }
}
