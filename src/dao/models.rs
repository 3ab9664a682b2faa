use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque revision token used for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    /// Revision the value was read at.
    pub revision: Revision,
    /// The stored value.
    pub value: T,
}

/// Match record as persisted in the shared store.
///
/// The store is schemaless, so most fields are optional here; the typed
/// `state::matches::Match` is built from this through a validating conversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntity {
    /// Unique identifier, also used as the question shuffle seed.
    pub match_id: String,
    /// `active`, `completed` or `cancelled`.
    pub status: String,
    /// `auto`, `custom` or `multi` (`4p` in older records).
    #[serde(default)]
    pub mode: Option<String>,
    /// Chapter identifier or `ALL_<subject>` for an all-chapters match.
    pub subject: String,
    /// Display title of the subject.
    #[serde(default)]
    pub subject_title: Option<String>,
    /// Rounds to play; the configured default applies when absent.
    #[serde(default)]
    pub question_limit: Option<u32>,
    /// Zero-based index of the current question.
    #[serde(default)]
    pub current_q: u32,
    /// Participant allowed to answer (duels).
    #[serde(default)]
    pub turn: Option<String>,
    /// Answers given for the current question (duels).
    #[serde(default)]
    pub answers_count: Option<u8>,
    /// Participants that already answered the current question (multi mode only).
    #[serde(default)]
    pub current_answers: IndexMap<String, bool>,
    /// Score per participant.
    #[serde(default)]
    pub scores: IndexMap<String, u32>,
    /// Participants keyed by user id, in seat order.
    #[serde(default)]
    pub players: IndexMap<String, PlayerEntity>,
    /// Participant id, `draw` or `disconnect` once completed.
    #[serde(default)]
    pub winner: Option<String>,
    /// Watchers keyed by user id.
    #[serde(default)]
    pub spectators: IndexMap<String, SpectatorEntity>,
    /// Most recent reaction.
    #[serde(default)]
    pub last_reaction: Option<ReactionEntity>,
    /// Participant whose surrender or disconnect ended the match.
    #[serde(default)]
    pub surrendered_by: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
}

/// Participant entry of a match record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    #[serde(default)]
    pub avatar: String,
    /// Profile level when the participant joined.
    #[serde(default)]
    pub level: Option<u32>,
    /// `online` or `offline`; missing means never connected.
    #[serde(default)]
    pub status: Option<String>,
    /// Last presence change in milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_seen: Option<u64>,
}

/// Spectator entry of a match record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpectatorEntity {
    /// Display name.
    pub name: String,
    /// Avatar URL or emoji.
    #[serde(default)]
    pub avatar: String,
}

/// Last social reaction sent in a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEntity {
    /// Reacting user.
    pub sender_id: String,
    /// Reaction text or emoji.
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Question as stored in the question bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Identifier within its chapter.
    pub id: String,
    /// Prompt text.
    pub question: String,
    /// Answer options in stored order.
    pub options: Vec<String>,
    /// Index of the correct option in `options`.
    pub answer: usize,
}

/// Chapter listed under a subject in the question bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterEntity {
    /// Chapter identifier.
    pub id: String,
    /// Chapter title.
    pub name: String,
    /// Subject the chapter belongs to.
    pub subject_id: String,
}

/// Player complaint about a question, kept for moderators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntity {
    /// Report identifier.
    pub id: String,
    /// Reported question.
    pub question_id: String,
    /// Chapter the reported question was loaded from.
    pub chapter_id: String,
    /// Match the report was filed from.
    pub match_id: String,
    /// `wrong_answer`, `typo` or `other`.
    pub reason: String,
    /// Reporting user.
    pub reporter_uid: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Question text at the time of the report.
    pub question_text: String,
}

/// Persisted user profile fields the coordinator reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntity {
    /// Owner of the profile.
    pub uid: String,
    /// Lifetime points.
    #[serde(default)]
    pub points: u64,
    /// Match the user is currently playing.
    #[serde(default)]
    pub active_match: Option<String>,
    /// Matches already credited to this profile.
    #[serde(default)]
    pub settled_matches: Vec<String>,
}

impl ProfileEntity {
    /// Blank profile for a user the store has never seen.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            points: 0,
            active_match: None,
            settled_matches: Vec::new(),
        }
    }

    /// Credit `points` for `match_id` unless that match was already settled.
    ///
    /// Returns whether the award was applied. The active match pointer is cleared
    /// in both cases when it still points at `match_id`.
    pub fn apply_award(&mut self, match_id: &str, points: u64) -> bool {
        if self.active_match.as_deref() == Some(match_id) {
            self.active_match = None;
        }
        if self.settled_matches.iter().any(|id| id == match_id) {
            return false;
        }
        self.settled_matches.push(match_id.to_string());
        self.points = self.points.saturating_add(points);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn award_is_applied_once_per_match() {
        let mut profile = ProfileEntity::new("alice");
        profile.active_match = Some("m1".into());

        assert!(profile.apply_award("m1", 14));
        assert!(!profile.apply_award("m1", 14));
        assert_eq!(profile.points, 14);
        assert_eq!(profile.active_match, None);
        assert_eq!(profile.settled_matches, vec!["m1".to_string()]);
    }

    #[test]
    fn award_keeps_pointer_to_other_match() {
        let mut profile = ProfileEntity::new("bob");
        profile.active_match = Some("m2".into());

        assert!(profile.apply_award("m1", 3));
        assert_eq!(profile.active_match.as_deref(), Some("m2"));
    }

    #[test]
    fn match_entity_reads_sparse_record() {
        let raw = r#"{
            "matchId": "seed1",
            "status": "active",
            "subject": "chapter-1",
            "turn": "a",
            "players": { "a": { "name": "A" }, "b": { "name": "B" } }
        }"#;
        let entity: MatchEntity = serde_json::from_str(raw).unwrap();
        assert_eq!(entity.current_q, 0);
        assert_eq!(entity.answers_count, None);
        assert!(entity.scores.is_empty());
        assert_eq!(entity.players.len(), 2);
    }
}
