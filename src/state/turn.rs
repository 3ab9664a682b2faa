//! Turn protocol: which answer is accepted and what it does to the record.
//!
//! Planning is pure. `plan_answer` inspects a validated [`Match`] and the
//! derived sequence and returns either a [`TurnRejection`] or an
//! [`AnswerPlan`] that `Match::apply_answer` writes into the record.

use indexmap::IndexMap;
use thiserror::Error;

use crate::state::{
    matches::{Match, MatchStatus, UserId, Winner},
    questions::QuestionSequence,
};

/// Effect of an accepted answer on the round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundTransition {
    /// First answer of a duel round; the other participant answers the same question.
    HandOver {
        /// Participant answering next.
        next_turn: UserId,
    },
    /// Multi mode: answer stored, other participants still owe one.
    Recorded,
    /// Round closed; the match moves to `next_question`.
    Advance {
        /// Index of the question the match moves to.
        next_question: u32,
        /// Opener of the next round (duels).
        next_turn: Option<UserId>,
    },
    /// Last round closed.
    Complete {
        /// Verdict written into the record.
        winner: Winner,
    },
}

/// An accepted answer, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerPlan {
    /// Answering participant.
    pub user: UserId,
    /// Question the answer is for.
    pub question_index: u32,
    /// Chosen option.
    pub option: usize,
    /// Whether the chosen option is right.
    pub correct: bool,
    /// Index of the right option.
    pub correct_option: usize,
    /// Scores after this answer.
    pub scores: IndexMap<UserId, u32>,
    /// What happens to the round.
    pub transition: RoundTransition,
}

/// Why an answer was not accepted. Rejections never mutate the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnRejection {
    /// The match already ended.
    #[error("match is {}", .0.as_str())]
    NotActive(MatchStatus),
    /// Spectators and strangers cannot answer.
    #[error("`{0}` is not a participant")]
    NotParticipant(UserId),
    /// Duel answer from the participant not holding the turn.
    #[error("it is not `{0}`'s turn")]
    NotYourTurn(UserId),
    /// Second answer to the same question.
    #[error("`{0}` already answered this question")]
    AlreadyAnswered(UserId),
    /// The sequence is shorter than the current index.
    #[error("question {0} is not part of the sequence")]
    NoQuestion(u32),
    /// Option index past the end of the options.
    #[error("option {option} is out of range ({available} options)")]
    OptionOutOfRange {
        /// Submitted option index.
        option: usize,
        /// Options the question offers.
        available: usize,
    },
}

/// Decide whether `user` may answer `option` now, and what follows.
pub fn plan_answer(
    record: &Match,
    user: &UserId,
    option: usize,
    sequence: &QuestionSequence,
    points_per_question: u32,
) -> Result<AnswerPlan, TurnRejection> {
    if !record.is_active() {
        return Err(TurnRejection::NotActive(record.status));
    }
    if !record.is_participant(user) {
        return Err(TurnRejection::NotParticipant(user.clone()));
    }
    if record.mode.is_duel() {
        if record.turn.as_ref() != Some(user) {
            return Err(TurnRejection::NotYourTurn(user.clone()));
        }
    } else if record.current_answers.contains(user) {
        return Err(TurnRejection::AlreadyAnswered(user.clone()));
    }

    let question = sequence
        .get(record.current_q)
        .ok_or(TurnRejection::NoQuestion(record.current_q))?;
    if option >= question.options.len() {
        return Err(TurnRejection::OptionOutOfRange {
            option,
            available: question.options.len(),
        });
    }

    let correct = question.is_correct(option);
    let mut scores = record.scores.clone();
    if correct {
        *scores.entry(user.clone()).or_insert(0) += points_per_question;
    }

    let is_last = record.current_q >= sequence.last_index(record.question_limit);
    let transition = if record.mode.is_duel() {
        duel_transition(record, user, is_last, &scores)
    } else {
        multi_transition(record, user, is_last, &scores)
    };

    Ok(AnswerPlan {
        user: user.clone(),
        question_index: record.current_q,
        option,
        correct,
        correct_option: question.answer,
        scores,
        transition,
    })
}

fn duel_transition(
    record: &Match,
    user: &UserId,
    is_last: bool,
    scores: &IndexMap<UserId, u32>,
) -> RoundTransition {
    // The record validation guarantees a second participant in duel modes.
    let other = record.opponent_of(user).cloned().unwrap_or_else(|| user.clone());
    if record.answers_count == 0 {
        RoundTransition::HandOver { next_turn: other }
    } else if is_last {
        RoundTransition::Complete {
            winner: Match::decide_winner(scores),
        }
    } else {
        RoundTransition::Advance {
            next_question: record.current_q + 1,
            next_turn: Some(other),
        }
    }
}

fn multi_transition(
    record: &Match,
    user: &UserId,
    is_last: bool,
    scores: &IndexMap<UserId, u32>,
) -> RoundTransition {
    let round_closed = record
        .participants()
        .all(|uid| uid == user || record.current_answers.contains(uid));
    if !round_closed {
        RoundTransition::Recorded
    } else if is_last {
        RoundTransition::Complete {
            winner: Match::decide_winner(scores),
        }
    } else {
        RoundTransition::Advance {
            next_question: record.current_q + 1,
            next_turn: None,
        }
    }
}

impl Match {
    /// Write an accepted answer into the record.
    pub fn apply_answer(&mut self, plan: &AnswerPlan) {
        self.scores = plan.scores.clone();
        match &plan.transition {
            RoundTransition::HandOver { next_turn } => {
                self.turn = Some(next_turn.clone());
                self.answers_count = 1;
            }
            RoundTransition::Recorded => {
                self.current_answers.insert(plan.user.clone());
            }
            RoundTransition::Advance {
                next_question,
                next_turn,
            } => {
                self.current_q = *next_question;
                self.turn = next_turn.clone();
                self.answers_count = 0;
                self.current_answers.clear();
            }
            RoundTransition::Complete { winner } => {
                self.status = MatchStatus::Completed;
                self.winner = Some(winner.clone());
                self.current_answers.clear();
                if self.mode.is_duel() {
                    self.answers_count = 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        matches::{MatchMode, fixtures::duel},
        questions::{build_question_sequence, fixtures::bank},
    };

    fn sequence(len: usize) -> QuestionSequence {
        build_question_sequence("seed1", &bank(len), 10).unwrap()
    }

    fn right(seq: &QuestionSequence, index: u32) -> usize {
        seq.get(index).unwrap().answer
    }

    fn wrong(seq: &QuestionSequence, index: u32) -> usize {
        (right(seq, index) + 1) % 4
    }

    fn answer(record: &mut Match, user: &str, option: usize, seq: &QuestionSequence) -> AnswerPlan {
        let plan = plan_answer(record, &user.into(), option, seq, 2).unwrap();
        record.apply_answer(&plan);
        plan
    }

    #[test]
    fn first_answer_hands_over_the_turn() {
        let seq = sequence(10);
        let mut record = duel(10);

        let plan = answer(&mut record, "a", right(&seq, 0), &seq);
        assert!(plan.correct);
        assert_eq!(record.current_q, 0);
        assert_eq!(record.turn, Some("b".into()));
        assert_eq!(record.answers_count, 1);
        assert_eq!(record.score_of(&"a".into()), 2);
    }

    #[test]
    fn second_answer_advances_and_returns_turn_to_the_opener() {
        let seq = sequence(10);
        let mut record = duel(10);
        record.turn = Some("b".into());
        record.answers_count = 1;
        record.scores.insert("a".into(), 2);

        answer(&mut record, "b", wrong(&seq, 0), &seq);
        assert_eq!(record.current_q, 1);
        assert_eq!(record.turn, Some("a".into()));
        assert_eq!(record.answers_count, 0);
        assert_eq!(record.score_of(&"a".into()), 2);
        assert_eq!(record.score_of(&"b".into()), 0);
    }

    #[test]
    fn last_round_completes_with_the_higher_score() {
        let seq = sequence(10);
        let mut record = duel(10);
        record.current_q = 9;
        record.turn = Some("b".into());
        record.answers_count = 1;
        record.scores.insert("a".into(), 6);
        record.scores.insert("b".into(), 4);

        answer(&mut record, "b", wrong(&seq, 9), &seq);
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner, Some(Winner::Player("a".into())));
    }

    #[test]
    fn tie_on_the_last_round_is_a_draw() {
        let seq = sequence(10);
        let mut record = duel(10);
        record.current_q = 9;
        record.turn = Some("b".into());
        record.answers_count = 1;
        record.scores.insert("a".into(), 14);
        record.scores.insert("b".into(), 12);

        answer(&mut record, "b", right(&seq, 9), &seq);
        assert_eq!(record.score_of(&"b".into()), 14);
        assert_eq!(record.winner, Some(Winner::Draw));
    }

    #[test]
    fn short_bank_completes_early() {
        let seq = sequence(3);
        let mut record = duel(10);
        record.current_q = 2;
        record.turn = Some("b".into());
        record.answers_count = 1;

        answer(&mut record, "b", right(&seq, 2), &seq);
        assert_eq!(record.status, MatchStatus::Completed);
    }

    #[test]
    fn answers_out_of_turn_are_rejected() {
        let seq = sequence(10);
        let record = duel(10);
        assert_eq!(
            plan_answer(&record, &"b".into(), 0, &seq, 2),
            Err(TurnRejection::NotYourTurn("b".into()))
        );
        assert_eq!(
            plan_answer(&record, &"eve".into(), 0, &seq, 2),
            Err(TurnRejection::NotParticipant("eve".into()))
        );
        assert!(matches!(
            plan_answer(&record, &"a".into(), 7, &seq, 2),
            Err(TurnRejection::OptionOutOfRange { option: 7, .. })
        ));
    }

    #[test]
    fn completed_match_rejects_answers() {
        let seq = sequence(10);
        let mut record = duel(10);
        record.status = MatchStatus::Completed;
        record.winner = Some(Winner::Draw);
        assert_eq!(
            plan_answer(&record, &"a".into(), 0, &seq, 2),
            Err(TurnRejection::NotActive(MatchStatus::Completed))
        );
    }

    #[test]
    fn full_duel_alternates_and_finishes() {
        let seq = sequence(10);
        let mut record = duel(4);
        for index in 0..4 {
            assert_eq!(record.turn, Some("a".into()));
            answer(&mut record, "a", right(&seq, index), &seq);
            answer(&mut record, "b", wrong(&seq, index), &seq);
        }
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.score_of(&"a".into()), 8);
        assert_eq!(record.winner, Some(Winner::Player("a".into())));
    }

    #[test]
    fn multi_mode_waits_for_every_participant() {
        let seq = sequence(10);
        let mut record = duel(2);
        record.mode = MatchMode::Multi;
        record.turn = None;
        let mut third = record.players[&UserId::from("a")].clone();
        third.name = "C".into();
        record.players.insert("c".into(), third);
        record.scores.insert("c".into(), 0);

        answer(&mut record, "c", right(&seq, 0), &seq);
        assert_eq!(
            plan_answer(&record, &"c".into(), 0, &seq, 2),
            Err(TurnRejection::AlreadyAnswered("c".into()))
        );
        answer(&mut record, "a", wrong(&seq, 0), &seq);
        assert_eq!(record.current_q, 0);
        answer(&mut record, "b", right(&seq, 0), &seq);
        assert_eq!(record.current_q, 1);
        assert!(record.current_answers.is_empty());

        answer(&mut record, "b", wrong(&seq, 1), &seq);
        answer(&mut record, "a", wrong(&seq, 1), &seq);
        answer(&mut record, "c", wrong(&seq, 1), &seq);
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner, Some(Winner::Draw));
    }
}
