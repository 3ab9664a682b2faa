//! Deterministic question sequence derivation.
//!
//! Every client of a match must see the same questions in the same order with
//! the same option layout. The sequence is derived from the match id alone:
//! the raw bank is put in canonical order, shuffled with a seeded linear
//! congruential generator, options are shuffled with the same generator, and
//! the result is truncated to the match's question limit.

use std::sync::Arc;

use thiserror::Error;

use crate::dao::models::QuestionEntity;

const LCG_MULTIPLIER: u64 = 9_301;
const LCG_INCREMENT: u64 = 49_297;
const LCG_MODULUS: u64 = 233_280;

/// A question as delivered to clients, with its options already shuffled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Identifier within its chapter.
    pub id: String,
    /// Chapter the question was loaded from; part of the canonical order.
    pub chapter: String,
    /// Prompt shown to players.
    pub text: String,
    /// Answer options in delivery order.
    pub options: Vec<String>,
    /// Index of the correct option within `options`.
    pub answer: usize,
}

impl Question {
    /// Bank question of `chapter`, options still in stored order.
    pub fn from_entity(chapter: &str, entity: QuestionEntity) -> Self {
        Self {
            id: entity.id,
            chapter: chapter.to_string(),
            text: entity.question,
            options: entity.options,
            answer: entity.answer,
        }
    }

    /// Whether `option` is the correct one.
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.answer
    }

    /// At least two options and an answer index pointing at one of them.
    pub fn is_playable(&self) -> bool {
        self.options.len() >= 2 && self.answer < self.options.len()
    }
}

/// Why no question sequence could be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionLoadError {
    /// The bank holds no playable question.
    #[error("no questions available for `{0}`")]
    Empty(String),
    /// The bank could not be read.
    #[error("question bank unavailable for `{subject}`: {message}")]
    Unavailable {
        /// Chapter or subject key that was requested.
        subject: String,
        /// Storage failure description.
        message: String,
    },
}

/// Ordered, shuffled, truncated questions of one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSequence {
    questions: Vec<Question>,
}

impl QuestionSequence {
    /// Question of round `index`.
    pub fn get(&self, index: u32) -> Option<&Question> {
        self.questions.get(index as usize)
    }

    /// Number of rounds available.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the sequence has no question at all.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Index of the final round for a match capped at `question_limit`.
    pub fn last_index(&self, question_limit: u32) -> u32 {
        let playable = (self.questions.len() as u32).min(question_limit);
        playable.saturating_sub(1)
    }
}

/// Linear congruential generator seeded from a string hash.
///
/// The constants and the hash are fixed: changing them reshuffles every
/// match in flight.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Generator seeded from the hash of `seed`.
    pub fn new(seed: &str) -> Self {
        Self {
            state: u64::from(seed_hash(seed).unsigned_abs()),
        }
    }

    /// Next draw in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.state = (self.state * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }

    /// Index in `0..=upper`.
    fn index_up_to(&mut self, upper: usize) -> usize {
        (self.next_f64() * (upper + 1) as f64).floor() as usize
    }
}

/// 32-bit rolling hash over the UTF-16 code units of `seed`.
pub fn seed_hash(seed: &str) -> i32 {
    seed.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

/// In-place Fisher-Yates shuffle walking from the last element down.
pub fn shuffle_seeded<T>(items: &mut [T], rng: &mut SeededRng) {
    for i in (1..items.len()).rev() {
        let j = rng.index_up_to(i);
        items.swap(i, j);
    }
}

/// Derive the question sequence of a match.
///
/// `raw` may come in any order; questions are sorted by `(chapter, id)`
/// before shuffling so that bank iteration order never matters. Questions
/// that are not [playable](Question::is_playable) are left out.
pub fn build_question_sequence(
    seed: &str,
    raw: &[Question],
    question_limit: u32,
) -> Result<QuestionSequence, QuestionLoadError> {
    let mut questions: Vec<Question> = raw
        .iter()
        .filter(|question| question.is_playable())
        .cloned()
        .collect();
    if questions.is_empty() {
        return Err(QuestionLoadError::Empty(seed.to_string()));
    }

    questions.sort_by(|a, b| (&a.chapter, &a.id).cmp(&(&b.chapter, &b.id)));

    let mut rng = SeededRng::new(seed);
    shuffle_seeded(&mut questions, &mut rng);

    for question in &mut questions {
        let mut order: Vec<usize> = (0..question.options.len()).collect();
        shuffle_seeded(&mut order, &mut rng);
        // playable, so the old answer index is one of `order`
        if let Some(moved_to) = order.iter().position(|&from| from == question.answer) {
            question.answer = moved_to;
        }
        question.options = order
            .iter()
            .map(|&from| std::mem::take(&mut question.options[from]))
            .collect();
    }

    questions.truncate(question_limit as usize);
    Ok(QuestionSequence { questions })
}

/// Shared handle to a derived sequence, memoised per match.
pub type SharedSequence = Arc<QuestionSequence>;
