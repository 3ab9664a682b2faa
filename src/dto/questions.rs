use serde::Serialize;
use utoipa::ToSchema;

use crate::state::questions::Question;

/// Question currently in play, with options in match order.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionView {
    /// Match the question belongs to.
    pub match_id: String,
    /// Zero-based position in the match sequence.
    pub index: u32,
    /// Number of rounds the match will play.
    pub total: u32,
    /// Identifier within its chapter.
    pub question_id: String,
    /// Prompt text.
    pub text: String,
    /// Options in match order.
    pub options: Vec<String>,
    /// Correct option, only disclosed once the match is over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
}

impl QuestionView {
    /// View of `question` at `index` of `total`.
    pub fn new(match_id: &str, index: u32, total: u32, question: &Question, disclose: bool) -> Self {
        Self {
            match_id: match_id.to_string(),
            index,
            total,
            question_id: question.id.clone(),
            text: question.text.clone(),
            options: question.options.clone(),
            correct_option: disclose.then_some(question.answer),
        }
    }
}
