use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{dao::models::ReportEntity, dto::format_epoch_millis};

/// What is wrong with a reported question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    /// The marked answer is not the right one.
    WrongAnswer,
    /// Spelling or wording mistake.
    Typo,
    /// Anything else.
    Other,
}

impl ReportReason {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportReason::WrongAnswer => "wrong_answer",
            ReportReason::Typo => "typo",
            ReportReason::Other => "other",
        }
    }
}

/// Payload used to flag the question a match is currently on.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReportRequest {
    /// Why the question is reported.
    pub reason: ReportReason,
}

/// Stored report as acknowledged to the reporter.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ReportView {
    /// Report identifier.
    pub id: String,
    /// Reported question.
    pub question_id: String,
    /// Chapter the question belongs to.
    pub chapter_id: String,
    /// Reason as stored.
    pub reason: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<&ReportEntity> for ReportView {
    fn from(report: &ReportEntity) -> Self {
        Self {
            id: report.id.clone(),
            question_id: report.question_id.clone(),
            chapter_id: report.chapter_id.clone(),
            reason: report.reason.clone(),
            created_at: format_epoch_millis(report.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_use_snake_case() {
        let request: ReportRequest = serde_json::from_str(r#"{"reason":"wrong_answer"}"#).unwrap();
        assert_eq!(request.reason, ReportReason::WrongAnswer);
        assert_eq!(request.reason.as_str(), "wrong_answer");
        assert!(serde_json::from_str::<ReportRequest>(r#"{"reason":"rude"}"#).is_err());
    }
}
