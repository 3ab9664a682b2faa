use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::ReportEntity,
    dto::reports::ReportReason,
    error::ServiceError,
    services::{
        question_service,
        records::{self, Loaded, with_retry},
    },
    state::{MatchId, SharedState, UserId, now_ms},
};

/// Store a report against the question `match_id` is currently on.
///
/// Participants and spectators may report; the question is resolved from the
/// match's derived sequence so the stored text is what the reporter saw.
pub async fn report_question(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
    reason: ReportReason,
) -> Result<ReportEntity, ServiceError> {
    let store = state.require_game_store().await?;
    let Loaded { record, .. } = records::load_match(state, &store, match_id).await?;
    if !record.is_participant(user) && !record.spectators.contains_key(user) {
        return Err(ServiceError::Unauthorized(format!(
            "`{user}` is not watching match `{match_id}`"
        )));
    }

    let sequence = question_service::sequence_for(state, &store, &record).await?;
    let question = sequence.get(record.current_q).ok_or_else(|| {
        ServiceError::InvalidState(format!(
            "match `{match_id}` has no question at index {}",
            record.current_q
        ))
    })?;

    let report = ReportEntity {
        id: Uuid::new_v4().simple().to_string(),
        question_id: question.id.clone(),
        chapter_id: question.chapter.clone(),
        match_id: match_id.to_string(),
        reason: reason.as_str().to_string(),
        reporter_uid: user.to_string(),
        timestamp: now_ms(),
        question_text: question.text.clone(),
    };
    with_retry(&state.config().write_retry, || {
        store.create_report(report.clone())
    })
    .await?;

    info!(
        match_id = %match_id,
        user = %user,
        question = %report.question_id,
        reason = reason.as_str(),
        "question reported"
    );
    Ok(report)
}
