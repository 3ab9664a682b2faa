use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        matches::{
            CreateMatchRequest, LeaveResponse, MatchView, ReactionRequest, SubmitAnswerRequest,
            SubmitAnswerResponse, SurrenderResponse,
        },
        questions::QuestionView,
        reports::{ReportRequest, ReportView},
        validation::validate_identifier,
    },
    error::AppError,
    services::{match_service, question_service, report_service},
    state::{MatchId, SharedState, UserId},
};

const USER_HEADER: &str = "x-user-id";

/// Caller identity, taken from the `X-User-Id` header set by the auth proxy.
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing user header `X-User-Id`".into()))?;
        validate_identifier(raw)
            .map_err(|_| AppError::Unauthorized("malformed user header `X-User-Id`".into()))?;
        Ok(Self(UserId::from(raw.trim())))
    }
}

/// Match lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches", post(create_match))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/question", get(current_question))
        .route("/matches/{id}/answers", post(submit_answer))
        .route("/matches/{id}/surrender", post(surrender))
        .route("/matches/{id}/leave", post(leave))
        .route("/matches/{id}/reactions", post(react))
        .route("/matches/{id}/reports", post(report_question))
}

/// Open a match between two to four players.
#[utoipa::path(
    post,
    path = "/matches",
    tag = "matches",
    request_body = CreateMatchRequest,
    responses(
        (status = 201, description = "Match created", body = MatchView),
        (status = 409, description = "Match id already taken"),
        (status = 503, description = "Questions or storage unavailable")
    )
)]
pub async fn create_match(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateMatchRequest>>,
) -> Result<(StatusCode, Json<MatchView>), AppError> {
    let record = match_service::create_match(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(MatchView::from(&record))))
}

/// Fetch the current record of a match.
#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "matches",
    params(("id" = String, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Match state", body = MatchView),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<MatchView>, AppError> {
    let record = match_service::get_match(&state, &MatchId::from(id.as_str())).await?;
    Ok(Json(MatchView::from(&record)))
}

/// Question the match is currently on.
#[utoipa::path(
    get,
    path = "/matches/{id}/question",
    tag = "matches",
    params(("id" = String, Path, description = "Match identifier")),
    responses(
        (status = 200, description = "Current question", body = QuestionView),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn current_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<QuestionView>, AppError> {
    let view = question_service::current_question(&state, &MatchId::from(id.as_str())).await?;
    Ok(Json(view))
}

/// Answer the current question.
///
/// Out-of-turn or duplicate answers are acknowledged with `accepted: false`.
#[utoipa::path(
    post,
    path = "/matches/{id}/answers",
    tag = "matches",
    params(
        ("id" = String, Path, description = "Match identifier"),
        ("X-User-Id" = String, Header, description = "Answering participant")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer processed", body = SubmitAnswerResponse),
        (status = 409, description = "An earlier answer from this participant is in flight")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    let outcome =
        match_service::submit_answer(&state, &MatchId::from(id.as_str()), &user, payload.option)
            .await?;
    Ok(Json(outcome.into()))
}

/// Give up a running match.
#[utoipa::path(
    post,
    path = "/matches/{id}/surrender",
    tag = "matches",
    params(
        ("id" = String, Path, description = "Match identifier"),
        ("X-User-Id" = String, Header, description = "Surrendering participant")
    ),
    responses(
        (status = 200, description = "Match ended and settled", body = SurrenderResponse),
        (status = 409, description = "Match already over")
    )
)]
pub async fn surrender(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SurrenderResponse>, AppError> {
    let (record, report) =
        match_service::surrender(&state, &MatchId::from(id.as_str()), &user).await?;
    Ok(Json(SurrenderResponse::new(&record, &report)))
}

/// Leave a match for good.
#[utoipa::path(
    post,
    path = "/matches/{id}/leave",
    tag = "matches",
    params(
        ("id" = String, Path, description = "Match identifier"),
        ("X-User-Id" = String, Header, description = "Departing participant or spectator")
    ),
    responses((status = 200, description = "Departure recorded", body = LeaveResponse))
)]
pub async fn leave(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<LeaveResponse>, AppError> {
    let outcome = match_service::leave(&state, &MatchId::from(id.as_str()), &user).await?;
    Ok(Json(outcome.into()))
}

/// Send a short reaction to everyone watching the match.
#[utoipa::path(
    post,
    path = "/matches/{id}/reactions",
    tag = "matches",
    params(
        ("id" = String, Path, description = "Match identifier"),
        ("X-User-Id" = String, Header, description = "Reacting participant or spectator")
    ),
    request_body = ReactionRequest,
    responses((status = 200, description = "Reaction recorded", body = MatchView))
)]
pub async fn react(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    Valid(Json(payload)): Valid<Json<ReactionRequest>>,
) -> Result<Json<MatchView>, AppError> {
    let record =
        match_service::react(&state, &MatchId::from(id.as_str()), &user, &payload.value).await?;
    Ok(Json(MatchView::from(&record)))
}

/// Report the question the match is currently on.
#[utoipa::path(
    post,
    path = "/matches/{id}/reports",
    tag = "matches",
    params(
        ("id" = String, Path, description = "Match identifier"),
        ("X-User-Id" = String, Header, description = "Reporting participant or spectator")
    ),
    request_body = ReportRequest,
    responses(
        (status = 201, description = "Report stored", body = ReportView),
        (status = 401, description = "Caller is not part of the match"),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn report_question(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    Valid(Json(payload)): Valid<Json<ReportRequest>>,
) -> Result<(StatusCode, Json<ReportView>), AppError> {
    let report = report_service::report_question(
        &state,
        &MatchId::from(id.as_str()),
        &user,
        payload.reason,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(ReportView::from(&report))))
}
