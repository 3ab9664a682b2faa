use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the match coordinator.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::matches::create_match,
        crate::routes::matches::get_match,
        crate::routes::matches::current_question,
        crate::routes::matches::submit_answer,
        crate::routes::matches::surrender,
        crate::routes::matches::leave,
        crate::routes::matches::react,
        crate::routes::matches::report_question,
        crate::routes::sse::match_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::matches::CreateMatchRequest,
            crate::dto::matches::ParticipantInput,
            crate::dto::matches::MatchModeDto,
            crate::dto::matches::MatchView,
            crate::dto::matches::PlayerView,
            crate::dto::matches::SpectatorView,
            crate::dto::matches::ReactionView,
            crate::dto::matches::AnswerRevealedEvent,
            crate::dto::matches::SubmitAnswerRequest,
            crate::dto::matches::SubmitAnswerResponse,
            crate::dto::matches::SurrenderResponse,
            crate::dto::matches::AwardView,
            crate::dto::matches::LeaveResponse,
            crate::dto::matches::ReactionRequest,
            crate::dto::questions::QuestionView,
            crate::dto::reports::ReportReason,
            crate::dto::reports::ReportRequest,
            crate::dto::reports::ReportView,
            crate::dto::sse::Handshake,
            crate::dto::ws::MatchInboundMessage,
            crate::dto::ws::MatchOutboundMessage,
            crate::dto::ws::ConnectionRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "matches", description = "Match lifecycle and answers"),
        (name = "realtime", description = "WebSocket sessions and SSE streams"),
    )
)]
pub struct ApiDoc;
