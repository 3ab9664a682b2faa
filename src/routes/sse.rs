use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    services::sse_service,
    state::{MatchId, SharedState},
};

#[utoipa::path(
    get,
    path = "/sse/matches/{id}",
    tag = "realtime",
    params(("id" = String, Path, description = "Match to observe")),
    responses((status = 200, description = "Match event stream", content_type = "text/event-stream", body = String))
)]
/// Stream match updates and answer reveals to read-only observers.
pub async fn match_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let match_id = MatchId::from(id.as_str());
    let (receiver, handshake) = sse_service::subscribe_match(&state, &match_id).await;
    info!(match_id = %match_id, "new match SSE connection");
    sse_service::to_sse_stream(match_id, handshake, receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/matches/{id}", get(match_stream))
}
