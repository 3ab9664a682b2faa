use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{
    services::presence_service,
    state::{MatchId, SharedState},
};

#[utoipa::path(
    get,
    path = "/ws/matches/{id}",
    tag = "realtime",
    params(("id" = String, Path, description = "Match to attach to")),
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade into a match session; the first frame must identify the user.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let match_id = MatchId::from(id.as_str());
    ws.on_upgrade(move |socket| presence_service::handle_socket(state, match_id, socket))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws/matches/{id}", get(ws_handler))
}
