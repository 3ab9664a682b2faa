use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Health endpoint.
pub mod health;
/// Match endpoints.
pub mod matches;
/// Server-sent event stream.
pub mod sse;
/// WebSocket upgrade and session loop.
pub mod websocket;

/// Compose all route trees, wiring in shared state and the Swagger UI.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    health::router()
        .merge(matches::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(swagger)
        .with_state(state)
}
