use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether a match store is reachable, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let healthy = match state.game_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        None => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    HealthResponse::from_degraded(!healthy)
}
