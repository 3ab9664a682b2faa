//! Quiz duel backend binary wiring REST, WebSocket, SSE, and the match store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_duel_back::{
    config::AppConfig,
    dao::game_store::memory::MemoryGameStore,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);
    start_storage(&app_state).await?;

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the match store: CouchDB under supervision when configured,
/// otherwise the in-memory store seeded from the optional question bank file.
async fn start_storage(state: &SharedState) -> anyhow::Result<()> {
    #[cfg(feature = "couch-store")]
    {
        use quiz_duel_back::{
            dao::{
                game_store::{
                    GameStore,
                    couchdb::{CouchConfig, CouchGameStore},
                },
                storage::StorageError,
            },
            services::storage_supervisor,
        };

        if CouchConfig::is_configured() {
            let couch_config = CouchConfig::from_env().context("reading CouchDB settings")?;
            info!(database = %couch_config.database, "using CouchDB match store");
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let couch_config = couch_config.clone();
                async move {
                    let store = CouchGameStore::connect(couch_config)
                        .await
                        .map_err(StorageError::from)?;
                    Ok::<Arc<dyn GameStore>, StorageError>(Arc::new(store))
                }
            }));
            return Ok(());
        }
    }

    let store = match &state.config().question_bank_path {
        Some(path) => {
            let store = MemoryGameStore::load_fixture(path)
                .with_context(|| format!("loading question bank `{}`", path.display()))?;
            info!(path = %path.display(), "using in-memory match store with question bank");
            store
        }
        None => {
            info!("using empty in-memory match store");
            MemoryGameStore::new()
        }
    };
    state.install_game_store(Arc::new(store)).await;
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
