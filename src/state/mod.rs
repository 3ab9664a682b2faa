/// Per-match event broadcast.
pub mod hub;
/// Match records.
pub mod matches;
/// Disconnect bookkeeping.
pub mod presence;
/// Question bank and sequence caches.
pub mod question_cache;
/// Questions and match sequences.
pub mod questions;
/// Award planning.
pub mod settlement;
/// Answer planning.
pub mod turn;
/// In-flight answer slots.
pub mod turn_gate;

use std::{
    future::Future,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{RwLock, watch};
use tokio::time::timeout;
use tracing::debug;

use crate::{config::AppConfig, dao::game_store::GameStore, error::ServiceError};

pub use self::hub::{MatchEvent, MatchHub, Reveal};
pub use self::matches::{Match, MatchId, UserId};
pub use self::presence::{ConnectionId, DisconnectMutation, DisconnectRegistry};
pub use self::question_cache::QuestionCache;
pub use self::turn_gate::{AbortError, ApplyError, PlanError, PlanId, SlotGuard, SlotKey, TurnGate};

/// State handle shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Central application state: configuration, storage handle and the
/// in-process coordination structures shared by every connection.
pub struct AppState {
    config: Arc<AppConfig>,
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    hub: MatchHub,
    presence: DisconnectRegistry,
    questions: QuestionCache,
    turn_gate: TurnGate,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::build(config, None)
    }

    /// Construct state with a store already installed.
    pub fn with_store(config: AppConfig, store: Arc<dyn GameStore>) -> SharedState {
        Self::build(config, Some(store))
    }

    fn build(config: AppConfig, store: Option<Arc<dyn GameStore>>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(store.is_none());
        Arc::new(Self {
            questions: QuestionCache::new(config.question_cache_ttl),
            config: Arc::new(config),
            game_store: RwLock::new(store),
            hub: MatchHub::default(),
            presence: DisconnectRegistry::new(),
            turn_gate: TurnGate::new(),
            degraded: degraded_tx,
        })
    }

    /// Loaded application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current game store or [`ServiceError::Degraded`].
    pub async fn require_game_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.game_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Per-match broadcast channels.
    pub fn hub(&self) -> &MatchHub {
        &self.hub
    }

    /// Mutations pending on open connections.
    pub fn presence(&self) -> &DisconnectRegistry {
        &self.presence
    }

    /// Question bank and sequence cache.
    pub fn questions(&self) -> &QuestionCache {
        &self.questions
    }

    /// In-flight answer slots.
    pub fn turn_gate(&self) -> &TurnGate {
        &self.turn_gate
    }

    /// Drop every in-process trace of a deleted match.
    pub fn forget_match(&self, match_id: &MatchId) {
        self.questions.forget_match(match_id);
        self.presence.forget_match(match_id);
        self.hub.close(match_id);
    }

    /// Broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Run `work` while holding the answer slot of `user` in `match_id`.
    ///
    /// Fails with [`PlanError::AlreadyPending`] if an earlier answer of the
    /// same participant is in flight. The slot is released on success,
    /// failure, timeout, and when the returned future is dropped.
    pub async fn run_submission<F, Fut, T>(
        &self,
        match_id: &MatchId,
        user: &UserId,
        work: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let slot = self.turn_gate.reserve(SlotKey::new(match_id, user))?;

        let work_future = work();
        let outcome = match self.config.transition_timeout {
            Some(limit) => match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout),
            },
            None => work_future.await,
        };

        let value = outcome?;
        let plan_id = slot.plan_id();
        let held = slot.commit()?;
        debug!(
            match_id = %match_id,
            user = %user,
            plan_id = %plan_id,
            held_ms = held.as_millis() as u64,
            "answer committed"
        );
        Ok(value)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
