//! Crediting match results to user profiles.
//!
//! Every award goes through `ProfileStore::apply_award`, which is idempotent
//! per (match, user): replaying a settlement never double-credits.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::{
    dao::game_store::GameStore,
    error::ServiceError,
    services::records::with_retry,
    state::{
        SharedState, UserId,
        matches::Match,
        settlement::{Outcome, plan_settlement},
    },
};

/// An award and whether this call was the one that credited it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAward {
    /// Credited participant.
    pub user: UserId,
    /// Points owed.
    pub points: u32,
    /// False when the profile already held this settlement.
    pub applied: bool,
}

/// Awards settled for one terminal match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    /// How the match ended.
    pub outcome: Outcome,
    /// One entry per participant, in seat order.
    pub awards: Vec<AppliedAward>,
}

/// Credit the awards owed for a terminal `record`.
pub async fn settle(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    record: &Match,
) -> Result<SettlementReport, ServiceError> {
    let Some(outcome) = Outcome::of(record) else {
        return Err(ServiceError::InvalidState(format!(
            "match `{}` has not ended",
            record.id
        )));
    };
    let awards = plan_settlement(record, &outcome, &state.config().scoring);
    let policy = state.config().write_retry;

    let applied = try_join_all(awards.into_iter().map(|award| async move {
        let applied = with_retry(&policy, || {
            store.apply_award(
                award.user.as_str(),
                record.id.as_str(),
                u64::from(award.points),
            )
        })
        .await?;
        Ok::<_, ServiceError>(AppliedAward {
            user: award.user,
            points: award.points,
            applied,
        })
    }))
    .await?;

    for award in &applied {
        if award.applied {
            info!(
                match_id = %record.id,
                user = %award.user,
                points = award.points,
                outcome = ?outcome,
                "points credited"
            );
        } else {
            debug!(match_id = %record.id, user = %award.user, "award already credited");
        }
    }

    Ok(SettlementReport {
        outcome,
        awards: applied,
    })
}

/// React to a record observed with a disconnect verdict.
///
/// Each process settles a given disconnect at most once; a failed attempt
/// gives the claim back so the next observation retries.
pub async fn observe_disconnect(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    record: &Match,
) -> Option<SettlementReport> {
    let Some(Outcome::Disconnected(by)) = Outcome::of(record) else {
        return None;
    };
    if !state.presence().claim_settlement(&record.id) {
        return None;
    }

    match settle(state, store, record).await {
        Ok(report) => {
            info!(match_id = %record.id, disconnected = %by, "disconnect settled");
            Some(report)
        }
        Err(err) => {
            warn!(match_id = %record.id, error = %err, "disconnect settlement failed; will retry");
            state.presence().release_settlement(&record.id);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::memory::MemoryGameStore,
        state::{
            AppState,
            matches::{MatchStatus, Winner, fixtures::duel},
        },
    };

    fn setup() -> (SharedState, Arc<dyn GameStore>, MemoryGameStore) {
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        (
            AppState::with_store(AppConfig::default(), store.clone()),
            store,
            memory,
        )
    }

    #[tokio::test]
    async fn draw_is_credited_once() {
        let (state, store, memory) = setup();
        let mut record = duel(10);
        record.scores.insert("a".into(), 14);
        record.scores.insert("b".into(), 14);
        record.status = MatchStatus::Completed;
        record.winner = Some(Winner::Draw);

        let first = settle(&state, &store, &record).await.unwrap();
        assert!(first.awards.iter().all(|award| award.applied));
        let second = settle(&state, &store, &record).await.unwrap();
        assert!(second.awards.iter().all(|award| !award.applied));

        assert_eq!(memory.profile("a").unwrap().points, 14);
        assert_eq!(memory.profile("b").unwrap().points, 14);
    }

    #[tokio::test]
    async fn disconnect_is_observed_once() {
        let (state, store, memory) = setup();
        let mut record = duel(10);
        record.forfeit(&"b".into(), true);

        assert!(observe_disconnect(&state, &store, &record).await.is_some());
        assert!(observe_disconnect(&state, &store, &record).await.is_none());
        assert_eq!(memory.profile("a").unwrap().points, 10);
        assert_eq!(memory.profile("b").unwrap().points, 0);
    }

    #[tokio::test]
    async fn running_match_cannot_be_settled() {
        let (state, store, _) = setup();
        assert!(matches!(
            settle(&state, &store, &duel(10)).await,
            Err(ServiceError::InvalidState(_))
        ));
    }
}
