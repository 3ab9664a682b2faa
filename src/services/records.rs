//! Loading and conditionally rewriting match records.

use std::{future::Future, sync::Arc};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    config::RetryPolicy,
    dao::{
        game_store::GameStore,
        models::{MatchEntity, Revision, Versioned},
        storage::{StorageError, StorageResult},
    },
    error::ServiceError,
    state::{Match, MatchId, SharedState},
};

/// Lost races tolerated before a mutation gives up.
const MAX_CONFLICT_RETRIES: u32 = 8;

/// A validated record together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Loaded {
    /// Revision the record was read at.
    pub revision: Revision,
    /// Validated record.
    pub record: Match,
}

/// Retry `op` on transient failures following `policy`.
///
/// Conflicts and corrupt documents are returned as-is.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                warn!(attempt, error = %err, "transient storage failure; retrying");
                sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Read and validate `match_id`.
pub async fn load_match(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    match_id: &MatchId,
) -> Result<Loaded, ServiceError> {
    let found = with_retry(&state.config().write_retry, || {
        store.find_match(match_id.as_str())
    })
    .await?;
    let Some(Versioned { revision, value }) = found else {
        return Err(ServiceError::NotFound(format!("match `{match_id}` not found")));
    };

    let record = Match::from_entity(value, state.config().default_question_limit).map_err(
        |err| {
            warn!(target: "integrity", match_id = %match_id, error = %err, "refusing malformed match record");
            ServiceError::from(err)
        },
    )?;
    Ok(Loaded { revision, record })
}

/// Read-modify-write `match_id` with optimistic concurrency.
///
/// `change` runs against the freshest record on every attempt and returns
/// `Ok(None)` to leave it untouched. A lost race re-reads the record and runs
/// `change` again, so its preconditions are always checked against the state
/// that is actually written over. Committed snapshots are published on the hub.
pub async fn mutate_match<T, F>(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    match_id: &MatchId,
    mut change: F,
) -> Result<Option<(T, Match)>, ServiceError>
where
    F: FnMut(&mut Match) -> Result<Option<T>, ServiceError>,
{
    let mut conflicts = 0;
    loop {
        let Loaded {
            revision,
            mut record,
        } = load_match(state, store, match_id).await?;
        let Some(value) = change(&mut record)? else {
            return Ok(None);
        };

        let entity: MatchEntity = record.clone().into();
        let written = with_retry(&state.config().write_retry, || {
            store.update_match(entity.clone(), revision.clone())
        })
        .await;

        match written {
            Ok(_) => {
                state.hub().publish_update(record.clone());
                return Ok(Some((value, record)));
            }
            Err(StorageError::Conflict { key }) if conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
                debug!(match_id = %match_id, key = %key, conflicts, "lost write race; re-reading");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn transient_failures_are_retried_up_to_the_budget() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::unavailable(
                    "down".into(),
                    std::io::Error::other("refused"),
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::conflict("match::m1")) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
