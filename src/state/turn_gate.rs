use std::time::{Duration, Instant};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::state::matches::{MatchId, UserId};

/// Unique identifier for a reserved submission slot.
pub type PlanId = Uuid;

/// Identifies one answer slot: a participant within a match.
///
/// Slots are per participant so that multi-round players may answer in any
/// order while a duplicate from the same participant is still refused. In a
/// duel only the turn holder can answer, so a per-participant slot never lets
/// two rounds race.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Match the answer belongs to.
    pub match_id: MatchId,
    /// Participant submitting the answer.
    pub user: UserId,
}

impl SlotKey {
    /// Slot of `user` within `match_id`.
    pub fn new(match_id: &MatchId, user: &UserId) -> Self {
        Self {
            match_id: match_id.clone(),
            user: user.clone(),
        }
    }
}

/// A submission currently being revealed and persisted.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    /// Token handed to the reserving caller.
    pub id: PlanId,
    /// When the slot was reserved.
    pub pending_since: Instant,
}

/// Errors that can occur when reserving a submission slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// An earlier answer of the same participant is still in flight.
    #[error("an answer from `{holder}` is still being processed for match `{match_id}`")]
    AlreadyPending {
        /// Match of the refused answer.
        match_id: MatchId,
        /// Participant whose previous answer holds the slot.
        holder: UserId,
    },
}

/// Errors that can occur when committing a reserved slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The slot was already released.
    #[error("no submission is pending")]
    NoPending,
    /// The slot is held by another reservation.
    #[error("pending submission {expected} does not match {got}")]
    IdMismatch {
        /// Token currently holding the slot.
        expected: PlanId,
        /// Token presented by the caller.
        got: PlanId,
    },
}

/// Errors that can occur when releasing a reserved slot without committing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// The slot was already released.
    #[error("no submission is pending")]
    NoPending,
    /// The slot is held by another reservation.
    #[error("pending submission {expected} does not match {got}")]
    IdMismatch {
        /// Token currently holding the slot.
        expected: PlanId,
        /// Token presented by the caller.
        got: PlanId,
    },
}

/// At most one in-flight answer per participant and match.
///
/// A slot is reserved before the reveal delay starts and released once the
/// round has been written (apply) or the attempt gave up (abort).
#[derive(Debug, Default)]
pub struct TurnGate {
    pending: DashMap<SlotKey, PendingSubmission>,
}

impl TurnGate {
    /// Empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot `key`.
    pub fn plan(&self, key: &SlotKey) -> Result<PlanId, PlanError> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => Err(PlanError::AlreadyPending {
                match_id: key.match_id.clone(),
                holder: key.user.clone(),
            }),
            Entry::Vacant(entry) => {
                let id = Uuid::new_v4();
                entry.insert(PendingSubmission {
                    id,
                    pending_since: Instant::now(),
                });
                Ok(id)
            }
        }
    }

    /// Reserve `key` and hand back a guard that aborts the reservation when
    /// dropped before [`SlotGuard::commit`].
    pub fn reserve(&self, key: SlotKey) -> Result<SlotGuard<'_>, PlanError> {
        let plan_id = self.plan(&key)?;
        Ok(SlotGuard {
            gate: self,
            key,
            plan_id,
            armed: true,
        })
    }

    /// Release the slot after a successful write, returning how long it was held.
    pub fn apply(&self, key: &SlotKey, plan_id: PlanId) -> Result<Duration, ApplyError> {
        let expected = self
            .pending
            .get(key)
            .map(|entry| entry.id)
            .ok_or(ApplyError::NoPending)?;
        if expected != plan_id {
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }
        self.pending
            .remove_if(key, |_, pending| pending.id == plan_id)
            .map(|(_, pending)| pending.pending_since.elapsed())
            .ok_or(ApplyError::NoPending)
    }

    /// Release the slot without committing.
    pub fn abort(&self, key: &SlotKey, plan_id: PlanId) -> Result<(), AbortError> {
        let expected = self
            .pending
            .get(key)
            .map(|entry| entry.id)
            .ok_or(AbortError::NoPending)?;
        if expected != plan_id {
            return Err(AbortError::IdMismatch {
                expected,
                got: plan_id,
            });
        }
        self.pending.remove_if(key, |_, pending| pending.id == plan_id);
        Ok(())
    }

    /// Whether `key` is currently reserved.
    pub fn is_pending(&self, key: &SlotKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Whether any answer for `match_id` is in flight.
    pub fn has_pending(&self, match_id: &MatchId) -> bool {
        self.pending.iter().any(|entry| &entry.key().match_id == match_id)
    }
}

/// Reservation held for the duration of one submission.
///
/// Dropping the guard without committing releases the slot, so a cancelled
/// request never leaves the participant locked out.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    gate: &'a TurnGate,
    key: SlotKey,
    plan_id: PlanId,
    armed: bool,
}

impl SlotGuard<'_> {
    /// Token of this reservation.
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// Release the slot after the answer was written.
    pub fn commit(mut self) -> Result<Duration, ApplyError> {
        self.armed = false;
        self.gate.apply(&self.key, self.plan_id)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.gate.abort(&self.key, self.plan_id) {
            warn!(
                match_id = %self.key.match_id,
                user = %self.key.user,
                plan_id = %self.plan_id,
                error = %err,
                "failed to release answer slot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(match_id: &str, user: &str) -> SlotKey {
        SlotKey::new(&match_id.into(), &user.into())
    }

    #[test]
    fn second_reservation_is_refused_until_released() {
        let gate = TurnGate::new();
        let slot = key("m1", "a");

        let plan = gate.plan(&slot).unwrap();
        assert_eq!(
            gate.plan(&slot),
            Err(PlanError::AlreadyPending {
                match_id: "m1".into(),
                holder: "a".into(),
            })
        );

        gate.apply(&slot, plan).unwrap();
        assert!(!gate.is_pending(&slot));
        assert!(gate.plan(&slot).is_ok());
    }

    #[test]
    fn slots_are_per_participant_and_match() {
        let gate = TurnGate::new();
        gate.plan(&key("m1", "a")).unwrap();
        assert!(gate.plan(&key("m1", "b")).is_ok());
        assert!(gate.plan(&key("m2", "a")).is_ok());
        assert!(gate.has_pending(&"m1".into()));
        assert!(!gate.has_pending(&"m3".into()));
    }

    #[test]
    fn abort_with_foreign_id_keeps_the_slot() {
        let gate = TurnGate::new();
        let slot = key("m1", "a");
        let plan = gate.plan(&slot).unwrap();

        let stranger = Uuid::new_v4();
        assert_eq!(
            gate.abort(&slot, stranger),
            Err(AbortError::IdMismatch {
                expected: plan,
                got: stranger,
            })
        );
        assert!(gate.is_pending(&slot));

        gate.abort(&slot, plan).unwrap();
        assert_eq!(gate.apply(&slot, plan), Err(ApplyError::NoPending));
    }

    #[test]
    fn dropped_guard_releases_the_slot() {
        let gate = TurnGate::new();
        let slot = key("m1", "a");

        let guard = gate.reserve(slot.clone()).unwrap();
        assert!(gate.reserve(slot.clone()).is_err());
        drop(guard);
        assert!(!gate.is_pending(&slot));

        let guard = gate.reserve(slot.clone()).unwrap();
        guard.commit().unwrap();
        assert!(!gate.is_pending(&slot));
    }
}
