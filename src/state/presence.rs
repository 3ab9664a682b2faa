//! Server-side stand-in for "on disconnect" hooks.
//!
//! Each connection registers the record mutations that must happen if it
//! drops without leaving. The registry hands them out exactly once, either
//! to the drop handler (`fire`) or to nobody (`cancel`).

use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::state::matches::{Match, MatchId, Presence, UserId};

/// Token identifying one open WebSocket connection.
pub type ConnectionId = Uuid;

/// Record change applied when a connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectMutation {
    /// Flag the participant offline and stamp `last_seen`.
    MarkOffline {
        /// Affected match.
        match_id: MatchId,
        /// Participant whose connection dropped.
        user: UserId,
    },
    /// End an active match with a disconnect verdict.
    ForfeitMatch {
        /// Affected match.
        match_id: MatchId,
        /// Participant losing by disconnect.
        user: UserId,
    },
    /// Drop a spectator from the watcher list.
    RemoveSpectator {
        /// Affected match.
        match_id: MatchId,
        /// Spectator whose connection dropped.
        user: UserId,
    },
}

impl DisconnectMutation {
    /// Match the mutation targets.
    pub fn match_id(&self) -> &MatchId {
        match self {
            DisconnectMutation::MarkOffline { match_id, .. }
            | DisconnectMutation::ForfeitMatch { match_id, .. }
            | DisconnectMutation::RemoveSpectator { match_id, .. } => match_id,
        }
    }

    /// User whose connection registered the mutation.
    pub fn user(&self) -> &UserId {
        match self {
            DisconnectMutation::MarkOffline { user, .. }
            | DisconnectMutation::ForfeitMatch { user, .. }
            | DisconnectMutation::RemoveSpectator { user, .. } => user,
        }
    }

    /// Apply to `record`, returning whether anything changed.
    ///
    /// A forfeit only lands on an active match; a record that already
    /// completed keeps its verdict.
    pub fn apply(&self, record: &mut Match, now_ms: u64) -> bool {
        match self {
            DisconnectMutation::MarkOffline { user, .. } => match record.players.get_mut(user) {
                Some(player) => {
                    player.presence = Some(Presence::Offline);
                    player.last_seen = Some(now_ms);
                    true
                }
                None => false,
            },
            DisconnectMutation::ForfeitMatch { user, .. } => {
                if !record.is_active() || !record.is_participant(user) {
                    return false;
                }
                record.forfeit(user, true);
                true
            }
            DisconnectMutation::RemoveSpectator { user, .. } => {
                record.spectators.shift_remove(user).is_some()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Registration {
    match_id: MatchId,
    user: UserId,
    mutations: Vec<DisconnectMutation>,
}

/// Pending disconnect mutations keyed by connection, plus the per-match
/// settlement claims.
#[derive(Debug, Default)]
pub struct DisconnectRegistry {
    registrations: DashMap<ConnectionId, Registration>,
    /// Matches whose disconnect settlement was already started by this process.
    settled: DashSet<MatchId>,
}

impl DisconnectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mutations registered for `connection`.
    pub fn register(
        &self,
        connection: ConnectionId,
        match_id: &MatchId,
        user: &UserId,
        mutations: Vec<DisconnectMutation>,
    ) {
        self.registrations.insert(
            connection,
            Registration {
                match_id: match_id.clone(),
                user: user.clone(),
                mutations,
            },
        );
    }

    /// Drop the registration of `connection`; its mutations will never run.
    pub fn cancel(&self, connection: ConnectionId) -> bool {
        self.registrations.remove(&connection).is_some()
    }

    /// Drop every registration `user` holds on `match_id`, across connections.
    pub fn cancel_for(&self, match_id: &MatchId, user: &UserId) -> usize {
        let before = self.registrations.len();
        self.registrations
            .retain(|_, registration| !(registration.match_id == *match_id && registration.user == *user));
        before.saturating_sub(self.registrations.len())
    }

    /// Whether `user` holds a registration on `match_id` through a connection
    /// other than `connection`.
    pub fn has_other(&self, connection: ConnectionId, match_id: &MatchId, user: &UserId) -> bool {
        self.registrations.iter().any(|entry| {
            *entry.key() != connection && entry.match_id == *match_id && entry.user == *user
        })
    }

    /// Take the mutations of a dropped connection. A second call yields nothing.
    ///
    /// Nothing is handed out while the same user is still attached to the
    /// match through another connection (a reload that identified before the
    /// old socket closed).
    pub fn fire(&self, connection: ConnectionId) -> Vec<DisconnectMutation> {
        let Some((_, registration)) = self.registrations.remove(&connection) else {
            return Vec::new();
        };
        if self.has_other(connection, &registration.match_id, &registration.user) {
            return Vec::new();
        }
        registration.mutations
    }

    /// Claim the right to settle the disconnect of `match_id`; true only once.
    pub fn claim_settlement(&self, match_id: &MatchId) -> bool {
        self.settled.insert(match_id.clone())
    }

    /// Give a failed claim back so a later observation can retry.
    pub fn release_settlement(&self, match_id: &MatchId) {
        self.settled.remove(match_id);
    }

    /// Forget per-match bookkeeping once a record is gone.
    pub fn forget_match(&self, match_id: &MatchId) {
        self.settled.remove(match_id);
        self.registrations
            .retain(|_, registration| registration.match_id != *match_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::matches::{MatchStatus, Winner, fixtures::duel};

    fn forfeit(user: &str) -> DisconnectMutation {
        DisconnectMutation::ForfeitMatch {
            match_id: "seed1".into(),
            user: user.into(),
        }
    }

    #[test]
    fn fire_hands_out_mutations_once() {
        let registry = DisconnectRegistry::new();
        let connection = Uuid::new_v4();
        registry.register(connection, &"seed1".into(), &"b".into(), vec![forfeit("b")]);

        assert_eq!(registry.fire(connection), vec![forfeit("b")]);
        assert!(registry.fire(connection).is_empty());
    }

    #[test]
    fn cancelled_registrations_never_fire() {
        let registry = DisconnectRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.register(first, &"seed1".into(), &"b".into(), vec![forfeit("b")]);
        registry.register(second, &"seed1".into(), &"b".into(), vec![forfeit("b")]);

        assert_eq!(registry.cancel_for(&"seed1".into(), &"b".into()), 2);
        assert!(registry.fire(first).is_empty());
        assert!(!registry.cancel(second));
    }

    #[test]
    fn forfeit_only_applies_to_active_matches() {
        let mut record = duel(10);
        assert!(forfeit("b").apply(&mut record, 5));
        assert_eq!(record.winner, Some(Winner::Disconnect));
        assert_eq!(record.forfeited_by, Some("b".into()));

        let mut finished = duel(10);
        finished.status = MatchStatus::Completed;
        finished.winner = Some(Winner::Draw);
        assert!(!forfeit("b").apply(&mut finished, 5));
        assert_eq!(finished.winner, Some(Winner::Draw));
    }

    #[test]
    fn mark_offline_stamps_last_seen() {
        let mut record = duel(10);
        let mutation = DisconnectMutation::MarkOffline {
            match_id: "seed1".into(),
            user: "a".into(),
        };
        assert!(mutation.apply(&mut record, 42));
        let player = &record.players[&UserId::from("a")];
        assert_eq!(player.presence, Some(Presence::Offline));
        assert_eq!(player.last_seen, Some(42));
    }

    #[test]
    fn reconnected_user_is_not_forfeited_by_the_old_socket() {
        let registry = DisconnectRegistry::new();
        let old = Uuid::new_v4();
        let reloaded = Uuid::new_v4();
        registry.register(old, &"seed1".into(), &"b".into(), vec![forfeit("b")]);
        registry.register(reloaded, &"seed1".into(), &"b".into(), vec![forfeit("b")]);
        assert!(registry.has_other(old, &"seed1".into(), &"b".into()));
        assert!(!registry.has_other(old, &"seed1".into(), &"a".into()));

        assert!(registry.fire(old).is_empty());
        assert_eq!(registry.fire(reloaded), vec![forfeit("b")]);
    }

    #[test]
    fn disconnect_settlement_is_claimed_once() {
        let registry = DisconnectRegistry::new();
        assert!(registry.claim_settlement(&"seed1".into()));
        assert!(!registry.claim_settlement(&"seed1".into()));
    }
}
