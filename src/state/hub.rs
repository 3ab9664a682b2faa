use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::state::matches::{Match, MatchId, UserId};

const DEFAULT_CAPACITY: usize = 32;

/// Local feedback for an answer, sent before the round is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    /// Answering participant.
    pub user: UserId,
    /// Question the answer is for.
    pub question_index: u32,
    /// Chosen option.
    pub option: usize,
    /// Whether the chosen option is right.
    pub correct: bool,
    /// Index of the right option.
    pub correct_option: usize,
}

/// Everything observers of a match can be told about.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    /// The record changed; carries the committed snapshot.
    Updated(Arc<Match>),
    /// An answer was accepted and is being revealed.
    AnswerRevealed(Reveal),
    /// The record was removed; no further events follow.
    Deleted,
}

/// Per-match broadcast channels shared by websocket and SSE subscribers.
pub struct MatchHub {
    channels: DashMap<MatchId, broadcast::Sender<MatchEvent>>,
    capacity: usize,
}

impl Default for MatchHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MatchHub {
    /// Hub whose channels buffer `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Register a new subscriber that will receive subsequent events of `match_id`.
    pub fn subscribe(&self, match_id: &MatchId) -> broadcast::Receiver<MatchEvent> {
        self.channels
            .entry(match_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to current subscribers, ignoring delivery errors.
    pub fn publish(&self, match_id: &MatchId, event: MatchEvent) {
        if let Some(sender) = self.channels.get(match_id) {
            let _ = sender.send(event);
        }
    }

    /// Publish a committed snapshot of `record`.
    pub fn publish_update(&self, record: Match) {
        let match_id = record.id.clone();
        self.publish(&match_id, MatchEvent::Updated(Arc::new(record)));
    }

    /// Tell subscribers the record is gone and drop the channel.
    pub fn close(&self, match_id: &MatchId) {
        if let Some((_, sender)) = self.channels.remove(match_id) {
            let _ = sender.send(MatchEvent::Deleted);
        }
    }

    /// Drop channels nobody listens to anymore.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::matches::fixtures::duel;

    #[tokio::test]
    async fn events_reach_subscribers_of_the_same_match_only() {
        let hub = MatchHub::default();
        let mut ours = hub.subscribe(&"seed1".into());
        let mut theirs = hub.subscribe(&"other".into());

        hub.publish_update(duel(10));

        assert!(matches!(ours.recv().await, Ok(MatchEvent::Updated(record)) if record.id.as_str() == "seed1"));
        assert!(theirs.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_sends_deleted_and_drops_the_channel() {
        let hub = MatchHub::default();
        let mut receiver = hub.subscribe(&"seed1".into());
        hub.close(&"seed1".into());

        assert!(matches!(receiver.recv().await, Ok(MatchEvent::Deleted)));
        assert!(receiver.recv().await.is_err());
    }
}
