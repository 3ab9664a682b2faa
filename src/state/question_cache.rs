use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;

use crate::state::{
    matches::MatchId,
    questions::{Question, SharedSequence},
};

struct CachedBank {
    questions: Arc<Vec<Question>>,
    fetched_at: Instant,
}

/// Raw question banks keyed by subject, plus derived sequences keyed by match.
///
/// Banks expire after the configured TTL. Sequences never expire on their own
/// because a running match must keep the layout it started with; they are
/// dropped when the record is deleted.
pub struct QuestionCache {
    banks: DashMap<String, CachedBank>,
    sequences: DashMap<MatchId, SharedSequence>,
    ttl: Duration,
}

impl QuestionCache {
    /// Empty cache keeping banks for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            banks: DashMap::new(),
            sequences: DashMap::new(),
            ttl,
        }
    }

    /// Fresh bank for `subject`; an expired entry is evicted.
    pub fn bank(&self, subject: &str) -> Option<Arc<Vec<Question>>> {
        let fresh = self.banks.get(subject).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.questions.clone())
        });
        if fresh.is_none() {
            self.banks.remove(subject);
        }
        fresh
    }

    /// Cache `questions` under `subject`.
    pub fn store_bank(&self, subject: &str, questions: Vec<Question>) -> Arc<Vec<Question>> {
        let questions = Arc::new(questions);
        self.banks.insert(
            subject.to_string(),
            CachedBank {
                questions: questions.clone(),
                fetched_at: Instant::now(),
            },
        );
        questions
    }

    /// Sequence memoised for `match_id`.
    pub fn sequence(&self, match_id: &MatchId) -> Option<SharedSequence> {
        self.sequences.get(match_id).map(|entry| entry.clone())
    }

    /// Memoise `sequence`, keeping an earlier entry if a concurrent caller won.
    pub fn store_sequence(&self, match_id: &MatchId, sequence: SharedSequence) -> SharedSequence {
        self.sequences
            .entry(match_id.clone())
            .or_insert(sequence)
            .clone()
    }

    /// Drop the sequence of a deleted match.
    pub fn forget_match(&self, match_id: &MatchId) {
        self.sequences.remove(match_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::questions::{build_question_sequence, fixtures::bank};

    #[test]
    fn banks_expire_after_ttl() {
        let cache = QuestionCache::new(Duration::ZERO);
        cache.store_bank("chapter-1", bank(3));
        assert!(cache.bank("chapter-1").is_none());

        let cache = QuestionCache::new(Duration::from_secs(60));
        cache.store_bank("chapter-1", bank(3));
        assert_eq!(cache.bank("chapter-1").map(|bank| bank.len()), Some(3));
    }

    #[test]
    fn first_memoised_sequence_wins() {
        let cache = QuestionCache::new(Duration::from_secs(60));
        let first = Arc::new(build_question_sequence("m1", &bank(5), 5).unwrap());
        let second = Arc::new(build_question_sequence("m1", &bank(4), 4).unwrap());

        cache.store_sequence(&"m1".into(), first.clone());
        let kept = cache.store_sequence(&"m1".into(), second);
        assert_eq!(kept, first);

        cache.forget_match(&"m1".into());
        assert!(cache.sequence(&"m1".into()).is_none());
    }
}
