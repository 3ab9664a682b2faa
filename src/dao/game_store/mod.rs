/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// In-process backend.
pub mod memory;

use crate::dao::models::{
    ChapterEntity, MatchEntity, ProfileEntity, QuestionEntity, ReportEntity, Revision, Versioned,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Shared match records keyed by match id.
pub trait MatchStore: Send + Sync {
    /// Record and revision of `id`, if stored.
    fn find_match(&self, id: &str)
    -> BoxFuture<'static, StorageResult<Option<Versioned<MatchEntity>>>>;
    /// Insert a new record; fails with a conflict when the id is taken.
    fn create_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Replace a record only if it is still at `expected`.
    fn update_match(
        &self,
        entity: MatchEntity,
        expected: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Remove `id`; removing a missing record succeeds.
    fn delete_match(&self, id: &str) -> BoxFuture<'static, StorageResult<()>>;
}

/// Read-only access to the question bank.
pub trait QuestionBank: Send + Sync {
    /// Questions of one chapter in stored order.
    fn chapter_questions(
        &self,
        chapter_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;
    /// Chapters listed under a subject.
    fn subject_chapters(
        &self,
        subject_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ChapterEntity>>>;
}

/// User profile fields touched by match settlement.
pub trait ProfileStore: Send + Sync {
    /// Profile of `uid`, if any.
    fn find_profile(&self, uid: &str) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>>;
    /// Atomically credit `points` for `match_id` unless already credited.
    ///
    /// Resolves to `false` when the (match, user) pair was settled before.
    fn apply_award(
        &self,
        uid: &str,
        match_id: &str,
        points: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Point the profile of `uid` at `match_id`, or clear it.
    fn set_active_match(
        &self,
        uid: &str,
        match_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>>;
}

/// Append-only sink for question reports.
pub trait ReportStore: Send + Sync {
    /// Store a new report.
    fn create_report(&self, report: ReportEntity) -> BoxFuture<'static, StorageResult<()>>;
}

/// Abstraction over the persistence layer backing the match coordinator.
pub trait GameStore: MatchStore + QuestionBank + ProfileStore + ReportStore {
    /// Cheap reachability check.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
