//! In-process store used when no database is configured, and by the tests.

use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use serde::Deserialize;

use crate::dao::{
    game_store::{GameStore, MatchStore, ProfileStore, QuestionBank, ReportStore},
    models::{
        ChapterEntity, MatchEntity, ProfileEntity, QuestionEntity, ReportEntity, Revision,
        Versioned,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Inner {
    matches: DashMap<String, (u64, MatchEntity)>,
    profiles: DashMap<String, ProfileEntity>,
    /// Chapters keyed by subject id.
    chapters: DashMap<String, Vec<ChapterEntity>>,
    /// Questions keyed by chapter id.
    questions: DashMap<String, Vec<QuestionEntity>>,
    reports: DashMap<String, ReportEntity>,
    revision: AtomicU64,
}

impl Inner {
    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// `DashMap`-backed implementation of every store trait.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<Inner>,
}

/// JSON layout accepted by [`MemoryGameStore::load_fixture`].
#[derive(Debug, Deserialize)]
pub struct QuestionBankFixture {
    /// Subjects with their chapters.
    pub subjects: Vec<SubjectFixture>,
}

/// Subject entry of a question bank fixture.
#[derive(Debug, Deserialize)]
pub struct SubjectFixture {
    /// Subject identifier.
    pub id: String,
    /// Chapters of the subject.
    pub chapters: Vec<ChapterFixture>,
}

/// Chapter entry of a question bank fixture.
#[derive(Debug, Deserialize)]
pub struct ChapterFixture {
    /// Chapter identifier.
    pub id: String,
    /// Chapter title.
    pub name: String,
    /// Questions in stored order.
    #[serde(default)]
    pub questions: Vec<QuestionEntity>,
}

impl MemoryGameStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the question bank found at `path`.
    pub fn load_fixture(path: &Path) -> StorageResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| {
            StorageError::unavailable(
                format!("failed to read question bank `{}`", path.display()),
                source,
            )
        })?;
        let fixture: QuestionBankFixture =
            serde_json::from_str(&contents).map_err(|err| StorageError::Corrupt {
                key: path.display().to_string(),
                message: err.to_string(),
            })?;

        let store = Self::new();
        store.import(fixture);
        Ok(store)
    }

    /// Merge a question bank fixture into the store.
    pub fn import(&self, fixture: QuestionBankFixture) {
        for subject in fixture.subjects {
            for chapter in subject.chapters {
                self.insert_chapter(&subject.id, &chapter.id, &chapter.name, chapter.questions);
            }
        }
    }

    /// Register a chapter under `subject_id` with its questions.
    pub fn insert_chapter(
        &self,
        subject_id: &str,
        chapter_id: &str,
        name: &str,
        questions: Vec<QuestionEntity>,
    ) {
        let mut chapters = self.inner.chapters.entry(subject_id.to_string()).or_default();
        chapters.retain(|chapter| chapter.id != chapter_id);
        chapters.push(ChapterEntity {
            id: chapter_id.to_string(),
            name: name.to_string(),
            subject_id: subject_id.to_string(),
        });
        self.inner
            .questions
            .insert(chapter_id.to_string(), questions);
    }

    /// Insert or replace a profile.
    pub fn insert_profile(&self, profile: ProfileEntity) {
        self.inner.profiles.insert(profile.uid.clone(), profile);
    }

    /// Current profile snapshot, if any.
    pub fn profile(&self, uid: &str) -> Option<ProfileEntity> {
        self.inner.profiles.get(uid).map(|entry| entry.clone())
    }

    /// Every stored question report, oldest first.
    pub fn reports(&self) -> Vec<ReportEntity> {
        let mut reports: Vec<ReportEntity> = self
            .inner
            .reports
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        reports.sort_by_key(|report| report.timestamp);
        reports
    }
}

impl MatchStore for MemoryGameStore {
    fn find_match(
        &self,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<MatchEntity>>>> {
        let found = self.inner.matches.get(id).map(|entry| {
            let (revision, entity) = entry.value();
            Versioned {
                revision: Revision(revision.to_string()),
                value: entity.clone(),
            }
        });
        Box::pin(async move { Ok(found) })
    }

    fn create_match(&self, entity: MatchEntity) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.matches.entry(entity.match_id.clone()) {
                Entry::Occupied(_) => Err(StorageError::conflict(entity.match_id)),
                Entry::Vacant(slot) => {
                    let revision = inner.next_revision();
                    slot.insert((revision, entity));
                    Ok(Revision(revision.to_string()))
                }
            }
        })
    }

    fn update_match(
        &self,
        entity: MatchEntity,
        expected: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let Some(mut current) = inner.matches.get_mut(&entity.match_id) else {
                return Err(StorageError::conflict(entity.match_id));
            };
            if current.0.to_string() != expected.0 {
                return Err(StorageError::conflict(entity.match_id));
            }
            let revision = inner.next_revision();
            *current = (revision, entity);
            Ok(Revision(revision.to_string()))
        })
    }

    fn delete_match(&self, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.matches.remove(id);
        Box::pin(async { Ok(()) })
    }
}

impl QuestionBank for MemoryGameStore {
    fn chapter_questions(
        &self,
        chapter_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let questions = self
            .inner
            .questions
            .get(chapter_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Box::pin(async move { Ok(questions) })
    }

    fn subject_chapters(
        &self,
        subject_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ChapterEntity>>> {
        let chapters = self
            .inner
            .chapters
            .get(subject_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Box::pin(async move { Ok(chapters) })
    }
}

impl ProfileStore for MemoryGameStore {
    fn find_profile(&self, uid: &str) -> BoxFuture<'static, StorageResult<Option<ProfileEntity>>> {
        let found = self.profile(uid);
        Box::pin(async move { Ok(found) })
    }

    fn apply_award(
        &self,
        uid: &str,
        match_id: &str,
        points: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let applied = self
            .inner
            .profiles
            .entry(uid.to_string())
            .or_insert_with(|| ProfileEntity::new(uid))
            .apply_award(match_id, points);
        Box::pin(async move { Ok(applied) })
    }

    fn set_active_match(
        &self,
        uid: &str,
        match_id: Option<String>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner
            .profiles
            .entry(uid.to_string())
            .or_insert_with(|| ProfileEntity::new(uid))
            .active_match = match_id;
        Box::pin(async { Ok(()) })
    }
}

impl ReportStore for MemoryGameStore {
    fn create_report(&self, report: ReportEntity) -> BoxFuture<'static, StorageResult<()>> {
        let result = match self.inner.reports.entry(report.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict(report.id)),
            Entry::Vacant(slot) => {
                slot.insert(report);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

impl GameStore for MemoryGameStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn entity(id: &str) -> MatchEntity {
        MatchEntity {
            match_id: id.into(),
            status: "active".into(),
            mode: None,
            subject: "chapter".into(),
            subject_title: None,
            question_limit: None,
            current_q: 0,
            turn: None,
            answers_count: None,
            current_answers: IndexMap::new(),
            scores: IndexMap::new(),
            players: IndexMap::new(),
            winner: None,
            spectators: IndexMap::new(),
            last_reaction: None,
            surrendered_by: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryGameStore::new();
        let first = store.create_match(entity("m1")).await.unwrap();

        let mut updated = entity("m1");
        updated.current_q = 1;
        let second = store.update_match(updated.clone(), first.clone()).await.unwrap();
        assert_ne!(first, second);

        let err = store.update_match(updated, first).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let stored = store.find_match("m1").await.unwrap().unwrap();
        assert_eq!(stored.revision, second);
        assert_eq!(stored.value.current_q, 1);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = MemoryGameStore::new();
        store.create_match(entity("m1")).await.unwrap();
        assert!(store.create_match(entity("m1")).await.is_err());
    }

    #[tokio::test]
    async fn awards_are_idempotent() {
        let store = MemoryGameStore::new();
        store
            .set_active_match("alice", Some("m1".into()))
            .await
            .unwrap();

        assert!(store.apply_award("alice", "m1", 10).await.unwrap());
        assert!(!store.apply_award("alice", "m1", 10).await.unwrap());

        let profile = store.find_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.points, 10);
        assert_eq!(profile.active_match, None);
    }

    #[tokio::test]
    async fn chapters_are_listed_per_subject() {
        let store = MemoryGameStore::new();
        store.insert_chapter("math", "algebra", "Algebra", Vec::new());
        store.insert_chapter("math", "geometry", "Geometry", Vec::new());
        store.insert_chapter("physics", "optics", "Optics", Vec::new());

        let chapters = store.subject_chapters("math").await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert!(store.chapter_questions("unknown").await.unwrap().is_empty());
    }
}
