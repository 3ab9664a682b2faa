use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    dto::questions::QuestionView,
    error::ServiceError,
    services::records::{self, with_retry},
    state::{
        MatchId, SharedState,
        matches::{Match, MatchStatus, QuestionSource},
        questions::{Question, QuestionLoadError, SharedSequence, build_question_sequence},
    },
};

/// Raw questions of `source`, served from the cache while fresh.
///
/// `ALL_<subject>` sources fetch every chapter of the subject concurrently and
/// merge them; the canonical ordering in the builder makes the merge order
/// irrelevant.
pub async fn load_bank(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    source: &QuestionSource,
) -> Result<Arc<Vec<Question>>, QuestionLoadError> {
    let key = source.key();
    if let Some(bank) = state.questions().bank(&key) {
        debug!(subject = %key, "question bank served from cache");
        return Ok(bank);
    }

    let questions = match source {
        QuestionSource::Chapter(chapter) => fetch_chapter(state, store, &key, chapter).await?,
        QuestionSource::AllChapters(subject) => {
            let chapters = with_retry(&state.config().write_retry, || {
                store.subject_chapters(subject)
            })
            .await
            .map_err(|err| unavailable(&key, err))?;
            let fetched = try_join_all(
                chapters
                    .iter()
                    .map(|chapter| fetch_chapter(state, store, &key, &chapter.id)),
            )
            .await?;
            fetched.into_iter().flatten().collect()
        }
    };

    if questions.is_empty() {
        return Err(QuestionLoadError::Empty(key));
    }
    info!(subject = %key, count = questions.len(), "question bank loaded");
    Ok(state.questions().store_bank(&key, questions))
}

async fn fetch_chapter(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    key: &str,
    chapter: &str,
) -> Result<Vec<Question>, QuestionLoadError> {
    let entities = with_retry(&state.config().write_retry, || {
        store.chapter_questions(chapter)
    })
    .await
    .map_err(|err| unavailable(key, err))?;

    Ok(entities
        .into_iter()
        .map(|entity| Question::from_entity(chapter, entity))
        .filter(|question| {
            let playable = question.is_playable();
            if !playable {
                warn!(
                    target: "integrity",
                    chapter,
                    question = %question.id,
                    options = question.options.len(),
                    answer = question.answer,
                    "skipping question with an unusable answer index"
                );
            }
            playable
        })
        .collect())
}

fn unavailable(key: &str, err: StorageError) -> QuestionLoadError {
    QuestionLoadError::Unavailable {
        subject: key.to_string(),
        message: err.to_string(),
    }
}

/// Derived question sequence of `record`, memoised per match.
pub async fn sequence_for(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    record: &Match,
) -> Result<SharedSequence, ServiceError> {
    if let Some(sequence) = state.questions().sequence(&record.id) {
        return Ok(sequence);
    }

    let bank = load_bank(state, store, &record.source).await?;
    let sequence = build_question_sequence(record.id.as_str(), &bank, record.question_limit)?;
    Ok(state
        .questions()
        .store_sequence(&record.id, Arc::new(sequence)))
}

/// The question the match is currently on.
///
/// The correct option is disclosed only once the match is over.
pub async fn current_question(
    state: &SharedState,
    match_id: &MatchId,
) -> Result<QuestionView, ServiceError> {
    let store = state.require_game_store().await?;
    let records::Loaded { record, .. } = records::load_match(state, &store, match_id).await?;
    let sequence = sequence_for(state, &store, &record).await?;

    let question = sequence.get(record.current_q).ok_or_else(|| {
        warn!(
            target: "integrity",
            match_id = %match_id,
            current_q = record.current_q,
            available = sequence.len(),
            "current question is beyond the derived sequence"
        );
        ServiceError::NotFound(format!(
            "question {} of match `{match_id}` is not available",
            record.current_q
        ))
    })?;

    let total = sequence.last_index(record.question_limit) + 1;
    Ok(QuestionView::new(
        match_id.as_str(),
        record.current_q,
        total,
        question,
        record.status != MatchStatus::Active,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{game_store::memory::MemoryGameStore, models::QuestionEntity},
        state::AppState,
    };

    fn entity(id: &str, answer: usize) -> QuestionEntity {
        QuestionEntity {
            id: id.into(),
            question: format!("question {id}"),
            options: vec!["a".into(), "b".into(), "c".into()],
            answer,
        }
    }

    fn setup() -> (SharedState, Arc<dyn GameStore>, MemoryGameStore) {
        let memory = MemoryGameStore::new();
        let store: Arc<dyn GameStore> = Arc::new(memory.clone());
        let state = AppState::with_store(AppConfig::default(), store.clone());
        (state, store, memory)
    }

    #[tokio::test]
    async fn all_chapters_merges_every_chapter() {
        let (state, store, memory) = setup();
        memory.insert_chapter("math", "algebra", "Algebra", vec![entity("1", 0), entity("2", 1)]);
        memory.insert_chapter("math", "geometry", "Geometry", vec![entity("1", 2)]);

        let bank = load_bank(&state, &store, &QuestionSource::parse("ALL_math"))
            .await
            .unwrap();
        assert_eq!(bank.len(), 3);
        assert_eq!(
            bank.iter().filter(|question| question.chapter == "geometry").count(),
            1
        );
    }

    #[tokio::test]
    async fn unplayable_questions_are_skipped() {
        let (state, store, memory) = setup();
        memory.insert_chapter("math", "algebra", "Algebra", vec![entity("1", 0), entity("2", 9)]);

        let bank = load_bank(&state, &store, &QuestionSource::parse("algebra"))
            .await
            .unwrap();
        assert_eq!(bank.len(), 1);
    }

    #[tokio::test]
    async fn empty_source_is_reported() {
        let (state, store, _) = setup();
        assert_eq!(
            load_bank(&state, &store, &QuestionSource::parse("ALL_nothing")).await,
            Err(QuestionLoadError::Empty("ALL_nothing".into()))
        );
    }

    #[tokio::test]
    async fn banks_are_cached_between_calls() {
        let (state, store, memory) = setup();
        memory.insert_chapter("math", "algebra", "Algebra", vec![entity("1", 0)]);
        let source = QuestionSource::parse("algebra");
        load_bank(&state, &store, &source).await.unwrap();

        memory.insert_chapter("math", "algebra", "Algebra", Vec::new());
        assert_eq!(load_bank(&state, &store, &source).await.unwrap().len(), 1);
    }
}
