use std::{collections::HashSet, sync::Arc};

use futures::future::try_join_all;
use indexmap::IndexMap;
use rand::seq::IndexedRandom;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{game_store::GameStore, models::MatchEntity, storage::StorageError},
    dto::{matches::CreateMatchRequest, ws::ConnectionRole},
    error::ServiceError,
    services::{
        question_service,
        records::{self, Loaded, with_retry},
        settlement_service::{self, SettlementReport},
    },
    state::{
        MatchEvent, MatchId, Reveal, SharedState, UserId, now_ms,
        matches::{Match, MatchMode, MatchStatus, Player, Presence, QuestionSource, Reaction, Spectator},
        settlement::Outcome,
        turn::{RoundTransition, plan_answer},
    },
};

/// Profile points per level.
const POINTS_PER_LEVEL: u64 = 10;

/// Result of an answer submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The answer was written.
    Accepted {
        /// Feedback broadcast during the reveal delay.
        reveal: Reveal,
        /// Record as committed.
        record: Match,
    },
    /// The answer did not change the match; carries the reason.
    Ignored(String),
}

/// What a leave did to the match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The leave ended a running match by surrender.
    pub surrendered: bool,
    /// The record was removed because nobody remained online.
    pub deleted: bool,
}

/// Open a new match and point every participant's profile at it.
pub async fn create_match(
    state: &SharedState,
    request: CreateMatchRequest,
) -> Result<Match, ServiceError> {
    let store = state.require_game_store().await?;
    let record = build_match(state, &store, request).await?;

    // Fails fast when the bank is empty or unreachable; the derived sequence
    // is memoised for the first answer.
    question_service::sequence_for(state, &store, &record).await?;

    let entity: MatchEntity = record.clone().into();
    match with_retry(&state.config().write_retry, || store.create_match(entity.clone())).await {
        Ok(_) => {}
        Err(StorageError::Conflict { .. }) => {
            return Err(ServiceError::InvalidState(format!(
                "match `{}` already exists",
                record.id
            )));
        }
        Err(err) => return Err(err.into()),
    }

    try_join_all(record.participants().map(|uid| {
        with_retry(&state.config().write_retry, || {
            store.set_active_match(uid.as_str(), Some(record.id.to_string()))
        })
    }))
    .await?;

    info!(
        match_id = %record.id,
        mode = record.mode.as_str(),
        subject = %record.source.key(),
        question_limit = record.question_limit,
        "match created"
    );
    Ok(record)
}

async fn build_match(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    request: CreateMatchRequest,
) -> Result<Match, ServiceError> {
    let CreateMatchRequest {
        match_id,
        subject,
        subject_title,
        mode,
        question_limit,
        players,
        first_turn,
    } = request;
    let mode = MatchMode::from(mode);

    if subject.trim().is_empty() {
        return Err(ServiceError::InvalidInput("subject must not be empty".into()));
    }
    match (mode.is_duel(), players.len()) {
        (true, 2) | (false, 2..=4) => {}
        (true, found) => {
            return Err(ServiceError::InvalidInput(format!(
                "a duel needs exactly 2 players (got {found})"
            )));
        }
        (false, found) => {
            return Err(ServiceError::InvalidInput(format!(
                "a multi match needs 2 to 4 players (got {found})"
            )));
        }
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = players.iter().find(|player| !seen.insert(player.user_id.as_str())) {
        return Err(ServiceError::InvalidInput(format!(
            "player `{}` is listed twice",
            duplicate.user_id
        )));
    }

    let limit = state.config().max_question_limit;
    if question_limit.is_some_and(|requested| requested > limit) {
        return Err(ServiceError::InvalidInput(format!(
            "question limit must not exceed {limit}"
        )));
    }
    let question_limit = state.config().effective_question_limit(question_limit);

    let profiles = try_join_all(players.iter().map(|player| {
        with_retry(&state.config().write_retry, || store.find_profile(&player.user_id))
    }))
    .await?;

    let now = now_ms();
    let seats: IndexMap<UserId, Player> = players
        .into_iter()
        .zip(profiles)
        .map(|(player, profile)| {
            (
                UserId(player.user_id),
                Player {
                    name: player.name,
                    avatar: player.avatar,
                    level: Some(level_for(profile.map(|profile| profile.points).unwrap_or(0))),
                    presence: None,
                    last_seen: Some(now),
                },
            )
        })
        .collect();

    let turn = if mode.is_duel() {
        match first_turn {
            Some(uid) if seats.contains_key(&UserId(uid.clone())) => Some(UserId(uid)),
            Some(uid) => {
                return Err(ServiceError::InvalidInput(format!(
                    "first turn `{uid}` is not a player"
                )));
            }
            None => {
                let ids: Vec<&UserId> = seats.keys().collect();
                ids.choose(&mut rand::rng()).map(|uid| (*uid).clone())
            }
        }
    } else {
        None
    };

    Ok(Match {
        id: MatchId(match_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string())),
        status: MatchStatus::Active,
        mode,
        source: QuestionSource::parse(subject.trim()),
        subject_title,
        question_limit,
        current_q: 0,
        turn,
        answers_count: 0,
        current_answers: Default::default(),
        scores: seats.keys().map(|uid| (uid.clone(), 0)).collect(),
        players: seats,
        winner: None,
        spectators: IndexMap::new(),
        last_reaction: None,
        forfeited_by: None,
        created_at: now,
    })
}

/// Profile level shown next to a participant.
pub fn level_for(points: u64) -> u32 {
    u32::try_from(points / POINTS_PER_LEVEL + 1).unwrap_or(u32::MAX)
}

/// Load and validate `match_id`.
pub async fn get_match(state: &SharedState, match_id: &MatchId) -> Result<Match, ServiceError> {
    let store = state.require_game_store().await?;
    Ok(records::load_match(state, &store, match_id).await?.record)
}

/// Submit `option` for the current question on behalf of `user`.
///
/// The answer is graded against the derived sequence and revealed at once;
/// the round is persisted after the configured reveal delay by re-planning
/// against the freshest record. Answers that are out of turn, duplicated, or
/// overtaken by a concurrent change are ignored without touching the record.
pub async fn submit_answer(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
    option: usize,
) -> Result<SubmitOutcome, ServiceError> {
    let result = state
        .run_submission(match_id, user, || {
            submit_reserved(state, match_id, user, option)
        })
        .await;

    match result {
        Err(ServiceError::Busy(reason)) => {
            warn!(target: "integrity", match_id = %match_id, user = %user, reason = %reason, "ignoring overlapping answer");
            Ok(SubmitOutcome::Ignored(reason))
        }
        other => other,
    }
}

async fn submit_reserved(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
    option: usize,
) -> Result<SubmitOutcome, ServiceError> {
    let store = state.require_game_store().await?;
    let Loaded { record, .. } = records::load_match(state, &store, match_id).await?;
    let sequence = question_service::sequence_for(state, &store, &record).await?;
    let points = state.config().scoring.points_per_question;

    let plan = match plan_answer(&record, user, option, &sequence, points) {
        Ok(plan) => plan,
        Err(rejection) => {
            warn!(target: "integrity", match_id = %match_id, user = %user, reason = %rejection, "ignoring answer");
            return Ok(SubmitOutcome::Ignored(rejection.to_string()));
        }
    };

    let reveal = Reveal {
        user: user.clone(),
        question_index: plan.question_index,
        option,
        correct: plan.correct,
        correct_option: plan.correct_option,
    };
    state
        .hub()
        .publish(match_id, MatchEvent::AnswerRevealed(reveal.clone()));

    let delay = state.config().reveal_delay;
    if !delay.is_zero() {
        sleep(delay).await;
    }

    let question_index = plan.question_index;
    let committed = records::mutate_match(state, &store, match_id, |current| {
        match plan_answer(current, user, option, &sequence, points) {
            Ok(fresh) if fresh.question_index == question_index => {
                current.apply_answer(&fresh);
                Ok(Some(fresh))
            }
            _ => Ok(None),
        }
    })
    .await?;

    let Some((applied, record)) = committed else {
        warn!(target: "integrity", match_id = %match_id, user = %user, question = question_index, "answer overtaken by a concurrent update");
        return Ok(SubmitOutcome::Ignored(
            "match changed before the answer was recorded".into(),
        ));
    };

    info!(
        match_id = %match_id,
        user = %user,
        question = question_index,
        correct = applied.correct,
        "answer recorded"
    );

    if matches!(applied.transition, RoundTransition::Complete { .. }) {
        info!(match_id = %match_id, winner = ?record.winner, "match completed");
        if let Err(err) = settlement_service::settle(state, &store, &record).await {
            // Awards are idempotent; leaving the match replays settlement.
            warn!(match_id = %match_id, error = %err, "settlement after completion failed");
        }
    }

    Ok(SubmitOutcome::Accepted { reveal, record })
}

/// End an active match because `user` gave up.
pub async fn surrender(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
) -> Result<(Match, SettlementReport), ServiceError> {
    let store = state.require_game_store().await?;
    let committed = records::mutate_match(state, &store, match_id, |current| {
        if !current.is_participant(user) {
            return Err(ServiceError::Unauthorized(format!(
                "`{user}` is not playing match `{match_id}`"
            )));
        }
        if !current.is_active() {
            return Ok(None);
        }
        current.forfeit(user, false);
        Ok(Some(()))
    })
    .await?;

    let Some(((), record)) = committed else {
        return Err(ServiceError::InvalidState(format!(
            "match `{match_id}` is already over"
        )));
    };
    info!(match_id = %match_id, user = %user, "participant surrendered");

    let report = settlement_service::settle(state, &store, &record).await?;
    Ok((record, report))
}

/// Explicit departure of `user` from `match_id`.
///
/// Pending disconnect handling for the user is cancelled first. Leaving a
/// running match surrenders it. Once no participant remains online on a
/// finished match, the record is deleted.
pub async fn leave(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
) -> Result<LeaveOutcome, ServiceError> {
    let cancelled = state.presence().cancel_for(match_id, user);
    let store = state.require_game_store().await?;

    let loaded = match records::load_match(state, &store, match_id).await {
        Ok(loaded) => loaded,
        Err(ServiceError::NotFound(_)) => {
            clear_active_pointer(state, &store, user, match_id).await?;
            return Ok(LeaveOutcome::default());
        }
        Err(err) => return Err(err),
    };

    if !loaded.record.is_participant(user) {
        if loaded.record.spectators.contains_key(user) {
            records::mutate_match(state, &store, match_id, |current| {
                Ok(current.spectators.shift_remove(user).map(|_| ()))
            })
            .await?;
            info!(match_id = %match_id, user = %user, "spectator left");
            return Ok(LeaveOutcome::default());
        }
        return Err(ServiceError::NotFound(format!(
            "`{user}` is not part of match `{match_id}`"
        )));
    }

    let mut outcome = LeaveOutcome::default();
    if loaded.record.is_active() {
        match surrender(state, match_id, user).await {
            Ok(_) => outcome.surrendered = true,
            Err(ServiceError::InvalidState(_)) => {}
            Err(err) => return Err(err),
        }
    }

    let now = now_ms();
    let record = records::mutate_match(state, &store, match_id, |current| {
        let Some(player) = current.players.get_mut(user) else {
            return Ok(None);
        };
        player.presence = Some(Presence::Offline);
        player.last_seen = Some(now);
        Ok(Some(()))
    })
    .await?
    .map(|((), record)| record)
    .unwrap_or(loaded.record);

    if !outcome.surrendered && Outcome::of(&record).is_some() {
        settlement_service::settle(state, &store, &record).await?;
    }
    clear_active_pointer(state, &store, user, match_id).await?;

    if is_abandoned(&record) {
        delete_record(state, &store, match_id).await?;
        outcome.deleted = true;
    }

    info!(
        match_id = %match_id,
        user = %user,
        cancelled_hooks = cancelled,
        surrendered = outcome.surrendered,
        "participant left"
    );
    Ok(outcome)
}

/// A finished match nobody is playing in anymore.
pub fn is_abandoned(record: &Match) -> bool {
    !record.is_active() && record.online_participants().next().is_none()
}

/// Delete the record of `match_id` and every in-process trace of it.
pub async fn delete_record(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    match_id: &MatchId,
) -> Result<(), ServiceError> {
    with_retry(&state.config().write_retry, || {
        store.delete_match(match_id.as_str())
    })
    .await?;
    state.forget_match(match_id);
    info!(match_id = %match_id, "match record deleted");
    Ok(())
}

async fn clear_active_pointer(
    state: &SharedState,
    store: &Arc<dyn GameStore>,
    user: &UserId,
    match_id: &MatchId,
) -> Result<(), ServiceError> {
    let policy = state.config().write_retry;
    let profile = with_retry(&policy, || store.find_profile(user.as_str())).await?;
    if profile.and_then(|profile| profile.active_match).as_deref() == Some(match_id.as_str()) {
        with_retry(&policy, || store.set_active_match(user.as_str(), None)).await?;
    }
    Ok(())
}

/// Record the latest reaction of a participant or spectator.
pub async fn react(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
    value: &str,
) -> Result<Match, ServiceError> {
    let store = state.require_game_store().await?;
    let value = value.trim().to_string();
    let committed = records::mutate_match(state, &store, match_id, |current| {
        if !current.is_participant(user) && !current.spectators.contains_key(user) {
            return Err(ServiceError::Unauthorized(format!(
                "`{user}` is not watching match `{match_id}`"
            )));
        }
        current.last_reaction = Some(Reaction {
            sender: user.clone(),
            value: value.clone(),
            timestamp: now_ms(),
        });
        Ok(Some(()))
    })
    .await?;

    committed
        .map(|((), record)| record)
        .ok_or_else(|| ServiceError::InvalidState("reaction was not recorded".into()))
}

/// Optional display data supplied by a connecting spectator.
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    /// Display name.
    pub name: Option<String>,
    /// Avatar URL or emoji.
    pub avatar: Option<String>,
}

/// Attach `user` to `match_id`: participants go online, anyone else becomes a spectator.
pub async fn join(
    state: &SharedState,
    match_id: &MatchId,
    user: &UserId,
    visitor: Visitor,
) -> Result<(ConnectionRole, Match), ServiceError> {
    let store = state.require_game_store().await?;
    let Loaded { record, .. } = records::load_match(state, &store, match_id).await?;

    if record.is_participant(user) {
        let points = with_retry(&state.config().write_retry, || {
            store.find_profile(user.as_str())
        })
        .await?
        .map(|profile| profile.points)
        .unwrap_or(0);
        let level = level_for(points);
        let now = now_ms();

        let committed = records::mutate_match(state, &store, match_id, |current| {
            let Some(player) = current.players.get_mut(user) else {
                return Ok(None);
            };
            player.presence = Some(Presence::Online);
            player.last_seen = Some(now);
            player.level = Some(level);
            Ok(Some(()))
        })
        .await?;
        let record = committed.map(|((), record)| record).unwrap_or(record);
        info!(match_id = %match_id, user = %user, level, "participant joined");
        return Ok((ConnectionRole::Participant, record));
    }

    let spectator = Spectator {
        name: visitor.name.unwrap_or_else(|| user.to_string()),
        avatar: visitor.avatar.unwrap_or_default(),
    };
    let committed = records::mutate_match(state, &store, match_id, |current| {
        if current.is_participant(user) {
            return Ok(None);
        }
        current.spectators.insert(user.clone(), spectator.clone());
        Ok(Some(()))
    })
    .await?;
    let record = committed.map(|((), record)| record).unwrap_or(record);
    info!(match_id = %match_id, user = %user, "spectator joined");
    Ok((ConnectionRole::Spectator, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{game_store::memory::MemoryGameStore, models::QuestionEntity},
        dto::matches::{MatchModeDto, ParticipantInput},
        state::{AppState, matches::Winner},
    };

    fn setup() -> (SharedState, MemoryGameStore) {
        let memory = MemoryGameStore::new();
        let questions = (0..12)
            .map(|index| QuestionEntity {
                id: format!("q{index:02}"),
                question: format!("question {index}"),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                answer: index % 4,
            })
            .collect();
        memory.insert_chapter("math", "algebra", "Algebra", questions);

        let config = AppConfig {
            reveal_delay: std::time::Duration::ZERO,
            ..AppConfig::default()
        };
        let state = AppState::with_store(config, Arc::new(memory.clone()));
        (state, memory)
    }

    fn request(limit: Option<u32>) -> CreateMatchRequest {
        CreateMatchRequest {
            match_id: Some("seed1".into()),
            subject: "algebra".into(),
            subject_title: None,
            mode: MatchModeDto::Auto,
            question_limit: limit,
            players: ["a", "b"]
                .into_iter()
                .map(|uid| ParticipantInput {
                    user_id: uid.into(),
                    name: uid.to_uppercase(),
                    avatar: String::new(),
                })
                .collect(),
            first_turn: Some("a".into()),
        }
    }

    async fn correct_option(state: &SharedState, match_id: &MatchId) -> usize {
        let store = state.require_game_store().await.unwrap();
        let record = get_match(state, match_id).await.unwrap();
        let sequence = question_service::sequence_for(state, &store, &record)
            .await
            .unwrap();
        sequence.get(record.current_q).unwrap().answer
    }

    #[tokio::test]
    async fn creation_points_profiles_at_the_match() {
        let (state, memory) = setup();
        let record = create_match(&state, request(None)).await.unwrap();
        assert_eq!(record.question_limit, 10);
        assert_eq!(record.turn, Some("a".into()));
        assert_eq!(
            memory.profile("b").unwrap().active_match.as_deref(),
            Some("seed1")
        );

        assert!(matches!(
            create_match(&state, request(None)).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn unknown_subject_fails_without_creating() {
        let (state, _) = setup();
        let mut req = request(None);
        req.subject = "ALL_history".into();
        assert!(matches!(
            create_match(&state, req).await,
            Err(ServiceError::QuestionsUnavailable(_))
        ));
        assert!(matches!(
            get_match(&state, &"seed1".into()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn out_of_turn_answer_is_ignored() {
        let (state, _) = setup();
        create_match(&state, request(None)).await.unwrap();
        let outcome = submit_answer(&state, &"seed1".into(), &"b".into(), 0)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Ignored(_)));
        let record = get_match(&state, &"seed1".into()).await.unwrap();
        assert_eq!(record.answers_count, 0);
    }

    #[tokio::test]
    async fn full_duel_completes_and_settles() {
        let (state, memory) = setup();
        let match_id = MatchId::from("seed1");
        create_match(&state, request(Some(2))).await.unwrap();

        for _ in 0..2 {
            let right = correct_option(&state, &match_id).await;
            submit_answer(&state, &match_id, &"a".into(), right).await.unwrap();
            let right = correct_option(&state, &match_id).await;
            submit_answer(&state, &match_id, &"b".into(), (right + 1) % 4)
                .await
                .unwrap();
        }

        let record = get_match(&state, &match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner, Some(Winner::Player("a".into())));
        let alice = memory.profile("a").unwrap();
        assert_eq!(alice.points, 4);
        assert_eq!(alice.active_match, None);
    }

    #[tokio::test]
    async fn surrender_awards_the_opponent_once() {
        let (state, memory) = setup();
        let match_id = MatchId::from("seed1");
        create_match(&state, request(None)).await.unwrap();

        let (record, report) = surrender(&state, &match_id, &"a".into()).await.unwrap();
        assert_eq!(record.winner, Some(Winner::Player("b".into())));
        assert_eq!(report.outcome, Outcome::Surrendered("a".into()));
        assert!(matches!(
            surrender(&state, &match_id, &"b".into()).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert_eq!(memory.profile("b").unwrap().points, 20);
    }

    #[tokio::test]
    async fn last_participant_out_deletes_the_record() {
        let (state, memory) = setup();
        let match_id = MatchId::from("seed1");
        create_match(&state, request(None)).await.unwrap();
        join(&state, &match_id, &"a".into(), Visitor::default()).await.unwrap();
        join(&state, &match_id, &"b".into(), Visitor::default()).await.unwrap();

        let first = leave(&state, &match_id, &"a".into()).await.unwrap();
        assert_eq!(
            first,
            LeaveOutcome {
                surrendered: true,
                deleted: false
            }
        );
        let second = leave(&state, &match_id, &"b".into()).await.unwrap();
        assert!(second.deleted);
        assert_eq!(memory.profile("b").unwrap().points, 20);
        assert_eq!(memory.profile("b").unwrap().active_match, None);
        assert!(matches!(
            get_match(&state, &match_id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn visitors_join_as_spectators_and_react() {
        let (state, _) = setup();
        let match_id = MatchId::from("seed1");
        create_match(&state, request(None)).await.unwrap();

        let (role, record) = join(
            &state,
            &match_id,
            &"carol".into(),
            Visitor {
                name: Some("Carol".into()),
                avatar: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(role, ConnectionRole::Spectator);
        assert_eq!(record.spectators.len(), 1);

        let record = react(&state, &match_id, &"carol".into(), " 🔥 ").await.unwrap();
        assert_eq!(record.last_reaction.unwrap().value, "🔥");
        assert!(matches!(
            react(&state, &match_id, &"mallory".into(), "x").await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn levels_grow_every_ten_points() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(9), 1);
        assert_eq!(level_for(25), 3);
    }
}
