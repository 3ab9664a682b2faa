//! End-to-end match flows against the in-memory store.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;

use quiz_duel_back::{
    config::AppConfig,
    dao::{game_store::memory::MemoryGameStore, models::QuestionEntity},
    dto::{
        matches::{CreateMatchRequest, MatchModeDto, ParticipantInput},
        ws::ConnectionRole,
    },
    services::{
        match_service::{self, SubmitOutcome, Visitor},
        presence_service, question_service, settlement_service,
    },
    state::{
        AppState, MatchId, SharedState, UserId,
        matches::{MatchStatus, Presence, Winner},
        settlement::Outcome,
    },
};
use uuid::Uuid;

fn bank(size: usize) -> Vec<QuestionEntity> {
    (0..size)
        .map(|index| QuestionEntity {
            id: format!("q{index:02}"),
            question: format!("What is {index} + {index}?"),
            options: (0..4).map(|delta| (index * 2 + delta).to_string()).collect(),
            answer: 0,
        })
        .collect()
}

fn setup() -> (SharedState, MemoryGameStore) {
    setup_with_delay(Duration::ZERO)
}

fn setup_with_delay(reveal_delay: Duration) -> (SharedState, MemoryGameStore) {
    let memory = MemoryGameStore::new();
    memory.insert_chapter("math", "ch-1", "Addition", bank(6));
    let more = bank(6)
        .into_iter()
        .map(|mut question| {
            question.id = format!("x-{}", question.id);
            question
        })
        .collect();
    memory.insert_chapter("math", "ch-2", "More addition", more);
    let config = AppConfig {
        reveal_delay,
        ..AppConfig::default()
    };
    let state = AppState::with_store(config, Arc::new(memory.clone()));
    (state, memory)
}

fn request(id: &str, mode: MatchModeDto, players: &[&str], limit: u32) -> CreateMatchRequest {
    CreateMatchRequest {
        match_id: Some(id.into()),
        subject: "ALL_math".into(),
        subject_title: Some("Math".into()),
        mode,
        question_limit: Some(limit),
        players: players
            .iter()
            .map(|uid| ParticipantInput {
                user_id: (*uid).into(),
                name: uid.to_uppercase(),
                avatar: String::new(),
            })
            .collect(),
        first_turn: players.first().map(|uid| (*uid).to_string()),
    }
}

async fn right_option(state: &SharedState, match_id: &MatchId) -> usize {
    let store = state.require_game_store().await.unwrap();
    let record = match_service::get_match(state, match_id).await.unwrap();
    let sequence = question_service::sequence_for(state, &store, &record)
        .await
        .unwrap();
    sequence.get(record.current_q).unwrap().answer
}

async fn answer(state: &SharedState, match_id: &MatchId, user: &str, correct: bool) {
    let right = right_option(state, match_id).await;
    let option = if correct { right } else { (right + 1) % 4 };
    let outcome = match_service::submit_answer(state, match_id, &user.into(), option)
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }), "{outcome:?}");
}

#[tokio::test]
async fn drawn_duel_settles_both_players_once() {
    let (state, memory) = setup();
    let match_id = MatchId::from("duel-draw");
    match_service::create_match(&state, request("duel-draw", MatchModeDto::Auto, &["ann", "bob"], 3))
        .await
        .unwrap();

    for _ in 0..3 {
        let record = match_service::get_match(&state, &match_id).await.unwrap();
        assert_eq!(record.turn, Some(UserId::from("ann")));
        answer(&state, &match_id, "ann", true).await;
        answer(&state, &match_id, "bob", true).await;
    }

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    assert_eq!(record.winner, Some(Winner::Draw));
    assert_eq!(record.current_q, 2);
    assert_eq!(record.answers_count, 2);

    assert_eq!(memory.profile("ann").unwrap().points, 6);
    assert_eq!(memory.profile("bob").unwrap().points, 6);

    let store = state.require_game_store().await.unwrap();
    let replay = settlement_service::settle(&state, &store, &record).await.unwrap();
    assert!(replay.awards.iter().all(|award| !award.applied));
    assert_eq!(memory.profile("ann").unwrap().points, 6);

    let late = match_service::submit_answer(&state, &match_id, &"ann".into(), 0)
        .await
        .unwrap();
    assert!(matches!(late, SubmitOutcome::Ignored(_)));
}

#[tokio::test]
async fn same_match_id_yields_the_same_questions() {
    let (first, _) = setup();
    let (second, _) = setup();
    for state in [&first, &second] {
        match_service::create_match(state, request("shared-seed", MatchModeDto::Auto, &["ann", "bob"], 5))
            .await
            .unwrap();
    }
    let match_id = MatchId::from("shared-seed");
    let left = question_service::current_question(&first, &match_id).await.unwrap();
    let right = question_service::current_question(&second, &match_id).await.unwrap();
    assert_eq!(left.question_id, right.question_id);
    assert_eq!(left.options, right.options);
    assert_eq!(left.correct_option, None);
    assert_eq!(left.total, 5);
}

#[tokio::test]
async fn multi_round_waits_for_every_participant() {
    let (state, memory) = setup();
    let match_id = MatchId::from("trio");
    match_service::create_match(
        &state,
        request("trio", MatchModeDto::Multi, &["ann", "bob", "cat"], 1),
    )
    .await
    .unwrap();

    answer(&state, &match_id, "bob", true).await;
    let repeat = match_service::submit_answer(&state, &match_id, &"bob".into(), 0)
        .await
        .unwrap();
    assert!(matches!(repeat, SubmitOutcome::Ignored(_)));

    answer(&state, &match_id, "ann", false).await;
    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert!(record.is_active());

    answer(&state, &match_id, "cat", false).await;
    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    assert_eq!(record.winner, Some(Winner::Player("bob".into())));
    assert_eq!(memory.profile("bob").unwrap().points, 2);
    assert_eq!(memory.profile("cat").unwrap().points, 0);
}

#[tokio::test]
async fn dropped_connection_forfeits_and_awards_the_opponent_once() {
    let (state, memory) = setup();
    let match_id = MatchId::from("dropped");
    match_service::create_match(&state, request("dropped", MatchModeDto::Auto, &["ann", "bob"], 4))
        .await
        .unwrap();
    let ann = UserId::from("ann");
    let (role, record) = match_service::join(&state, &match_id, &ann, Visitor::default())
        .await
        .unwrap();
    assert_eq!(role, ConnectionRole::Participant);
    match_service::join(&state, &match_id, &"bob".into(), Visitor::default())
        .await
        .unwrap();

    let connection = Uuid::new_v4();
    state.presence().register(
        connection,
        &match_id,
        &ann,
        presence_service::disconnect_plan(role, &record, &ann),
    );

    let fired = state.presence().fire(connection);
    assert!(state.presence().fire(connection).is_empty());
    presence_service::apply_disconnect(&state, fired).await.unwrap();

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    assert_eq!(record.winner, Some(Winner::Disconnect));
    assert_eq!(record.forfeited_by, Some(ann.clone()));
    assert_eq!(record.players[&ann].presence, Some(Presence::Offline));

    // half of the maximum: 4 rounds at 2 points
    assert_eq!(memory.profile("bob").unwrap().points, 4);
    assert_eq!(memory.profile("ann").unwrap().points, 0);

    let store = state.require_game_store().await.unwrap();
    assert!(settlement_service::observe_disconnect(&state, &store, &record).await.is_none());
    assert_eq!(memory.profile("bob").unwrap().points, 4);
}

#[tokio::test]
async fn leaving_a_running_match_surrenders_it() {
    let (state, memory) = setup();
    let match_id = MatchId::from("walkout");
    match_service::create_match(&state, request("walkout", MatchModeDto::Custom, &["ann", "bob"], 4))
        .await
        .unwrap();
    match_service::join(&state, &match_id, &"bob".into(), Visitor::default())
        .await
        .unwrap();

    let outcome = match_service::leave(&state, &match_id, &"ann".into()).await.unwrap();
    assert!(outcome.surrendered);
    assert!(!outcome.deleted);

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.winner, Some(Winner::Player("bob".into())));
    assert_eq!(Outcome::of(&record), Some(Outcome::Surrendered("ann".into())));
    assert_eq!(memory.profile("bob").unwrap().points, 20);

    let outcome = match_service::leave(&state, &match_id, &"bob".into()).await.unwrap();
    assert!(outcome.deleted);
    assert!(match_service::get_match(&state, &match_id).await.is_err());
}

#[tokio::test]
async fn abandoned_request_does_not_lock_the_participant_out() {
    let (state, _) = setup_with_delay(Duration::from_millis(300));
    let match_id = MatchId::from("hang-up");
    match_service::create_match(&state, request("hang-up", MatchModeDto::Auto, &["ann", "bob"], 3))
        .await
        .unwrap();
    let right = right_option(&state, &match_id).await;

    let cut_short = timeout(
        Duration::from_millis(50),
        match_service::submit_answer(&state, &match_id, &"ann".into(), right),
    )
    .await;
    assert!(cut_short.is_err());
    assert!(!state.turn_gate().has_pending(&match_id));

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.answers_count, 0);

    let retry = match_service::submit_answer(&state, &match_id, &"ann".into(), right)
        .await
        .unwrap();
    assert!(matches!(retry, SubmitOutcome::Accepted { .. }), "{retry:?}");
    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.turn, Some(UserId::from("bob")));
}

#[tokio::test]
async fn simultaneous_multi_answers_are_all_recorded() {
    let (state, _) = setup_with_delay(Duration::from_millis(200));
    let match_id = MatchId::from("rush");
    match_service::create_match(
        &state,
        request("rush", MatchModeDto::Multi, &["ann", "bob", "cat"], 2),
    )
    .await
    .unwrap();
    let right = right_option(&state, &match_id).await;

    let ann_id: UserId = "ann".into();
    let bob_id: UserId = "bob".into();
    let (ann, bob) = tokio::join!(
        match_service::submit_answer(&state, &match_id, &ann_id, right),
        match_service::submit_answer(&state, &match_id, &bob_id, right),
    );
    assert!(matches!(ann.unwrap(), SubmitOutcome::Accepted { .. }));
    assert!(matches!(bob.unwrap(), SubmitOutcome::Accepted { .. }));

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.current_q, 0);
    assert!(record.current_answers.contains(&UserId::from("ann")));
    assert!(record.current_answers.contains(&UserId::from("bob")));
    assert_eq!(record.scores[&UserId::from("ann")], 2);
    assert_eq!(record.scores[&UserId::from("bob")], 2);
}

#[tokio::test]
async fn overlapping_duel_answers_leave_one_trace() {
    let (state, _) = setup_with_delay(Duration::from_millis(200));
    let match_id = MatchId::from("overlap");
    match_service::create_match(&state, request("overlap", MatchModeDto::Auto, &["ann", "bob"], 3))
        .await
        .unwrap();
    let right = right_option(&state, &match_id).await;

    let ann_id: UserId = "ann".into();
    let (first, repeat, intruder) = tokio::join!(
        match_service::submit_answer(&state, &match_id, &ann_id, right),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            match_service::submit_answer(&state, &match_id, &"ann".into(), right).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            match_service::submit_answer(&state, &match_id, &"bob".into(), right).await
        },
    );
    assert!(matches!(first.unwrap(), SubmitOutcome::Accepted { .. }));
    assert!(matches!(repeat.unwrap(), SubmitOutcome::Ignored(_)));
    assert!(matches!(intruder.unwrap(), SubmitOutcome::Ignored(_)));

    let record = match_service::get_match(&state, &match_id).await.unwrap();
    assert_eq!(record.current_q, 0);
    assert_eq!(record.answers_count, 1);
    assert_eq!(record.turn, Some(UserId::from("bob")));
    assert_eq!(record.scores[&UserId::from("ann")], 2);
    assert_eq!(record.scores[&UserId::from("bob")], 0);
}
