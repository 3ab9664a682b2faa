use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        matches::MatchView,
        validation::{validate_identifier, validate_reaction},
        ws::{ConnectionRole, MatchInboundMessage, MatchOutboundMessage},
    },
    error::ServiceError,
    services::{
        match_service::{self, SubmitOutcome, Visitor},
        records, settlement_service,
    },
    state::{
        ConnectionId, DisconnectMutation, MatchEvent, MatchId, SharedState, UserId, now_ms,
        matches::Match,
    },
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Mutations to run if this connection drops without leaving.
pub fn disconnect_plan(role: ConnectionRole, record: &Match, user: &UserId) -> Vec<DisconnectMutation> {
    let match_id = record.id.clone();
    match role {
        ConnectionRole::Spectator => vec![DisconnectMutation::RemoveSpectator {
            match_id,
            user: user.clone(),
        }],
        ConnectionRole::Participant if record.is_active() => vec![
            DisconnectMutation::MarkOffline {
                match_id: match_id.clone(),
                user: user.clone(),
            },
            DisconnectMutation::ForfeitMatch {
                match_id,
                user: user.clone(),
            },
        ],
        ConnectionRole::Participant => vec![DisconnectMutation::MarkOffline {
            match_id,
            user: user.clone(),
        }],
    }
}

/// Apply fired disconnect mutations, one conditional write per match.
///
/// A forfeit that lands is settled right away; observers of the record
/// settle it too if this process misses it, guarded by the registry claim.
pub async fn apply_disconnect(
    state: &SharedState,
    mutations: Vec<DisconnectMutation>,
) -> Result<(), ServiceError> {
    if mutations.is_empty() {
        return Ok(());
    }
    let store = state.require_game_store().await?;

    let mut by_match: IndexMap<MatchId, Vec<DisconnectMutation>> = IndexMap::new();
    for mutation in mutations {
        by_match
            .entry(mutation.match_id().clone())
            .or_default()
            .push(mutation);
    }

    for (match_id, pending) in by_match {
        let now = now_ms();
        let committed = records::mutate_match(state, &store, &match_id, |current| {
            let changed = pending
                .iter()
                .fold(false, |changed, mutation| mutation.apply(current, now) || changed);
            Ok(changed.then_some(()))
        })
        .await;

        match committed {
            Ok(Some(((), record))) => {
                info!(match_id = %match_id, mutations = pending.len(), "disconnect handling applied");
                settlement_service::observe_disconnect(state, &store, &record).await;
                if match_service::is_abandoned(&record) {
                    settlement_service::settle(state, &store, &record).await?;
                    match_service::delete_record(state, &store, &match_id).await?;
                }
            }
            Ok(None) => debug!(match_id = %match_id, "disconnect handling changed nothing"),
            Err(ServiceError::NotFound(_)) => {
                debug!(match_id = %match_id, "match gone before disconnect handling")
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Handle the full lifecycle of a match WebSocket connection.
pub async fn handle_socket(state: SharedState, match_id: MatchId, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(match_id = %match_id, "websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Ok(MatchInboundMessage::Identification {
        user_id,
        name,
        avatar,
    }) = serde_json::from_str::<MatchInboundMessage>(&initial_message)
    else {
        warn!(match_id = %match_id, "first message was not identification");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };
    if let Err(err) = validate_identifier(&user_id) {
        warn!(match_id = %match_id, error = %err, "rejecting invalid user id");
        send(&outbound_tx, &MatchOutboundMessage::Error { message: err.to_string() });
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    }
    let user = UserId(user_id);

    // Subscribe before joining so the join update is not missed by this socket.
    let events = state.hub().subscribe(&match_id);
    let (role, record) = match match_service::join(&state, &match_id, &user, Visitor { name, avatar }).await {
        Ok(joined) => joined,
        Err(err) => {
            warn!(match_id = %match_id, user = %user, error = %err, "join failed");
            send(&outbound_tx, &MatchOutboundMessage::Error { message: err.to_string() });
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let connection: ConnectionId = Uuid::new_v4();
    state.presence().register(
        connection,
        &match_id,
        &user,
        disconnect_plan(role, &record, &user),
    );
    info!(match_id = %match_id, user = %user, role = ?role, "match connection established");

    send(
        &outbound_tx,
        &MatchOutboundMessage::Joined {
            role,
            state: MatchView::from(&record),
        },
    );

    let forwarder = spawn_forwarder(state.clone(), events, outbound_tx.clone());
    let mut left = false;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<MatchInboundMessage>(&text) {
                Ok(MatchInboundMessage::Answer { option }) => {
                    match match_service::submit_answer(&state, &match_id, &user, option).await {
                        Ok(SubmitOutcome::Accepted { .. }) => {}
                        Ok(SubmitOutcome::Ignored(reason)) => {
                            send(&outbound_tx, &MatchOutboundMessage::Rejected { reason });
                        }
                        Err(err) => report(&outbound_tx, &match_id, &user, err),
                    }
                }
                Ok(MatchInboundMessage::Surrender) => {
                    if let Err(err) = match_service::surrender(&state, &match_id, &user).await {
                        report(&outbound_tx, &match_id, &user, err);
                    }
                }
                Ok(MatchInboundMessage::React { value }) => {
                    if let Err(err) = validate_reaction(&value) {
                        send(&outbound_tx, &MatchOutboundMessage::Rejected { reason: err.to_string() });
                    } else if let Err(err) = match_service::react(&state, &match_id, &user, &value).await {
                        report(&outbound_tx, &match_id, &user, err);
                    }
                }
                Ok(MatchInboundMessage::Leave) => {
                    state.presence().cancel(connection);
                    if let Err(err) = match_service::leave(&state, &match_id, &user).await {
                        report(&outbound_tx, &match_id, &user, err);
                    }
                    left = true;
                    let _ = outbound_tx.send(Message::Close(None));
                    break;
                }
                Ok(MatchInboundMessage::Identification { .. }) => {
                    warn!(match_id = %match_id, user = %user, "ignoring duplicate identification message");
                }
                Ok(MatchInboundMessage::Unknown) => {
                    debug!(match_id = %match_id, user = %user, "ignoring unknown message type");
                }
                Err(err) => {
                    warn!(match_id = %match_id, user = %user, error = %err, "failed to parse match message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(match_id = %match_id, user = %user, "match connection closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(match_id = %match_id, user = %user, error = %err, "websocket error");
                break;
            }
        }
    }

    forwarder.abort();
    if !left {
        let fired = state.presence().fire(connection);
        if let Err(err) = apply_disconnect(&state, fired).await {
            warn!(match_id = %match_id, user = %user, error = %err, "disconnect handling failed");
        }
    }
    state.hub().prune();
    info!(match_id = %match_id, user = %user, "match connection finished");

    finalize(writer_task, outbound_tx).await;
}

/// Push hub events to this socket and settle disconnects it observes.
fn spawn_forwarder(
    state: SharedState,
    mut events: tokio::sync::broadcast::Receiver<MatchEvent>,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let MatchEvent::Updated(record) = &event {
                        observe(&state, record).await;
                    }
                    let deleted = matches!(event, MatchEvent::Deleted);
                    if !send(&tx, &MatchOutboundMessage::from(&event)) || deleted {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "match subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn observe(state: &SharedState, record: &Arc<Match>) {
    let Some(store) = state.game_store().await else {
        return;
    };
    settlement_service::observe_disconnect(state, &store, record).await;
}

/// Serialize and queue a message; false once the writer is gone.
fn send(tx: &mpsc::UnboundedSender<Message>, message: &MatchOutboundMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(payload) => tx.send(Message::Text(payload.into())).is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound message");
            true
        }
    }
}

fn report(tx: &mpsc::UnboundedSender<Message>, match_id: &MatchId, user: &UserId, err: ServiceError) {
    warn!(match_id = %match_id, user = %user, error = %err, "match action failed");
    send(tx, &MatchOutboundMessage::Error { message: err.to_string() });
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
