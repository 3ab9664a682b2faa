use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::{matches::MatchView, sse::{Handshake, ServerEvent}},
    services::match_service,
    state::{MatchEvent, MatchId, SharedState},
};

/// Subscribe to a match and build the handshake sent first on the stream.
pub async fn subscribe_match(
    state: &SharedState,
    match_id: &MatchId,
) -> (broadcast::Receiver<MatchEvent>, ServerEvent) {
    let receiver = state.hub().subscribe(match_id);
    let record = match match_service::get_match(state, match_id).await {
        Ok(record) => Some(MatchView::from(&record)),
        Err(err) => {
            warn!(match_id = %match_id, error = %err, "SSE handshake without match state");
            None
        }
    };
    let handshake = Handshake {
        match_id: match_id.to_string(),
        degraded: state.is_degraded().await,
        state: record,
    };
    let event = ServerEvent::json(Some("handshake".to_string()), &handshake).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize SSE handshake");
        ServerEvent {
            event: Some("handshake".to_string()),
            data: String::new(),
        }
    });
    (receiver, event)
}

/// Convert a match subscription into an SSE response, forwarding events and
/// cleaning up once the client disconnects or the match is deleted.
pub fn to_sse_stream(
    match_id: MatchId,
    handshake: ServerEvent,
    mut receiver: broadcast::Receiver<MatchEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(handshake))).await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(match_event) => {
                            let deleted = matches!(match_event, MatchEvent::Deleted);
                            match ServerEvent::from_match_event(&match_event) {
                                Ok(payload) => {
                                    if tx.send(Ok(to_event(payload))).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => warn!(error = %err, "failed to serialize match event"),
                            }
                            if deleted {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }
        info!(match_id = %match_id, "match SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}
