use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::services::relay::{self, StreamFrame};
use crate::state::AppState;

pub(crate) async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::channel::<StreamFrame>(32);

    // Single writer task; the polling loop and the message handler both feed
    // it through the channel so frames never interleave mid-write.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode relay frame");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // A connection holds at most one subscription; a new one cancels and
    // replaces the previous polling loop.
    let mut active: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match relay::parse_subscription(text.as_str()) {
                    Ok(spec) => {
                        if let Some(previous) = active.take() {
                            previous.cancel();
                        }
                        tracing::debug!(
                            terminal_id = spec.terminal_id,
                            measurand_id = %spec.measurand_id,
                            mode = spec.mode.as_str(),
                            "subscription started"
                        );
                        active = Some(relay::spawn_subscription(
                            state.clone(),
                            spec,
                            frames_tx.clone(),
                        ));
                    }
                    Err(message) => {
                        // Invalid requests leave the current subscription running.
                        if frames_tx.send(StreamFrame::error(message)).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket transport error");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    if let Some(active) = active.take() {
        active.cancel();
    }
    writer.abort();
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", any(stream_handler))
}
