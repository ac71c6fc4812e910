//! Streaming endpoint: `/ws`.
//!
//! Each connection runs two tasks: the reader (this handler) feeds inbound
//! frames through the inbound fault pipeline and the router; the writer
//! drains the session's bounded queue through the outbound pipeline. Fault
//! sleeps therefore penalize only the session they belong to.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::MessageKind;
use super::sessions::{Outbound, OUTBOUND_QUEUE_CAPACITY};
use super::AppState;
use crate::faults::FaultContext;

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let session_id = state.sessions.add(out_tx);
    info!(session_id, "client connected");

    let writer = tokio::spawn(outbound_worker(
        state.clone(),
        session_id.clone(),
        out_rx,
        sink,
    ));

    read_loop(&state, &session_id, stream).await;

    state.sessions.remove(&session_id);
    writer.abort();
    info!(session_id, "client disconnected");
}

async fn read_loop(state: &Arc<AppState>, session_id: &str, mut stream: SplitStream<WebSocket>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => process_frame(state, session_id, text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => debug!(session_id, "ignoring non-text frame"),
            Err(e) => {
                warn!(session_id, error = %e, "websocket receive error");
                break;
            }
        }
    }
}

/// Inbound pipeline → router → reply into the session queue.
pub async fn process_frame(state: &Arc<AppState>, session_id: &str, raw: String) {
    let mut ctx = FaultContext::inbound(session_id, peek_type(&raw));
    let Some(frame) = state.faults.inject_inbound(raw, &mut ctx).await else {
        // Rate-limit consumption surfaces a structured error; anything else
        // is the fault we were asked to inject.
        if let Some(rejection) = ctx.rate_limited {
            let details = serde_json::json!({
                "retry_after": rejection.retry_after,
                "violation_count": rejection.violation_count,
            });
            let reply = super::messages::ServerMessage::error(
                None,
                "RATE_LIMITED",
                rejection.message,
                Some(details),
            );
            state.sessions.send(
                session_id,
                Arc::from(reply.to_json().as_str()),
                MessageKind::Error,
            );
        } else {
            debug!(session_id, "inbound frame consumed by fault pipeline");
        }
        return;
    };

    state.sessions.touch(session_id);

    if let Some(reply) = state.router.route(&frame, session_id) {
        state.sessions.send(
            session_id,
            Arc::from(reply.to_json().as_str()),
            reply.kind(),
        );
    }
}

/// Best-effort message kind for fault contexts, read before parsing proper.
fn peek_type(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

async fn outbound_worker(
    state: Arc<AppState>,
    session_id: String,
    mut out_rx: mpsc::Receiver<Outbound>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(outbound) = out_rx.recv().await {
        match outbound {
            Outbound::Frame { payload, kind } => {
                let mut ctx = FaultContext::outbound(&session_id, kind.as_str());
                let Some(frame) = state
                    .faults
                    .inject_outbound(payload.to_string(), &mut ctx)
                    .await
                else {
                    continue;
                };
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
