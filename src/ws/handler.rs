//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use std::pin::Pin;

use futures::{
    stream::{Peekable, SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::ws::protocol::{self, SteerDecision};
use crate::ws::session::{FrameOutcome, Session};

/// Why the receive loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    StreamEnded,
    TransportError,
    SendFailed,
    Shutdown,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut session = Session::new(state.decider.clone(), &state.config);
    let session_id = session.id();
    let guard = state.sessions.register(session_id);

    if let Err(e) = session.open() {
        error!(session_id = %session_id, error = %e, "Failed to open session");
        return;
    }

    info!(
        session_id = %session_id,
        active_sessions = state.sessions.active_sessions(),
        decision_source = state.decider.source_name(),
        "New game session"
    );

    let (mut ws_sink, ws_stream) = socket.split();
    let shutdown = state.shutdown_signal();

    let end = run_session(&mut session, &mut ws_sink, ws_stream.peekable(), shutdown).await;

    if let Err(e) = session.begin_close() {
        warn!(session_id = %session_id, error = %e, "Unexpected session state on close");
    }
    if end == SessionEnd::Shutdown {
        let _ = ws_sink.send(Message::Close(None)).await;
    }
    let _ = ws_sink.close().await;
    if let Err(e) = session.finish_close() {
        warn!(session_id = %session_id, error = %e, "Unexpected session state on close");
    }

    info!(
        session_id = %session_id,
        reason = ?end,
        throttled_frames = session.throttled_frames(),
        connected_ms = guard.connected_for().as_millis() as u64,
        "Game session closed"
    );
}

/// Receive loop: one frame at a time, each answered (or not) before the next
/// is read
async fn run_session(
    session: &mut Session,
    ws_sink: &mut SplitSink<WebSocket, Message>,
    mut ws_stream: Peekable<SplitStream<WebSocket>>,
    mut shutdown: watch::Receiver<bool>,
) -> SessionEnd {
    let session_id = session.id();

    loop {
        if *shutdown.borrow() {
            return SessionEnd::Shutdown;
        }

        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
                continue;
            }
            Some(Ok(Message::Ping(_))) => {
                debug!(session_id = %session_id, "Received ping");
                continue;
            }
            Some(Ok(Message::Pong(_))) => {
                debug!(session_id = %session_id, "Received pong");
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                info!(session_id = %session_id, "Client initiated close");
                return SessionEnd::ClientClosed;
            }
            Some(Err(e)) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                return SessionEnd::TransportError;
            }
            None => return SessionEnd::StreamEnded,
        };

        let decision = match session.handle_text(&text).await {
            FrameOutcome::Respond(decision) => decision,
            FrameOutcome::Silent => continue,
            FrameOutcome::Rejected(e) => {
                warn!(session_id = %session_id, error = %e, "Dropping bad frame");
                continue;
            }
            FrameOutcome::Throttled => {
                debug!(session_id = %session_id, "Rate limited input message");
                continue;
            }
            FrameOutcome::NotOpen => {
                debug!(session_id = %session_id, state = %session.state(), "Frame on non-open session");
                continue;
            }
        };

        // Abandon the pending response if the server goes down or the client
        // leaves mid-wait
        tokio::select! {
            _ = session.pace() => {}
            _ = shutdown.changed() => return SessionEnd::Shutdown,
            end = client_gone(&mut ws_stream) => {
                debug!(session_id = %session_id, reason = ?end, "Client left while a response was pending");
                return end;
            }
        }

        if let Err(e) = send_decision(ws_sink, &decision).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            return SessionEnd::SendFailed;
        }
        session.mark_sent();
    }
}

/// Resolves only once the client has closed or the transport failed. A data
/// frame stays buffered in the stream for the receive loop.
async fn client_gone(ws_stream: &mut Peekable<SplitStream<WebSocket>>) -> SessionEnd {
    match Pin::new(ws_stream).peek().await {
        None => SessionEnd::StreamEnded,
        Some(Ok(Message::Close(_))) => SessionEnd::ClientClosed,
        Some(Err(_)) => SessionEnd::TransportError,
        Some(Ok(_)) => std::future::pending().await,
    }
}

/// Send a decision over WebSocket
async fn send_decision(
    sink: &mut SplitSink<WebSocket, Message>,
    decision: &SteerDecision,
) -> Result<(), String> {
    let json = protocol::encode(decision).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
