//! WebSocket handler for running turns and streaming their progress.
//!
//! The `/ws/chat` endpoint upgrades an HTTP connection to a WebSocket.
//! Once connected, the handler:
//!
//! - **Forwards events:** Subscribes to the [`EventBus`] on [`AppState`] and
//!   pushes each [`TurnEvent`] for the connection's thread to the client as
//!   a JSON text frame.
//! - **Receives commands:** Parses incoming text frames as [`WsCommand`] and
//!   drives turns, approvals, and corrections through the turn service.
//!
//! Turns run in spawned tasks so the socket keeps streaming progress events
//! while a turn is in flight. Terminal outcomes come back over an internal
//! channel and go out as `turn_complete` / `turn_error` frames. A pause is
//! not terminal: it surfaces as the engine's `interruption` event, and a
//! rejection leaves the thread paused with nothing new to report.
//!
//! Lagged receivers (when the client is too slow to keep up) are handled
//! gracefully: the handler logs a warning and continues receiving.
//!
//! Disconnecting a WebSocket does **not** abort a running turn. The spawned
//! task drives it to completion or to its next checkpoint, and the client
//! can reconnect and pick up from the persisted history.
//!
//! [`EventBus`]: worklens_core::event::EventBus
//! [`TurnEvent`]: worklens_types::event::TurnEvent

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use worklens_core::turn::{TurnError, TurnReply};
use worklens_types::state::{ChatMessage, TurnOptions};

use crate::state::AppState;

/// Incoming command from a WebSocket client.
///
/// Clients send JSON-encoded text frames matching one of these variants.
/// Unknown or malformed messages are logged and ignored.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Run a turn for a question. Without a `thread_id` a new chat is
    /// allocated. The connection follows this thread from here on.
    StartTurn {
        question: String,
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        options: TurnOptions,
    },
    /// Approve or reject the query the connection's thread is paused on.
    Resume {
        approved: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
    /// Resume the connection's thread with a hand-corrected query.
    ConfirmQuery {
        query: String,
        data: serde_json::Value,
    },
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Terminal frame sent when a spawned turn task finishes.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    /// The turn reached a terminal node; `message` is the new assistant
    /// message, already persisted.
    TurnComplete {
        thread_id: String,
        message: ChatMessage,
    },
    /// The turn failed. The message history is unchanged.
    TurnError { thread_id: String, error: String },
}

/// Upgrade an HTTP request to a WebSocket connection for chat turns.
///
/// This is mounted at `/ws/chat` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Core WebSocket connection handler.
///
/// Uses `tokio::select!` to multiplex between event bus events, terminal
/// frames from spawned turn tasks, and incoming WebSocket messages. Keeping
/// the sender in this single task means every outbound frame goes through
/// one writer, while the turns themselves run elsewhere.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Subscribe to the event bus for turn progress events.
    let mut event_rx = state.event_bus.subscribe();

    // Spawned turn tasks report their outcome here; they cannot write to
    // the socket directly.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsReply>();

    // Thread this connection is driving. Until the first start_turn every
    // event is forwarded, so a listen-only client can observe turns
    // started elsewhere.
    let mut current_thread: Option<String> = None;

    loop {
        tokio::select! {
            // --- Branch 1: Forward EventBus events to WebSocket client ---
            event_result = event_rx.recv() => {
                match event_result {
                    Ok(event) => {
                        let wanted = match &current_thread {
                            Some(thread_id) => *thread_id == event.thread_id,
                            None => true,
                        };
                        if !wanted {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    // Client disconnected
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("Failed to serialize TurnEvent: {err}");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            skipped = n,
                            "WebSocket subscriber lagged, skipping {n} events"
                        );
                        // Continue receiving -- the client will miss some events
                        // but will catch up with the next ones.
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // EventBus sender was dropped (server shutting down)
                        break;
                    }
                }
            }

            // --- Branch 2: Deliver terminal frames from spawned turn tasks ---
            reply = reply_rx.recv() => {
                // reply_tx lives in this scope, so recv() never yields None.
                if let Some(reply) = reply {
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!("Failed to serialize terminal frame: {err}");
                        }
                    }
                }
            }

            // --- Branch 3: Process commands from WebSocket client ---
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        process_command(
                            &text,
                            &mut ws_sender,
                            &state,
                            &mut current_thread,
                            &reply_tx,
                        ).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Client disconnected
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Ignore binary, ping, pong protocol frames (handled by axum/tungstenite)
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

/// Parse and process a single command from the WebSocket client.
async fn process_command(
    text: &str,
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    state: &AppState,
    current_thread: &mut Option<String>,
    reply_tx: &mpsc::UnboundedSender<WsReply>,
) {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(
                raw = %text,
                error = %err,
                "Ignoring malformed WebSocket command"
            );
            return;
        }
    };

    match cmd {
        WsCommand::StartTurn {
            question,
            thread_id,
            options,
        } => {
            let thread = match thread_id {
                Some(id) => id,
                None => match state.chat_service.next_thread_id().await {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::warn!(error = %err, "StartTurn: could not allocate a thread id");
                        return;
                    }
                },
            };
            *current_thread = Some(thread.clone());
            tracing::info!(thread_id = %thread, "turn started via WebSocket");

            let service = state.turn_service.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let result = service.start_turn(&thread, &question, options).await;
                forward_outcome(thread, result, &reply_tx);
            });
        }
        WsCommand::Resume { approved, data } => {
            let Some(thread) = current_thread.clone() else {
                tracing::warn!("Resume: no turn started on this connection");
                return;
            };
            tracing::info!(thread_id = %thread, approved, "resume via WebSocket");

            let service = state.turn_service.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let result = service.resume_turn(&thread, approved, data).await;
                forward_outcome(thread, result, &reply_tx);
            });
        }
        WsCommand::ConfirmQuery { query, data } => {
            let Some(thread) = current_thread.clone() else {
                tracing::warn!("ConfirmQuery: no turn started on this connection");
                return;
            };
            tracing::info!(thread_id = %thread, "corrected query via WebSocket");

            let service = state.turn_service.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let result = service.confirm_query(&thread, query, data).await;
                forward_outcome(thread, result, &reply_tx);
            });
        }
        WsCommand::Ping => {
            let pong = r#"{"type":"pong"}"#;
            if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                tracing::debug!("Failed to send pong (client disconnecting)");
            }
        }
    }
}

/// Map a finished turn onto its terminal frame, if it gets one.
///
/// A pause already went out through the event bus as an `interruption`
/// event, and a rejection changes nothing, so neither sends a frame.
fn forward_outcome(
    thread_id: String,
    result: Result<TurnReply, TurnError>,
    reply_tx: &mpsc::UnboundedSender<WsReply>,
) {
    match result {
        Ok(TurnReply::Completed { message }) => {
            let _ = reply_tx.send(WsReply::TurnComplete { thread_id, message });
        }
        Ok(TurnReply::Paused { .. }) | Ok(TurnReply::Rejected) => {}
        Err(err) => {
            tracing::warn!(thread_id = %thread_id, error = %err, "turn failed");
            let _ = reply_tx.send(WsReply::TurnError {
                thread_id,
                error: err.to_string(),
            });
        }
    }
}
