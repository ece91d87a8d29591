//! HTTP API handlers.
//!
//! Endpoints:
//!
//! - `POST /api/chat`: send a message, get an SSE stream of the turn
//! - `POST /api/confirm-action/{action_id}`: perform a pending action
//! - `POST /api/cancel-action/{action_id}`: discard a pending action
//! - `GET /api/status`: session status
//! - `GET /health`: liveness

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use scarlett_agent::{EventEmitter, Expression, Mode, PushEvent, TurnError};
use scarlett_core::error::ProviderError;
use scarlett_core::pending::ActionOutcome;

use crate::SharedState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub model: String,
    pub messages: usize,
    pub mode: Mode,
    pub expression: Expression,
    pub pending_actions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub(crate) async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// `POST /api/chat`: run one turn and stream it as server-sent events.
pub(crate) async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Empty message".into(),
            }),
        ));
    }

    info!(message_len = message.len(), "Chat request");
    let (push_tx, push_rx) = mpsc::channel(64);
    tokio::spawn(run_chat_turn(state, message, push_tx));

    let stream = ReceiverStream::new(push_rx)
        .map(|push: PushEvent| Ok(SseEvent::default().event(push.event).data(push.data.to_string())));
    Ok(Sse::new(stream))
}

/// Drive one turn against the session, pushing each message to `push_tx`
/// as soon as it is produced. Turns are serialized by the session's turn gate.
async fn run_chat_turn(state: SharedState, message: String, push_tx: mpsc::Sender<PushEvent>) {
    let _turn = state.turn_gate.lock().await;

    let history = {
        let mut session = state.lock_session();
        session.push_user(message);
        session.transcript()
    };

    let mut emitter = EventEmitter::new(state.classifier.clone());
    let (event_tx, mut event_rx) = mpsc::channel(64);

    let turn = state.agent.run_turn(&history, event_tx);
    let forward = async {
        while let Some(event) = event_rx.recv().await {
            if let Some(push) = emitter.event(&event)
                && push_tx.send(push).await.is_err()
            {
                debug!("SSE client went away, no further events delivered");
                event_rx.close();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(turn, forward);

    let terminal = {
        let mut session = state.lock_session();
        match result {
            Ok(summary) => {
                if !summary.full_response.is_empty() {
                    session.commit_assistant(summary.full_response);
                }
                session.set_mood(emitter.mood());
                emitter.done()
            }
            Err(e) => {
                error!(error = %e, detail = ?e, "Chat turn failed");
                if e.partial().is_empty() {
                    session.rollback_user();
                } else {
                    session.commit_assistant(e.partial());
                }
                emitter.error(user_facing_error(&e))
            }
        }
    };

    if let Some(push) = terminal {
        let _ = push_tx.send(push).await;
    }
}

/// Text shown to the user when a turn fails. Never the raw provider error.
pub fn user_facing_error(err: &TurnError) -> String {
    let Some(provider_error) = err.provider_error() else {
        return "The connection closed before the reply finished.".into();
    };

    let raw = provider_error.to_string().to_lowercase();
    let reason = if raw.contains("queue_exceeded")
        || raw.contains("too_many_requests")
        || matches!(provider_error, ProviderError::RateLimited { .. })
    {
        "The model provider is congested right now. Please try again in a moment."
    } else if raw.contains("503") {
        "The model provider is temporarily unstable. Please try again in a moment."
    } else {
        match provider_error {
            ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_) => {
                "The model provider rejected the request. Check the API key in your configuration."
            }
            ProviderError::Timeout(_) => "The model provider took too long to respond.",
            ProviderError::StreamInterrupted(_) | ProviderError::Network(_) => {
                "The connection to the model provider was interrupted."
            }
            _ => "Something went wrong while talking to the model provider.",
        }
    };

    match provider_error {
        ProviderError::Unavailable { attempts, .. } => format!("{reason} (gave up after {attempts} attempts)"),
        _ => reason.to_string(),
    }
}

/// `POST /api/confirm-action/{action_id}`: 200 when performed, 400 otherwise.
pub(crate) async fn confirm_action_handler(
    State(state): State<SharedState>,
    Path(action_id): Path<String>,
) -> (StatusCode, Json<ActionOutcome>) {
    let outcome = state.pending.confirm(&action_id).await;
    let status = match outcome {
        ActionOutcome::Completed { .. } => StatusCode::OK,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(outcome))
}

/// `POST /api/cancel-action/{action_id}`: 200 when discarded, 404 when unknown.
pub(crate) async fn cancel_action_handler(
    State(state): State<SharedState>,
    Path(action_id): Path<String>,
) -> (StatusCode, Json<ActionOutcome>) {
    let outcome = state.pending.cancel(&action_id);
    let status = match outcome {
        ActionOutcome::Cancelled { .. } => StatusCode::OK,
        _ => StatusCode::NOT_FOUND,
    };
    (status, Json(outcome))
}

/// `GET /api/status`
pub(crate) async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let (messages, mood) = {
        let session = state.lock_session();
        (session.messages().len(), session.mood())
    };
    Json(StatusResponse {
        model: state.agent.client().model().to_string(),
        messages,
        mode: mood.mode,
        expression: mood.expression,
        pending_actions: state.pending.len(),
    })
}
