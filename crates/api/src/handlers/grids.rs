//! Handlers for the `/grids` resource.
//!
//! A grid run is one WebSocket conversation: the client sends a single text
//! frame holding the run request, the server streams progress events back as
//! text frames and closes after the terminal event. A `{"cancel": true}`
//! frame or closing the socket cancels the run.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use gridgen_core::error::{GridError, INTERNAL_ERROR_MESSAGE};
use gridgen_core::naming::clean_folder_name;
use gridgen_events::{ChannelSink, GridEvent, ProgressSink};
use gridgen_pipeline::{GridRunRequest, SessionClaims};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Events buffered between the run and the socket writer.
const EVENT_BUFFER: usize = 64;

/// How long the socket writer may take to flush after the run ended.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client frame accepted while a run is streaming.
#[derive(Debug, Default, Deserialize)]
struct ControlFrame {
    #[serde(default)]
    cancel: bool,
}

fn is_cancel_frame(text: &str) -> bool {
    serde_json::from_str::<ControlFrame>(text)
        .map(|frame| frame.cancel)
        .unwrap_or(false)
}

fn text_frame(event: &GridEvent) -> Message {
    Message::Text(event.to_json().to_string().into())
}

/// GET /api/v1/grids/run
///
/// Upgrade to a WebSocket that executes one grid run.
pub async fn run_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_run_socket(socket, state))
}

/// Drive one run socket.
///
///   1. Reads the run request from the first text frame.
///   2. Spawns a writer task that forwards run events to the socket.
///   3. Runs the grid while watching inbound frames for cancellation.
///   4. Waits for the writer to flush the terminal event.
async fn handle_run_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Grid run socket connected");

    let (mut sink, mut stream) = socket.split();

    let request = match read_run_request(&mut stream, &conn_id).await {
        Some(Ok(request)) => request,
        Some(Err(message)) => {
            tracing::warn!(conn_id = %conn_id, error = %message, "Rejected grid run request");
            let _ = sink
                .send(text_frame(&GridEvent::error(message, "BAD_REQUEST")))
                .await;
            let _ = sink.close().await;
            return;
        }
        None => {
            tracing::info!(conn_id = %conn_id, "Grid run socket closed before a request");
            return;
        }
    };

    let (events, mut rx) = ChannelSink::channel(EVENT_BUFFER);

    // Writer task: forward run events to the socket until the terminal one.
    let writer_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            if sink.send(text_frame(&event)).await.is_err() {
                tracing::debug!(conn_id = %writer_conn_id, "Grid run socket sink closed");
                return;
            }
            if terminal {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let session = SessionClaims::new(state.user_id());
    let runner = Arc::clone(&state.runner);
    let run_session = Arc::clone(&session);
    let run_events: Arc<dyn ProgressSink> = Arc::new(events.clone());
    let mut run = tokio::spawn(async move { runner.run(&run_session, request, run_events).await });

    // Receiver loop: watch for cancellation while the run streams.
    let mut listening = true;
    let joined = loop {
        tokio::select! {
            joined = &mut run => break joined,
            frame = stream.next(), if listening => match frame {
                Some(Ok(Message::Text(text))) => {
                    if is_cancel_frame(text.as_str()) {
                        tracing::info!(conn_id = %conn_id, "Client cancelled grid run");
                        session.interrupt_all();
                    } else {
                        tracing::debug!(conn_id = %conn_id, "Ignoring client frame during run");
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(conn_id = %conn_id, "Client left, cancelling grid run");
                    session.interrupt_all();
                    listening = false;
                }
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Grid run socket receive error");
                    session.interrupt_all();
                    listening = false;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    match joined {
        Ok(outcome) => {
            tracing::info!(
                conn_id = %conn_id,
                phase = %outcome.phase,
                completed = outcome.status.completed,
                failed = outcome.status.failed,
                peak_in_flight = outcome.peak_in_flight,
                "Grid run socket finished",
            );
        }
        Err(e) => {
            let err = GridError::Internal(format!("grid run task failed: {e}"));
            tracing::error!(conn_id = %conn_id, error = %err, "Grid run aborted");
            let _ = events
                .send(GridEvent::error(INTERNAL_ERROR_MESSAGE, err.code()))
                .await;
        }
    }
    drop(events);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    tracing::info!(conn_id = %conn_id, "Grid run socket disconnected");
}

/// Wait for the run request. `None` when the client leaves first.
async fn read_run_request(
    stream: &mut SplitStream<WebSocket>,
    conn_id: &str,
) -> Option<Result<GridRunRequest, String>> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return Some(
                    serde_json::from_str(text.as_str())
                        .map_err(|e| format!("Invalid grid run request: {e}")),
                );
            }
            Ok(Message::Binary(_)) => {
                return Some(Err("Grid run request must be a text frame".to_string()));
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Grid run socket receive error");
                return None;
            }
        }
    }
    None
}

/// GET /api/v1/grids/history
///
/// Names of the user's saved grid runs, newest first.
pub async fn list_history(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<String>>>> {
    let names = state.runner.history().list(state.user_id()).await?;
    Ok(Json(DataResponse {
        data: names.as_ref().clone(),
    }))
}

/// DELETE /api/v1/grids/history/{name}
///
/// Forget a saved run. Its images stay on disk.
pub async fn delete_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    if state.runner.history().delete(state.user_id(), &name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("No saved grid named '{name}'")))
    }
}

/// Query parameters for the folder existence check.
#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    pub folder: String,
}

#[derive(Debug, Serialize)]
pub struct FolderExists {
    /// The cleaned folder, relative to the user's output directory.
    pub folder: String,
    pub exists: bool,
}

/// GET /api/v1/grids/exists?folder=name
pub async fn folder_exists(
    State(state): State<AppState>,
    Query(params): Query<ExistsQuery>,
) -> AppResult<Json<DataResponse<FolderExists>>> {
    let folder = clean_folder_name(&params.folder)?;
    let exists = state
        .runner
        .history()
        .folder_exists(state.user_id(), &folder)
        .await;
    Ok(Json(DataResponse {
        data: FolderExists { folder, exists },
    }))
}
