//! Follows one prompt over a ComfyUI WebSocket until it ends.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::ComfyUIClientError;
use crate::messages::{parse_message, ComfyUIMessage, PromptOutcome};

/// Read frames until `prompt_id` reaches a terminal state.
///
/// Queue-depth broadcasts seen along the way are stored in `queue_depth`.
/// Returns [`ComfyUIClientError::Protocol`] if the socket ends first.
pub async fn wait_for_prompt<S>(
    ws_stream: &mut S,
    prompt_id: &str,
    queue_depth: &AtomicUsize,
) -> Result<PromptOutcome, ComfyUIClientError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(outcome) = handle_text_message(&text, prompt_id, queue_depth) {
                    return Ok(outcome);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "ComfyUI closed the socket before prompt {prompt_id} finished ({frame:?})"
                )));
            }
            Err(e) => {
                return Err(ComfyUIClientError::Protocol(format!(
                    "WebSocket receive error: {e}"
                )));
            }
        }
    }
    Err(ComfyUIClientError::Protocol(format!(
        "WebSocket ended before prompt {prompt_id} finished"
    )))
}

fn handle_text_message(
    text: &str,
    prompt_id: &str,
    queue_depth: &AtomicUsize,
) -> Option<PromptOutcome> {
    let msg = match parse_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::trace!(error = %e, "Skipping unrecognised ComfyUI message");
            return None;
        }
    };
    match &msg {
        ComfyUIMessage::Status(data) => {
            let remaining = data.status.exec_info.queue_remaining.max(0) as usize;
            queue_depth.store(remaining, Ordering::Relaxed);
            tracing::trace!(queue_remaining = remaining, "ComfyUI queue status");
        }
        ComfyUIMessage::Progress(data) if data.prompt_id.as_deref() == Some(prompt_id) => {
            tracing::trace!(prompt_id, value = data.value, max = data.max, "Generation progress");
        }
        ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            tracing::warn!(
                prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
        }
        _ => {}
    }
    msg.outcome_for(prompt_id)
}
