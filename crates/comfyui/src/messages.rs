//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Only the kinds needed to follow a
//! single prompt to completion are modelled; anything else fails to parse
//! and is skipped by the caller.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node is executing, or the prompt finished when `node` is `None`.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    #[serde(rename = "progress")]
    Progress(ProgressData),

    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Sent by newer servers once every node of a prompt has run.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptRef),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    /// Absent on the idle broadcast some servers send after a queue drains.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// How a prompt ended, as far as the WebSocket stream tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Finished,
    Interrupted,
    Failed {
        node_id: String,
        exception_type: String,
        message: String,
    },
}

impl ComfyUIMessage {
    /// The terminal outcome this message reports for `prompt_id`, if any.
    pub fn outcome_for(&self, prompt_id: &str) -> Option<PromptOutcome> {
        match self {
            Self::Executing(data)
                if data.node.is_none() && data.prompt_id.as_deref() == Some(prompt_id) =>
            {
                Some(PromptOutcome::Finished)
            }
            Self::ExecutionSuccess(data) if data.prompt_id == prompt_id => {
                Some(PromptOutcome::Finished)
            }
            Self::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
                Some(PromptOutcome::Interrupted)
            }
            Self::ExecutionError(data) if data.prompt_id == prompt_id => {
                Some(PromptOutcome::Failed {
                    node_id: data.node_id.clone(),
                    exception_type: data.exception_type.clone(),
                    message: data.exception_message.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
