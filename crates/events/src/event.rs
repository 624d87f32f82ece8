//! Wire shapes of grid progress events.
//!
//! Events serialize untagged, so each variant is recognised by its
//! distinguishing field:
//!
//! ```json
//! {"image": "/Output/Grids/x/a.png", "batch_index": "1", "metadata": null}
//! {"status": {"phase": "running", "total_cells": 4, ...}}
//! {"cell_error": "out of memory", "batch_index": "3", "code": "GENERATION_ERROR"}
//! {"success": "complete"}
//! {"error": "Could not find preset 'x'", "code": "PRESET_NOT_FOUND"}
//! ```

use serde::{Deserialize, Serialize};

/// Value of the `success` field on a successful terminal event.
pub const SUCCESS_COMPLETE: &str = "complete";

// ---------------------------------------------------------------------------
// RunPhase
// ---------------------------------------------------------------------------

/// Lifecycle of one run: `Idle -> Running -> {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub total_cells: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
    /// Generations the session still owes on its claim.
    pub waiting_gens: usize,
    pub min_width: u32,
    pub min_height: u32,
}

// ---------------------------------------------------------------------------
// GridEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridEvent {
    Image {
        image: String,
        batch_index: String,
        metadata: Option<String>,
    },
    Status {
        status: RunStatus,
    },
    CellError {
        cell_error: String,
        batch_index: String,
        code: String,
    },
    Success {
        success: String,
    },
    Error {
        error: String,
        code: String,
    },
}

impl GridEvent {
    pub fn image(url: impl Into<String>, batch_index: usize, metadata: Option<String>) -> Self {
        Self::Image {
            image: url.into(),
            batch_index: batch_index.to_string(),
            metadata: metadata.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn status(status: RunStatus) -> Self {
        Self::Status { status }
    }

    pub fn cell_error(message: impl Into<String>, batch_index: usize, code: &str) -> Self {
        Self::CellError {
            cell_error: message.into(),
            batch_index: batch_index.to_string(),
            code: code.to_string(),
        }
    }

    pub fn complete() -> Self {
        Self::Success {
            success: SUCCESS_COMPLETE.to_string(),
        }
    }

    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            error: message.into(),
            code: code.to_string(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_event_shape() {
        let event = GridEvent::image("/Output/a.png", 3, Some("  ".to_string()));
        assert_eq!(
            event.to_json(),
            json!({"image": "/Output/a.png", "batch_index": "3", "metadata": null})
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_event_shapes() {
        assert_eq!(GridEvent::complete().to_json(), json!({"success": "complete"}));
        assert_eq!(
            GridEvent::error("Run failed", "GENERATION_ERROR").to_json(),
            json!({"error": "Run failed", "code": "GENERATION_ERROR"})
        );
        assert!(GridEvent::complete().is_terminal());
        assert!(GridEvent::error("x", "y").is_terminal());
    }

    #[test]
    fn status_uses_snake_case_phase() {
        let status = RunStatus {
            phase: RunPhase::Running,
            total_cells: 4,
            ..Default::default()
        };
        let value = GridEvent::status(status).to_json();
        assert_eq!(value["status"]["phase"], "running");
        assert_eq!(value["status"]["total_cells"], 4);
    }

    #[test]
    fn untagged_events_parse_back_to_their_variant() {
        let parsed: GridEvent =
            serde_json::from_value(json!({"cell_error": "oom", "batch_index": "2", "code": "GENERATION_ERROR"}))
                .unwrap();
        assert_eq!(parsed, GridEvent::cell_error("oom", 2, "GENERATION_ERROR"));
        let parsed: GridEvent =
            serde_json::from_value(json!({"error": "bad", "code": "CONFIGURATION_ERROR"})).unwrap();
        assert!(parsed.is_terminal());
    }
}
