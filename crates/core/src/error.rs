//! Error taxonomy for grid runs.
//!
//! Every failure a run can observe is classified into one [`GridError`]
//! variant. The variant decides whether submission stops, what the client
//! is told, and which stable `code` accompanies the message.

/// Message shown to clients in place of internal error detail.
pub const INTERNAL_ERROR_MESSAGE: &str = "Failed due to internal error.";

/// Message shown to clients when an output could not be persisted.
pub const PERSISTENCE_ERROR_MESSAGE: &str = "Server failed to save an image.";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// Malformed axis or grid definition. Raised before any job is submitted.
    #[error("{0}")]
    Configuration(String),

    /// Composite output requested for more axes than the layout supports.
    #[error("Composite grid images support at most {max} axes, got {got}")]
    UnsupportedLayout { got: usize, max: usize },

    /// A preset named by the presets parameter does not exist.
    #[error("Could not find preset '{0}'")]
    PresetNotFound(String),

    /// The generation backend reported a failure for one cell.
    #[error("Generation failed for cell #{ordinal}: {message}")]
    Generation { ordinal: usize, message: String },

    /// An output could not be saved. Always fatal to the run.
    #[error("Failed to persist output: {0}")]
    Persistence(String),

    /// Anything unclassified. Detail is for server logs only.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the grid crates.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    /// Stable machine-readable code sent alongside client messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnsupportedLayout { .. } => "UNSUPPORTED_LAYOUT",
            Self::PresetNotFound(_) => "PRESET_NOT_FOUND",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The message that may be shown to a client.
    ///
    /// Internal and persistence failures collapse to fixed messages so that
    /// paths and stack detail never leave the server.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            Self::Persistence(_) => PERSISTENCE_ERROR_MESSAGE.to_string(),
            Self::Generation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error ends the run even when continue-on-error is set.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Internal(_))
    }

    /// Whether this error is raised while validating the grid, before any
    /// job could have been submitted.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::UnsupportedLayout { .. })
    }
}
