//! Error types shared across the engine boundary.

use thiserror::Error;

/// Engine reply text for a recording refused because the disk is nearly full.
pub const REASON_NOT_ENOUGH_SPACE: &str = "May not be enough space on disk";

/// Engine reply text for a recording refused by the free-space floor.
pub const REASON_MIN_FREE_SPACE: &str = "Limited by minimum free disk space";

/// Errors raised by an engine gateway call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The request never reached the engine, or its reply was lost.
    #[error("Engine transport failure: {0}")]
    Transport(String),

    /// The engine handled the request and refused it.
    #[error("Engine rejected {method}: {reason}")]
    Rejected { method: String, reason: String },

    /// The reply did not have the shape the caller expected.
    #[error("Unexpected response to {method}: {detail}")]
    UnexpectedShape { method: String, detail: String },
}

impl EngineError {
    /// Create a rejection for `method`.
    pub fn rejected(method: &str, reason: impl Into<String>) -> Self {
        EngineError::Rejected {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a shape error for `method`.
    pub fn shape(method: &str, detail: impl Into<String>) -> Self {
        EngineError::UnexpectedShape {
            method: method.to_string(),
            detail: detail.into(),
        }
    }

    /// Human readable reason text, as reported by the engine when available.
    pub fn reason(&self) -> &str {
        match self {
            EngineError::Transport(reason) => reason,
            EngineError::Rejected { reason, .. } => reason,
            EngineError::UnexpectedShape { detail, .. } => detail,
        }
    }
}

/// Coordinator failure taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// No free tuner/demux path.
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// Recording storage exhausted.
    #[error("Insufficient space: {0}")]
    InsufficientSpace(String),

    /// Engine call failed or returned an unexpected shape.
    #[error("Unknown failure: {0}")]
    Unknown(String),

    /// Malformed or unresolvable target reference.
    #[error("Invalid target: {0}")]
    Invalid(String),
}

impl CoordError {
    /// Classify a failed start-recording call by its reply text.
    pub fn from_start_failure(err: &EngineError) -> Self {
        let reason = err.reason();
        if reason.contains(REASON_NOT_ENOUGH_SPACE) || reason.contains(REASON_MIN_FREE_SPACE) {
            CoordError::InsufficientSpace(reason.to_string())
        } else {
            CoordError::Unknown(err.to_string())
        }
    }

    /// Compatibility code for the presentation layer.
    pub fn code(&self) -> RecordingErrorCode {
        match self {
            CoordError::ResourceBusy(_) => RecordingErrorCode::ResourceBusy,
            CoordError::InsufficientSpace(_) => RecordingErrorCode::InsufficientSpace,
            CoordError::Unknown(_) | CoordError::Invalid(_) => RecordingErrorCode::Unknown,
        }
    }
}

impl From<EngineError> for CoordError {
    fn from(err: EngineError) -> Self {
        CoordError::Unknown(err.to_string())
    }
}

/// Recording error code reported to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordingErrorCode {
    /// Unspecified failure.
    Unknown = 0,
    /// Storage exhausted.
    InsufficientSpace = 1,
    /// No tuner path available.
    ResourceBusy = 2,
}

impl From<u16> for RecordingErrorCode {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordingErrorCode::InsufficientSpace,
            2 => RecordingErrorCode::ResourceBusy,
            _ => RecordingErrorCode::Unknown,
        }
    }
}

impl From<RecordingErrorCode> for u16 {
    fn from(value: RecordingErrorCode) -> Self {
        value as u16
    }
}
