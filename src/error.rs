use thiserror::Error;

use crate::webrtc::signaling::StateSnapshot;
use crate::webrtc::track::MediaKind;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Transport construction failed: {0}")]
    TransportConstruction(String),

    #[error("Negotiation failed after {attempts} recovery attempt(s): {reason} [{snapshot}]")]
    NegotiationFailure {
        attempts: u32,
        reason: String,
        snapshot: StateSnapshot,
    },

    #[error("ICE connection failed: {reason} [{snapshot}]")]
    IceConnectionFailed {
        reason: String,
        snapshot: StateSnapshot,
    },

    #[error("Media binding error [{kind}]: {reason}")]
    MediaBinding { kind: MediaKind, reason: String },

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capture not started")]
    CaptureNotStarted,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Whether the error ends the current `connect()` call outright
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Credential(_)
                | AppError::TransportConstruction(_)
                | AppError::NegotiationFailure { .. }
                | AppError::IceConnectionFailed { .. }
                | AppError::Cancelled
        )
    }

    /// Short machine-readable code, used in events and diagnostics
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Credential(_) => "credential",
            AppError::TransportConstruction(_) => "transport_construction",
            AppError::NegotiationFailure { .. } => "negotiation_failure",
            AppError::IceConnectionFailed { .. } => "ice_connection_failed",
            AppError::MediaBinding { .. } => "media_binding",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::CaptureNotStarted => "capture_not_started",
            AppError::InvalidState(_) => "invalid_state",
            AppError::BadRequest(_) => "bad_request",
            AppError::Synthesis(_) => "synthesis",
            AppError::Transcription(_) => "transcription",
            AppError::AudioError(_) => "audio",
            AppError::WebRtcError(_) => "webrtc",
            AppError::Cancelled => "cancelled",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::Http(_) => "http",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
