//! Session event types
//!
//! Every event published on the bus. Serialized as
//! `{"event": "<name>", "data": {...}}` so a front end can switch on the name.

use serde::{Deserialize, Serialize};

/// Event broadcast through the event bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Orchestrator state transition
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// Previous state, e.g. "negotiating"
        from: String,
        /// New state, e.g. "connected"
        to: String,
    },

    /// Observation of one of the transport's state machines
    #[serde(rename = "transport.state_changed")]
    TransportStateChanged {
        /// "ice", "connection", "signaling" or "gathering"
        layer: String,
        state: String,
    },

    /// Recovery step taken by the health monitor
    #[serde(rename = "session.recovery")]
    Recovery {
        /// "grace_armed", "grace_cancelled", "ice_restart", "recovery_scheduled",
        /// "healthy" or "gave_up"
        action: String,
        /// Recovery attempt counter at the time of the action
        attempt: u32,
    },

    /// Error surfaced to the user
    #[serde(rename = "session.error")]
    SessionError {
        /// Error code, see `AppError::code`
        code: String,
        message: String,
        /// Transport state snapshot at failure time
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },

    /// Remote track bound to a local sink
    #[serde(rename = "media.bound")]
    MediaBound { kind: String, track_id: String },

    /// Readiness report of a playback sink
    #[serde(rename = "media.sink")]
    MediaSink {
        kind: String,
        /// "metadata_loaded", "can_play", "playing" or "error"
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Capture pipeline state
    #[serde(rename = "capture.state_changed")]
    CaptureStateChanged {
        /// "uninitialized", "ready", "recording" or "error"
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl SessionEvent {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::TransportStateChanged { .. } => "transport.state_changed",
            Self::Recovery { .. } => "session.recovery",
            Self::SessionError { .. } => "session.error",
            Self::MediaBound { .. } => "media.bound",
            Self::MediaSink { .. } => "media.sink",
            Self::CaptureStateChanged { .. } => "capture.state_changed",
        }
    }
}
