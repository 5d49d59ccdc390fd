//! WebRTC signaling types and connection states

use serde::{Deserialize, Serialize};

/// SDP offer sent to the avatar service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    /// SDP content
    pub sdp: String,
    /// Whether this offer restarts ICE on an existing session
    #[serde(default, rename = "iceRestart")]
    pub ice_restart: bool,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_restart: false,
        }
    }

    pub fn restart(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            ice_restart: true,
        }
    }
}

/// SDP answer returned by the avatar service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// Session-level (peer connection) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Transport-level (ICE) connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// Connected or completed: media can flow
    pub fn is_healthy(&self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IceConnectionState::New => write!(f, "new"),
            IceConnectionState::Checking => write!(f, "checking"),
            IceConnectionState::Connected => write!(f, "connected"),
            IceConnectionState::Completed => write!(f, "completed"),
            IceConnectionState::Disconnected => write!(f, "disconnected"),
            IceConnectionState::Failed => write!(f, "failed"),
            IceConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of every state a peer connection exposes.
///
/// Attached to failures for postmortem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub ice: IceConnectionState,
    pub connection: ConnectionState,
    pub signaling: String,
    pub gathering: String,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            ice: IceConnectionState::New,
            connection: ConnectionState::New,
            signaling: "stable".to_string(),
            gathering: "new".to_string(),
        }
    }
}

impl std::fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ice={} connection={} signaling={} gathering={}",
            self.ice, self.connection, self.signaling, self.gathering
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_state_health() {
        assert!(IceConnectionState::Connected.is_healthy());
        assert!(IceConnectionState::Completed.is_healthy());
        assert!(!IceConnectionState::Disconnected.is_healthy());
        assert!(!IceConnectionState::Checking.is_healthy());
    }

    #[test]
    fn test_offer_serialization() {
        let offer = SdpOffer::restart("v=0");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["sdp"], "v=0");
        assert_eq!(json["iceRestart"], true);

        let parsed: SdpOffer = serde_json::from_str(r#"{"sdp":"v=0"}"#).unwrap();
        assert!(!parsed.ice_restart);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = StateSnapshot {
            ice: IceConnectionState::Failed,
            connection: ConnectionState::Failed,
            signaling: "stable".into(),
            gathering: "complete".into(),
        };
        assert_eq!(
            snapshot.to_string(),
            "ice=failed connection=failed signaling=stable gathering=complete"
        );
    }
}
