use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::webrtc::config::{public_ice, MIN_FALLBACK_SERVERS};

// Re-export AvatarConfig from avatar module
pub use crate::avatar::config::AvatarConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Token issuance backend
    pub credential: CredentialConfig,
    /// Relay descriptor endpoint
    pub relay: RelayConfig,
    /// Peer connection settings
    pub transport: TransportSettings,
    /// Grace, back-off and retry budget
    pub health: HealthConfig,
    /// Avatar rendering options
    pub avatar: AvatarConfig,
    /// Microphone capture
    pub capture: CaptureConfig,
    /// Speech-to-text backend
    pub transcription: TranscriptionConfig,
    /// Diagnostic feed
    pub diagnostics: DiagnosticsConfig,
}

impl AppConfig {
    /// Check every section; the first problem found is reported
    pub fn validate(&self) -> Result<()> {
        if self.credential.endpoint.trim().is_empty() {
            return Err(AppError::Config("credential.endpoint is empty".into()));
        }
        if !self.relay.endpoint_template.contains("{region}") {
            return Err(AppError::Config(
                "relay.endpoint_template must contain {region}".into(),
            ));
        }
        let fallbacks = self
            .relay
            .fallback_servers
            .iter()
            .filter(|s| !s.trim().is_empty())
            .count();
        if fallbacks < MIN_FALLBACK_SERVERS {
            return Err(AppError::Config(format!(
                "relay.fallback_servers needs at least {} addresses, got {}",
                MIN_FALLBACK_SERVERS, fallbacks
            )));
        }
        if self.health.max_recovery_attempts == 0 {
            return Err(AppError::Config(
                "health.max_recovery_attempts must be at least 1".into(),
            ));
        }
        if self.capture.sample_rate == 0 || self.capture.block_size == 0 {
            return Err(AppError::Config(
                "capture.sample_rate and capture.block_size must be positive".into(),
            ));
        }
        if self.diagnostics.capacity == 0 {
            return Err(AppError::Config("diagnostics.capacity must be positive".into()));
        }
        self.avatar.validate()
    }
}

/// Credential endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialConfig {
    /// Returns `{"token": .., "region": ..}`
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/get-speech-token".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl CredentialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Relay resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// `{region}` is replaced with the credential's region
    pub endpoint_template: String,
    pub timeout_ms: u64,
    /// Address-only servers used when no descriptor can be derived
    pub fallback_servers: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_template:
                "https://{region}.tts.speech.microsoft.com/cognitiveservices/avatar/relay/token/v1"
                    .to_string(),
            timeout_ms: 5_000,
            fallback_servers: public_ice::FALLBACK_SERVERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportSettings {
    pub candidate_pool_size: u8,
    pub gathering_timeout_ms: u64,
    /// How long `connect()` waits for the first healthy observation
    pub connection_timeout_ms: u64,
    pub mdns: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            candidate_pool_size: 10,
            gathering_timeout_ms: 5_000,
            connection_timeout_ms: 30_000,
            mdns: false,
        }
    }
}

impl TransportSettings {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub grace_period_ms: u64,
    pub retry_delay_ms: u64,
    pub max_recovery_attempts: u32,
    /// Delay before the explicit play call on a bound sink
    pub autoplay_retry_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
            retry_delay_ms: 2_000,
            max_recovery_attempts: 3,
            autoplay_retry_ms: 1_000,
        }
    }
}

impl HealthConfig {
    pub fn autoplay_retry(&self) -> Duration {
        Duration::from_millis(self.autoplay_retry_ms)
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// ALSA device name
    pub device: String,
    /// Requested rate; the device may pick the nearest supported one
    pub sample_rate: u32,
    /// Samples per captured block
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16_000,
            block_size: 4096,
        }
    }
}

/// Transcription endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/speech/transcribe".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Diagnostic feed configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Retained lines
    pub capacity: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}
