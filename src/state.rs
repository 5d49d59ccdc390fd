use std::sync::Arc;
use tracing::info;

use crate::audio::{AlsaMicrophone, CaptureEngine, HttpTranscriber, Transcriber};
use crate::avatar::{
    Collaborators, HttpAvatarService, HttpCredentialProvider, SessionOrchestrator,
    SessionSettings,
};
use crate::config::{AppConfig, ConfigStore};
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::webrtc::{HttpRelayFetcher, RelayServerResolver, RelayServerSet, WebRtcTransportFactory};

/// Application-wide state shared by the CLI commands
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Avatar session
    pub session: Arc<SessionOrchestrator>,
    /// Microphone capture, independent of the avatar session
    pub capture: Arc<CaptureEngine<AlsaMicrophone>>,
    /// Event bus for session and capture notifications
    pub events: Arc<EventBus>,
}

impl AppState {
    /// Build the HTTP and WebRTC backed collaborators from the current config
    pub fn from_config(config: ConfigStore) -> Result<Arc<Self>> {
        let cfg: Arc<AppConfig> = config.get();
        cfg.validate()?;

        let events = Arc::new(EventBus::new());
        let collab = http_collaborators(&cfg)?;
        let session = Arc::new(SessionOrchestrator::new(
            SessionSettings::from_config(&cfg),
            collab,
            events.clone(),
        ));
        let capture = Arc::new(
            CaptureEngine::from_config(AlsaMicrophone::new(&cfg.capture.device), &cfg.capture)
                .with_events(events.clone()),
        );

        info!(
            "Application state ready (avatar {}/{}, microphone {})",
            cfg.avatar.character, cfg.avatar.style, cfg.capture.device
        );
        Ok(Arc::new(Self {
            config,
            session,
            capture,
            events,
        }))
    }

    /// Disconnect the session and abort any recording
    pub async fn shutdown(&self) {
        if self.capture.is_recording() {
            let _ = self.capture.cancel().await;
        }
        self.session.disconnect().await;
    }
}

fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Collaborators talking to the configured HTTP endpoints
pub fn http_collaborators(cfg: &AppConfig) -> Result<Collaborators> {
    let credentials = HttpCredentialProvider::new(
        http_client(cfg.credential.timeout())?,
        cfg.credential.endpoint.clone(),
    );
    let fetcher = HttpRelayFetcher::new(
        http_client(cfg.relay.timeout())?,
        cfg.relay.endpoint_template.clone(),
    );
    let relays = RelayServerResolver::new(Arc::new(fetcher), cfg.relay.timeout())
        .with_fallback(RelayServerSet::fallback_from(&cfg.relay.fallback_servers));
    let avatar = HttpAvatarService::new(http_client(cfg.credential.timeout())?, cfg.avatar.clone());
    let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::new(
        http_client(cfg.transcription.timeout())?,
        cfg.transcription.endpoint.clone(),
    ));

    Ok(Collaborators {
        credentials: Arc::new(credentials),
        relays,
        transports: Arc::new(WebRtcTransportFactory::new()),
        avatar: Arc::new(avatar),
        transcriber: Some(transcriber),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_from_default_config() {
        let store = ConfigStore::in_memory(AppConfig::default()).unwrap();
        let state = AppState::from_config(store).unwrap();
        assert_eq!(state.session.state().as_str(), "idle");
        assert!(!state.capture.is_recording());
        assert_eq!(state.session.fallback_relays().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_session() {
        let store = ConfigStore::in_memory(AppConfig::default()).unwrap();
        let state = AppState::from_config(store).unwrap();

        state.shutdown().await;
        assert_eq!(state.session.state().as_str(), "closed");
        assert!(!state.capture.is_recording());

        // repeated shutdown is harmless
        state.shutdown().await;
        assert_eq!(state.session.state().as_str(), "closed");
    }
}
