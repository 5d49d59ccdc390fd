//! Session orchestrator
//!
//! Top-level state machine of an avatar session:
//!
//! ```text
//! Idle -> AcquiringCredential -> ResolvingRelay -> Negotiating -> Connected
//!                                                      |            ^  |
//!                                                      +--> Recovering <+
//! any state -> Closed
//! ```
//!
//! `connect()` spawns a supervisor task that owns the live transport. State
//! is held in a `watch` channel and only changes through `Shared::transition`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::credential::CredentialProvider;
use super::service::AvatarService;
use super::supervisor::SessionSupervisor;
use crate::audio::transcribe::{Transcriber, Transcript};
use crate::audio::wav::EncodedClip;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{DiagnosticLog, EventBus, SessionEvent};
use crate::utils::LogThrottler;
use crate::webrtc::config::RelayServerSet;
use crate::webrtc::health::HealthPolicy;
use crate::webrtc::peer::TransportFactory;
use crate::webrtc::relay::RelayServerResolver;
use crate::webrtc::signaling::StateSnapshot;
use crate::webrtc::track::{PlaybackSink, PlaybackSinks};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AcquiringCredential,
    ResolvingRelay,
    Negotiating,
    Connected,
    Recovering,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Closed)
                | (Idle | Closed, AcquiringCredential)
                | (AcquiringCredential, ResolvingRelay)
                | (ResolvingRelay, Negotiating)
                | (Negotiating | Recovering, Connected)
                | (Negotiating | Connected, Recovering)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AcquiringCredential => "acquiring_credential",
            SessionState::ResolvingRelay => "resolving_relay",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Recovering => "recovering",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External collaborators of a session
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub relays: RelayServerResolver,
    pub transports: Arc<dyn TransportFactory>,
    pub avatar: Arc<dyn AvatarService>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// Timing and transport options of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub candidate_pool_size: u8,
    pub gathering_timeout: Duration,
    pub mdns: bool,
    /// Bound on `connect()` waiting for the first healthy observation
    pub connection_timeout: Duration,
    pub autoplay_retry: Duration,
    pub health: HealthPolicy,
    pub diagnostics_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            candidate_pool_size: config.transport.candidate_pool_size,
            gathering_timeout: config.transport.gathering_timeout(),
            mdns: config.transport.mdns,
            connection_timeout: config.transport.connection_timeout(),
            autoplay_retry: config.health.autoplay_retry(),
            health: HealthPolicy {
                grace_period: Duration::from_millis(config.health.grace_period_ms),
                retry_delay: Duration::from_millis(config.health.retry_delay_ms),
                max_recovery_attempts: config.health.max_recovery_attempts,
            },
            diagnostics_capacity: config.diagnostics.capacity,
        }
    }
}

/// State shared between the orchestrator and its supervisor task
pub(crate) struct Shared {
    pub(crate) settings: SessionSettings,
    pub(crate) collab: Collaborators,
    pub(crate) sinks: Arc<PlaybackSinks>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) diagnostics: Arc<DiagnosticLog>,
    pub(crate) throttler: LogThrottler,
    state: watch::Sender<SessionState>,
    failure: Mutex<Option<AppError>>,
    snapshot: Mutex<StateSnapshot>,
}

impl Shared {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Apply a state transition; invalid transitions are refused and logged
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let current = self.state();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!("Refusing session transition {} -> {}", current, next);
            return false;
        }

        self.state.send_replace(next);
        info!("Session state: {} -> {}", current, next);
        self.diagnostics.record(format!("state {} -> {}", current, next));
        self.events.publish(SessionEvent::SessionStateChanged {
            from: current.to_string(),
            to: next.to_string(),
        });
        true
    }

    /// Record a terminal error and close the session
    pub(crate) fn fail(&self, err: AppError) {
        error!("Session failed: {}", err);
        self.diagnostics.record(format!("error [{}]: {}", err.code(), err));
        let snapshot = match &err {
            AppError::NegotiationFailure { snapshot, .. }
            | AppError::IceConnectionFailed { snapshot, .. } => Some(snapshot.to_string()),
            _ => None,
        };
        self.events.publish(SessionEvent::SessionError {
            code: err.code().to_string(),
            message: err.to_string(),
            snapshot,
        });
        *self.failure.lock() = Some(err);
        self.transition(SessionState::Closed);
    }

    pub(crate) fn set_snapshot(&self, snapshot: StateSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        self.snapshot.lock().clone()
    }

    fn take_failure(&self) -> Option<AppError> {
        self.failure.lock().take()
    }
}

struct SupervisorHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Coordinates credential, relay, transport and health monitoring
pub struct SessionOrchestrator {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<SupervisorHandle>>,
    /// Serializes supervisor teardown and spawn across `connect`/`disconnect`
    lifecycle: AsyncMutex<()>,
    next_supervisor: AtomicU64,
}

impl SessionOrchestrator {
    pub fn new(settings: SessionSettings, collab: Collaborators, events: Arc<EventBus>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let diagnostics = Arc::new(DiagnosticLog::new(settings.diagnostics_capacity));
        Self {
            shared: Arc::new(Shared {
                settings,
                collab,
                sinks: Arc::new(PlaybackSinks::new()),
                events,
                diagnostics,
                throttler: LogThrottler::with_secs(5),
                state,
                failure: Mutex::new(None),
                snapshot: Mutex::new(StateSnapshot::default()),
            }),
            supervisor: Mutex::new(None),
            lifecycle: AsyncMutex::new(()),
            next_supervisor: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticLog> {
        self.shared.diagnostics.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn video_sink(&self) -> Arc<PlaybackSink> {
        self.shared.sinks.video.clone()
    }

    pub fn audio_sink(&self) -> Arc<PlaybackSink> {
        self.shared.sinks.audio.clone()
    }

    /// Terminal error of a session that closed after `connect()` returned
    pub fn take_error(&self) -> Option<AppError> {
        self.shared.take_failure()
    }

    /// Relay set used when resolution degrades
    pub fn fallback_relays(&self) -> &RelayServerSet {
        self.shared.collab.relays.fallback()
    }

    /// Establish the session
    ///
    /// Resolves once the transport is first observed healthy. Any previous
    /// session is torn down first, so retry counters start from zero. When
    /// calls overlap the latest one owns the session and earlier callers get
    /// `Cancelled`.
    pub async fn connect(&self) -> Result<()> {
        let (id, mut state_rx) = {
            let _lifecycle = self.lifecycle.lock().await;
            self.shutdown_supervisor().await;
            self.shared.take_failure();
            if !matches!(self.state(), SessionState::Idle | SessionState::Closed) {
                self.shared.transition(SessionState::Closed);
            }

            if !self.shared.transition(SessionState::AcquiringCredential) {
                return Err(AppError::InvalidState(format!(
                    "cannot connect from {}",
                    self.state()
                )));
            }

            let state_rx = self.shared.state.subscribe();
            let id = self.next_supervisor.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let task = tokio::spawn(SessionSupervisor::run(self.shared.clone(), cancel.clone()));
            let handle = SupervisorHandle { id, cancel, task };
            if let Some(old) = self.supervisor.lock().replace(handle) {
                old.cancel.cancel();
            }
            (id, state_rx)
        };

        let timeout = self.shared.settings.connection_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|s| matches!(s, SessionState::Connected | SessionState::Closed)),
        )
        .await
        .map(|reached| reached.map(|state| *state));

        match outcome {
            Ok(Ok(SessionState::Connected)) => Ok(()),
            // superseded by a later connect() or a disconnect()
            _ if !self.is_current(id) => Err(AppError::Cancelled),
            Ok(_) => Err(self.shared.take_failure().unwrap_or(AppError::Cancelled)),
            Err(_) => {
                let _lifecycle = self.lifecycle.lock().await;
                if !self.is_current(id) {
                    return Err(AppError::Cancelled);
                }
                let err = AppError::IceConnectionFailed {
                    reason: format!("no connectivity within {}ms", timeout.as_millis()),
                    snapshot: self.shared.snapshot(),
                };
                self.shutdown_supervisor().await;
                self.shared.fail(err);
                Err(self.shared.take_failure().unwrap_or(AppError::Cancelled))
            }
        }
    }

    /// Speak `text` over the connected session
    pub async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("text is empty".into()));
        }
        self.require_connected("speak")?;

        self.shared.collab.avatar.speak(text).await.map_err(|e| {
            self.shared
                .diagnostics
                .record(format!("speak failed [{}]: {}", e.code(), e));
            e
        })
    }

    pub async fn stop_speaking(&self) -> Result<()> {
        self.require_connected("stop speaking")?;
        self.shared.collab.avatar.stop_speaking().await
    }

    /// Hand a recorded clip to the transcription collaborator
    pub async fn transcribe(&self, clip: &EncodedClip) -> Result<Transcript> {
        let transcriber = self
            .shared
            .collab
            .transcriber
            .as_ref()
            .ok_or_else(|| AppError::InvalidState("no transcriber configured".into()))?;
        let transcript = transcriber.transcribe(clip).await?;
        self.shared
            .diagnostics
            .record(format!("transcribed {} byte clip", clip.byte_len()));
        Ok(transcript)
    }

    /// Tear everything down; valid from any state
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_supervisor().await;
        self.shared.transition(SessionState::Closed);
    }

    fn require_connected(&self, action: &str) -> Result<()> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(AppError::InvalidState(format!(
                "cannot {} while {}",
                action, state
            )));
        }
        Ok(())
    }

    fn is_current(&self, id: u64) -> bool {
        self.supervisor.lock().as_ref().map(|h| h.id) == Some(id)
    }

    /// Cancel the supervisor and wait until it has released the transport
    ///
    /// Callers hold `lifecycle`.
    async fn shutdown_supervisor(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(SupervisorHandle { cancel, task, .. }) = handle {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("Session supervisor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}
