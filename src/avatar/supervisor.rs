//! Session supervisor task
//!
//! Owns the live `TransportSession` and the `HealthMonitor`. Peer connection
//! callbacks, sink reports and the monitor's timers are all consumed by one
//! `select!` loop, so observations are handled strictly in delivery order.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::orchestrator::{SessionState, Shared};
use crate::error::{AppError, Result};
use crate::events::SessionEvent;
use crate::warn_throttled;
use crate::webrtc::config::TransportConfig;
use crate::webrtc::health::{HealthMonitor, MonitorInput, RecoveryAction};
use crate::webrtc::peer::{EventReceiver, TransportEvent};
use crate::webrtc::session::TransportSession;
use crate::webrtc::signaling::StateSnapshot;
use crate::webrtc::track::{MediaKind, RemoteMedia, SinkEvent};

type Timer<T> = Option<(T, Pin<Box<Sleep>>)>;

pub(crate) struct SessionSupervisor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    credential: Credential,
    monitor: HealthMonitor,
    transport: Option<TransportSession>,
    events: Option<EventReceiver>,
    grace: Timer<u64>,
    recovery: Timer<u32>,
    observed: StateSnapshot,
    finished: bool,
}

impl SessionSupervisor {
    /// Task body spawned by `connect()`
    pub(crate) async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
        let credential = match cancellable(&cancel, shared.collab.credentials.acquire()).await {
            Err(_) => return,
            Ok(Err(e)) => {
                shared.fail(match e {
                    AppError::Credential(_) => e,
                    other => AppError::Credential(other.to_string()),
                });
                return;
            }
            Ok(Ok(credential)) => credential,
        };
        shared
            .diagnostics
            .record(format!("credential acquired for region {}", credential.region));

        let mut supervisor = Self {
            monitor: HealthMonitor::new(shared.settings.health.clone()),
            shared,
            cancel,
            credential,
            transport: None,
            events: None,
            grace: None,
            recovery: None,
            observed: StateSnapshot::default(),
            finished: false,
        };

        match supervisor.establish(0).await {
            Ok(()) => supervisor.event_loop().await,
            Err(AppError::Cancelled) => {}
            Err(e) => supervisor.shared.fail(e),
        }
        supervisor.close_transport().await;
        debug!("Session supervisor finished");
    }

    async fn event_loop(&mut self) {
        while !self.finished {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(event) = next_event(&mut self.events) => self.on_event(event).await,
                generation = timer_elapsed(&mut self.grace) => {
                    let actions = self.monitor.handle(MonitorInput::GraceExpired(generation));
                    self.apply(actions).await;
                }
                attempt = timer_elapsed(&mut self.recovery) => self.recover(attempt).await,
            }
        }
    }

    /// Resolve relays, create the transport and run offer/answer
    ///
    /// `retry` is 0 for the first establishment of a `connect()` call and the
    /// recovery attempt number otherwise. The transport is released on error.
    async fn establish(&mut self, retry: u32) -> Result<()> {
        let result = self.try_establish(retry).await;
        if result.is_err() {
            self.close_transport().await;
        }
        result
    }

    async fn try_establish(&mut self, retry: u32) -> Result<()> {
        let shared = self.shared.clone();
        let initial = retry == 0;

        if initial && !shared.transition(SessionState::ResolvingRelay) {
            return Err(AppError::Cancelled);
        }
        let resolver = &shared.collab.relays;
        let relays = cancellable(
            &self.cancel,
            resolver.resolve(&self.credential.region, &self.credential.token),
        )
        .await?;
        if relays == *resolver.fallback() {
            shared.diagnostics.record(format!(
                "relay resolution degraded, using {} fallback server(s)",
                relays.len()
            ));
        } else {
            shared
                .diagnostics
                .record(format!("resolved {} relay descriptor(s)", relays.len()));
        }

        if initial && !shared.transition(SessionState::Negotiating) {
            return Err(AppError::Cancelled);
        }
        let config = TransportConfig {
            relays,
            candidate_pool_size: shared.settings.candidate_pool_size,
            gathering_timeout: shared.settings.gathering_timeout,
            mdns: shared.settings.mdns,
        };
        let (transport, events) = cancellable(
            &self.cancel,
            TransportSession::create(
                shared.collab.transports.as_ref(),
                &config,
                shared.sinks.clone(),
                shared.settings.autoplay_retry,
                retry,
            ),
        )
        .await??;

        self.observed = transport.snapshot();
        shared.set_snapshot(self.observed.clone());
        shared
            .diagnostics
            .record(format!("transport {} created (retry {})", transport.id(), retry));
        self.transport = Some(transport);
        self.events = Some(events);

        let Some(transport) = self.transport.as_ref() else {
            return Err(AppError::InvalidState("transport missing".into()));
        };
        cancellable(&self.cancel, transport.declare_media_lines())
            .await?
            .map_err(|e| self.negotiation_error(retry, e))?;
        let offer = cancellable(&self.cancel, transport.create_offer())
            .await?
            .map_err(|e| self.negotiation_error(retry, e))?;
        let answer = cancellable(
            &self.cancel,
            shared.collab.avatar.negotiate(&self.credential, offer),
        )
        .await?
        .map_err(|e| self.negotiation_error(retry, e))?;
        cancellable(&self.cancel, transport.apply_answer(answer))
            .await?
            .map_err(|e| self.negotiation_error(retry, e))?;

        shared
            .diagnostics
            .record(format!("offer/answer exchanged (retry {})", retry));
        Ok(())
    }

    fn negotiation_error(&self, attempts: u32, err: AppError) -> AppError {
        match err {
            AppError::Cancelled | AppError::NegotiationFailure { .. } => err,
            other => AppError::NegotiationFailure {
                attempts,
                reason: other.to_string(),
                snapshot: self.observed.clone(),
            },
        }
    }

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IceConnection(state) => {
                self.observed.ice = state;
                self.note_transport("ice", state.to_string());
                self.shared.diagnostics.record(format!(
                    "transport connectivity {} (attempt {})",
                    state,
                    self.monitor.attempts()
                ));
                let actions = self.monitor.handle(MonitorInput::Transport(state));
                self.apply(actions).await;
            }
            TransportEvent::Connection(state) => {
                self.observed.connection = state;
                self.note_transport("connection", state.to_string());
                self.shared
                    .diagnostics
                    .record(format!("session connectivity {}", state));
                let actions = self.monitor.handle(MonitorInput::Session(state));
                self.apply(actions).await;
            }
            TransportEvent::Signaling(state) => {
                self.observed.signaling = state.clone();
                self.note_transport("signaling", state);
            }
            TransportEvent::Gathering(state) => {
                self.observed.gathering = state.clone();
                self.note_transport("gathering", state);
            }
            TransportEvent::Track(media) => self.bind(media),
            TransportEvent::Sink(kind, event) => self.on_sink(kind, event),
        }
    }

    fn note_transport(&self, layer: &str, state: String) {
        debug!("Transport {} state: {}", layer, state);
        self.shared.set_snapshot(self.observed.clone());
        self.shared.events.publish(SessionEvent::TransportStateChanged {
            layer: layer.to_string(),
            state,
        });
    }

    fn bind(&self, media: Arc<dyn RemoteMedia>) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let kind = media.kind();
        let track_id = media.id();
        match transport.bind_remote_track(media) {
            Ok(()) => {
                info!("Bound remote {} track {}", kind, track_id);
                self.shared
                    .diagnostics
                    .record(format!("bound {} track {}", kind, track_id));
                self.shared
                    .events
                    .publish(SessionEvent::MediaBound {
                        kind: kind.to_string(),
                        track_id,
                    });
            }
            Err(e) => self.media_error(kind, e.to_string()),
        }
    }

    fn on_sink(&self, kind: MediaKind, event: SinkEvent) {
        let status = match &event {
            SinkEvent::MetadataLoaded => "metadata_loaded",
            SinkEvent::CanPlay => "can_play",
            SinkEvent::Playing => "playing",
            SinkEvent::Error(reason) => {
                self.media_error(kind, reason.clone());
                return;
            }
        };
        debug!("{} sink: {}", kind, status);
        self.shared
            .diagnostics
            .record(format!("{} sink {}", kind, status));
        self.shared.events.publish(SessionEvent::MediaSink {
            kind: kind.to_string(),
            status: status.to_string(),
            error: None,
        });
    }

    /// Media errors are reported but never tear the session down
    fn media_error(&self, kind: MediaKind, reason: String) {
        let key = format!("media_{}", kind);
        warn_throttled!(
            self.shared.throttler,
            &key,
            "Media binding error on {} sink: {}",
            kind,
            reason
        );
        let err = AppError::MediaBinding {
            kind,
            reason: reason.clone(),
        };
        self.shared
            .diagnostics
            .record(format!("error [{}]: {}", err.code(), err));
        self.shared.events.publish(SessionEvent::MediaSink {
            kind: kind.to_string(),
            status: "error".to_string(),
            error: Some(reason),
        });
        self.shared.events.publish(SessionEvent::SessionError {
            code: err.code().to_string(),
            message: err.to_string(),
            snapshot: None,
        });
    }

    /// Carry out monitor actions, including the follow-ups they produce
    async fn apply(&mut self, actions: Vec<RecoveryAction>) {
        let mut queue: VecDeque<RecoveryAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            self.report(&action);
            match action {
                RecoveryAction::ArmGrace { generation, after } => {
                    self.grace = Some((generation, Box::pin(tokio::time::sleep(after))));
                }
                RecoveryAction::CancelGrace => self.grace = None,
                RecoveryAction::IceRestart => {
                    self.shared.transition(SessionState::Recovering);
                    match self.restart_ice().await {
                        Ok(()) => {}
                        Err(AppError::Cancelled) => {
                            self.finished = true;
                            return;
                        }
                        Err(e) => {
                            warn!("ICE restart failed: {}", e);
                            self.shared
                                .diagnostics
                                .record(format!("ICE restart failed: {}", e));
                            queue.extend(self.monitor.handle(MonitorInput::RecoveryFailed));
                        }
                    }
                }
                RecoveryAction::ScheduleRecovery { attempt, delay } => {
                    self.shared.transition(SessionState::Recovering);
                    self.recovery = Some((attempt, Box::pin(tokio::time::sleep(delay))));
                }
                RecoveryAction::MarkHealthy => {
                    self.recovery = None;
                    self.shared.throttler.clear_all();
                    self.shared.transition(SessionState::Connected);
                }
                RecoveryAction::GiveUp { attempts } => {
                    let err = AppError::NegotiationFailure {
                        attempts,
                        reason: "recovery budget exhausted".to_string(),
                        snapshot: self.observed.clone(),
                    };
                    self.terminate(err).await;
                    return;
                }
            }
        }
    }

    fn report(&self, action: &RecoveryAction) {
        if *action == RecoveryAction::MarkHealthy
            && self.shared.state() == SessionState::Connected
        {
            return;
        }
        let attempt = self.monitor.attempts();
        info!("Recovery: {} (attempt {})", action, attempt);
        self.shared.diagnostics.record(action.to_string());
        self.shared.events.publish(SessionEvent::Recovery {
            action: action.label().to_string(),
            attempt,
        });
    }

    /// Renegotiate the existing transport with an ICE restart offer
    async fn restart_ice(&self) -> Result<()> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(AppError::InvalidState("no transport to restart".into()));
        };
        let offer = cancellable(&self.cancel, transport.restart_ice()).await??;
        let answer = cancellable(
            &self.cancel,
            self.shared.collab.avatar.negotiate(&self.credential, offer),
        )
        .await??;
        cancellable(&self.cancel, transport.apply_answer(answer)).await??;
        self.shared
            .diagnostics
            .record(format!("ICE restart negotiated on transport {}", transport.id()));
        Ok(())
    }

    /// Full recovery: replace the transport, reusing the credential
    async fn recover(&mut self, attempt: u32) {
        let max = self.shared.settings.health.max_recovery_attempts;
        info!("Full recovery attempt {}/{}", attempt, max);
        self.shared
            .diagnostics
            .record(format!("full recovery attempt {}/{} started", attempt, max));
        self.grace = None;
        self.close_transport().await;

        match self.establish(attempt).await {
            Ok(()) => {
                let actions = self.monitor.handle(MonitorInput::RecoveryEstablished);
                self.apply(actions).await;
            }
            Err(AppError::Cancelled) => self.finished = true,
            Err(e @ AppError::TransportConstruction(_)) => self.terminate(e).await,
            Err(e) => {
                warn!("Recovery attempt {} failed: {}", attempt, e);
                self.shared
                    .diagnostics
                    .record(format!("recovery attempt {} failed: {}", attempt, e));
                let actions = self.monitor.handle(MonitorInput::RecoveryFailed);
                self.apply(actions).await;
            }
        }
    }

    async fn terminate(&mut self, err: AppError) {
        self.close_transport().await;
        self.shared.fail(err);
        self.finished = true;
    }

    /// Release the current transport before anything replaces it
    async fn close_transport(&mut self) {
        self.grace = None;
        self.recovery = None;
        if let Some(transport) = self.transport.take() {
            transport.close().await;
            self.shared
                .diagnostics
                .record(format!("transport {} released", transport.id()));
        }
        self.events = None;
    }
}

/// Run `fut` unless `cancel` fires first
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        value = fut => Ok(value),
    }
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn timer_elapsed<T: Copy>(timer: &mut Timer<T>) -> T {
    match timer {
        Some((value, sleep)) => {
            sleep.as_mut().await;
            let value = *value;
            *timer = None;
            value
        }
        None => std::future::pending().await,
    }
}
