//! Fake collaborators for driving a `SessionOrchestrator` without a network

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use avatar_session::avatar::{
    AvatarService, Collaborators, Credential, CredentialProvider, SessionOrchestrator,
    SessionSettings,
};
use avatar_session::events::{EventBus, SessionEvent};
use avatar_session::webrtc::peer::EventSender;
use avatar_session::webrtc::{
    IceConnectionState, MediaKind, PeerLink, RelayFetcher, RelayServerResolver, RemoteMedia,
    SdpAnswer, SdpOffer, StateSnapshot, TransportConfig, TransportEvent, TransportFactory,
};
use avatar_session::{AppError, Result};

/// Peer link that replays a script of connectivity states once answered
pub struct FakeLink {
    pub index: usize,
    events: EventSender,
    script: Mutex<Vec<IceConnectionState>>,
    pub offers: Mutex<Vec<bool>>,
    pub lines: Mutex<Vec<MediaKind>>,
    closed: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl FakeLink {
    /// Post a connectivity observation as the peer connection would
    pub fn emit(&self, state: IceConnectionState) {
        self.send(TransportEvent::IceConnection(state));
    }

    /// Post any transport callback, e.g. a remote track or a sink report
    pub fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ice_restarts(&self) -> usize {
        self.offers.lock().iter().filter(|restart| **restart).count()
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn add_media_line(&self, kind: MediaKind) -> Result<()> {
        self.lines.lock().push(kind);
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SdpOffer> {
        self.offers.lock().push(ice_restart);
        Ok(SdpOffer {
            sdp: format!("v=0 link={}", self.index),
            ice_restart,
        })
    }

    async fn apply_answer(&self, _answer: SdpAnswer) -> Result<()> {
        let script = std::mem::take(&mut *self.script.lock());
        for state in script {
            self.emit(state);
        }
        Ok(())
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::default()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Remote track that never delivers a payload
pub struct SilentTrack {
    pub kind: MediaKind,
    pub id: String,
}

impl SilentTrack {
    pub fn new(kind: MediaKind, id: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl RemoteMedia for SilentTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn next_packet(&self) -> Option<Result<Bytes>> {
        std::future::pending().await
    }
}

/// Hands out `FakeLink`s and tracks how many are open at once
#[derive(Default)]
pub struct FakeFactory {
    /// When set, `create` fails as an unusable relay configuration would
    pub fail_creates: AtomicBool,
    scripts: Mutex<VecDeque<Vec<IceConnectionState>>>,
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub configs: Mutex<Vec<TransportConfig>>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
}

impl FakeFactory {
    /// Queue the states the next created link reports after its answer
    pub fn script(&self, states: &[IceConnectionState]) {
        self.scripts.lock().push_back(states.to_vec());
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        self.links.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<FakeLink> {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link created")
    }

    pub fn created(&self) -> usize {
        self.links.lock().len()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        events: EventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        self.configs.lock().push(config.clone());
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::WebRtcError("invalid relay configuration".into()));
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let mut links = self.links.lock();
        let link = Arc::new(FakeLink {
            index: links.len(),
            events,
            script: Mutex::new(self.scripts.lock().pop_front().unwrap_or_default()),
            offers: Mutex::new(Vec::new()),
            lines: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            live: self.live.clone(),
        });
        links.push(link.clone());
        Ok(link)
    }
}

pub struct FakeCredentials {
    pub fail: bool,
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn acquire(&self) -> Result<Credential> {
        if self.fail {
            return Err(AppError::Credential("token endpoint returned 500".into()));
        }
        Ok(Credential::new("token-1", "japaneast"))
    }
}

#[derive(Default)]
pub struct FakeAvatar {
    pub reject_offers: AtomicBool,
    pub offers: Mutex<Vec<SdpOffer>>,
    pub spoken: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

#[async_trait]
impl AvatarService for FakeAvatar {
    async fn negotiate(&self, _credential: &Credential, offer: SdpOffer) -> Result<SdpAnswer> {
        if self.reject_offers.load(Ordering::SeqCst) {
            return Err(AppError::WebRtcError("avatar service rejected offer: 503".into()));
        }
        self.offers.lock().push(offer);
        Ok(SdpAnswer::new("v=0 answer"))
    }

    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().push(text.to_string());
        Ok(())
    }

    async fn stop_speaking(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Relay endpoint answering with a fixed body
pub struct StaticFetcher(pub Value);

#[async_trait]
impl RelayFetcher for StaticFetcher {
    async fn fetch(&self, _region: &str, _credential: &str) -> Result<Option<Value>> {
        Ok(Some(self.0.clone()))
    }
}

/// Relay endpoint that never answers
pub struct HangingFetcher;

#[async_trait]
impl RelayFetcher for HangingFetcher {
    async fn fetch(&self, _region: &str, _credential: &str) -> Result<Option<Value>> {
        std::future::pending().await
    }
}

pub fn authenticated_relay() -> Value {
    json!({"addresses": ["turn:a"], "username": "u", "credential": "p"})
}

pub const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub factory: Arc<FakeFactory>,
    pub avatar: Arc<FakeAvatar>,
    pub events: Arc<EventBus>,
}

pub struct HarnessBuilder {
    fetcher: Arc<dyn RelayFetcher>,
    fail_credentials: bool,
    settings: SessionSettings,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            fetcher: Arc::new(StaticFetcher(authenticated_relay())),
            fail_credentials: false,
            settings: SessionSettings::default(),
        }
    }

    pub fn fetcher(mut self, fetcher: impl RelayFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn failing_credentials(mut self) -> Self {
        self.fail_credentials = true;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connection_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let factory = Arc::new(FakeFactory::default());
        let avatar = Arc::new(FakeAvatar::default());
        let events = Arc::new(EventBus::new());
        let collab = Collaborators {
            credentials: Arc::new(FakeCredentials {
                fail: self.fail_credentials,
            }),
            relays: RelayServerResolver::new(self.fetcher, RELAY_TIMEOUT),
            transports: factory.clone(),
            avatar: avatar.clone(),
            transcriber: None,
        };
        Harness {
            orchestrator: Arc::new(SessionOrchestrator::new(
                self.settings,
                collab,
                events.clone(),
            )),
            factory,
            avatar,
            events,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Let spawned tasks run; with a paused clock this also fires due timers
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Names of all `session.state_changed` targets received so far
pub fn drain_states(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<String> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::SessionStateChanged { to, .. } = event {
            states.push(to);
        }
    }
    states
}

/// Labels of all `session.recovery` events received so far
pub fn drain_recovery(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<String> {
    let mut actions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::Recovery { action, .. } = event {
            actions.push(action);
        }
    }
    actions
}
