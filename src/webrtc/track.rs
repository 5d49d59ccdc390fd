//! Remote media tracks and local playback sinks
//!
//! Each media kind has one `PlaybackSink`. Sinks outlive transports: a new
//! transport binds its remote track to the existing sink and `detach()`
//! clears the source when the transport is closed.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::peer::{EventSender, TransportEvent};
use crate::error::{AppError, Result};

/// Packet buffer per sink subscriber
const PACKET_CHANNEL_CAPACITY: usize = 256;

/// Media kind of a track or sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// A remote media source delivered by the transport
#[async_trait]
pub trait RemoteMedia: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn id(&self) -> String;

    /// Next payload; `None` once the track has ended
    async fn next_packet(&self) -> Option<Result<Bytes>>;
}

/// Payload forwarded to sink subscribers
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub kind: MediaKind,
    pub payload: Bytes,
}

/// Readiness reports of a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    MetadataLoaded,
    CanPlay,
    Playing,
    Error(String),
}

/// Sink lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkState {
    Empty,
    Attached,
    Ready,
    Playing,
    Error(String),
}

struct SinkStatus {
    state: SinkState,
    play_requested: bool,
}

struct AttachedSource {
    track_id: String,
    reader: JoinHandle<()>,
    events: EventSender,
}

/// Local playback sink for one media kind
pub struct PlaybackSink {
    kind: MediaKind,
    /// Muted sinks may start on their own once data arrives
    muted: bool,
    status: Arc<Mutex<SinkStatus>>,
    state_tx: Arc<watch::Sender<SinkState>>,
    packets: broadcast::Sender<MediaPacket>,
    source: Mutex<Option<AttachedSource>>,
}

impl PlaybackSink {
    pub fn new(kind: MediaKind, muted: bool) -> Self {
        let (state_tx, _) = watch::channel(SinkState::Empty);
        let (packets, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        Self {
            kind,
            muted,
            status: Arc::new(Mutex::new(SinkStatus {
                state: SinkState::Empty,
                play_requested: false,
            })),
            state_tx: Arc::new(state_tx),
            packets,
            source: Mutex::new(None),
        }
    }

    /// Video sink, muted so playback can start without a user gesture
    pub fn video() -> Self {
        Self::new(MediaKind::Video, true)
    }

    pub fn audio() -> Self {
        Self::new(MediaKind::Audio, false)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn state(&self) -> SinkState {
        self.status.lock().state.clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<SinkState> {
        self.state_tx.subscribe()
    }

    /// Receive payloads of the bound track
    pub fn subscribe(&self) -> broadcast::Receiver<MediaPacket> {
        self.packets.subscribe()
    }

    /// Id of the currently bound track
    pub fn source_id(&self) -> Option<String> {
        self.source.lock().as_ref().map(|s| s.track_id.clone())
    }

    /// Bind a remote track, replacing any previous source
    pub fn attach(&self, media: Arc<dyn RemoteMedia>, events: EventSender) -> Result<()> {
        if media.kind() != self.kind {
            return Err(AppError::MediaBinding {
                kind: self.kind,
                reason: format!("cannot attach {} track to {} sink", media.kind(), self.kind),
            });
        }

        self.detach();
        let track_id = media.id();
        info!("Attaching {} track {} to sink", self.kind, track_id);
        set_state(&self.status, &self.state_tx, SinkState::Attached);

        let reader = tokio::spawn(read_loop(
            self.kind,
            self.muted,
            media,
            self.status.clone(),
            self.state_tx.clone(),
            self.packets.clone(),
            events.clone(),
        ));

        *self.source.lock() = Some(AttachedSource {
            track_id,
            reader,
            events,
        });
        Ok(())
    }

    /// Explicitly start playback
    ///
    /// Before the first payload arrives the request is remembered and honoured
    /// once the sink becomes ready.
    pub fn play(&self) -> Result<()> {
        let events = match self.source.lock().as_ref() {
            Some(source) => source.events.clone(),
            None => {
                return Err(AppError::MediaBinding {
                    kind: self.kind,
                    reason: "no source attached".to_string(),
                })
            }
        };

        let mut status = self.status.lock();
        match status.state.clone() {
            SinkState::Playing => Ok(()),
            SinkState::Attached => {
                status.play_requested = true;
                Ok(())
            }
            SinkState::Ready => {
                status.state = SinkState::Playing;
                self.state_tx.send_replace(SinkState::Playing);
                drop(status);
                let _ = events.send(TransportEvent::Sink(self.kind, SinkEvent::Playing));
                Ok(())
            }
            SinkState::Error(reason) => Err(AppError::MediaBinding {
                kind: self.kind,
                reason,
            }),
            SinkState::Empty => Err(AppError::MediaBinding {
                kind: self.kind,
                reason: "no source attached".to_string(),
            }),
        }
    }

    /// Stop reading and clear the source; safe to call repeatedly
    pub fn detach(&self) {
        if let Some(source) = self.source.lock().take() {
            source.reader.abort();
            debug!("Detached {} track {}", self.kind, source.track_id);
        }
        let mut status = self.status.lock();
        status.play_requested = false;
        status.state = SinkState::Empty;
        self.state_tx.send_replace(SinkState::Empty);
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        if let Some(source) = self.source.get_mut().take() {
            source.reader.abort();
        }
    }
}

/// The pair of sinks a session renders into
pub struct PlaybackSinks {
    pub video: Arc<PlaybackSink>,
    pub audio: Arc<PlaybackSink>,
}

impl PlaybackSinks {
    pub fn new() -> Self {
        Self {
            video: Arc::new(PlaybackSink::video()),
            audio: Arc::new(PlaybackSink::audio()),
        }
    }

    pub fn for_kind(&self, kind: MediaKind) -> &Arc<PlaybackSink> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn detach_all(&self) {
        self.video.detach();
        self.audio.detach();
    }
}

impl Default for PlaybackSinks {
    fn default() -> Self {
        Self::new()
    }
}

fn set_state(status: &Mutex<SinkStatus>, state_tx: &watch::Sender<SinkState>, state: SinkState) {
    status.lock().state = state.clone();
    state_tx.send_replace(state);
}

async fn read_loop(
    kind: MediaKind,
    muted: bool,
    media: Arc<dyn RemoteMedia>,
    status: Arc<Mutex<SinkStatus>>,
    state_tx: Arc<watch::Sender<SinkState>>,
    packets: broadcast::Sender<MediaPacket>,
    events: EventSender,
) {
    let mut ready = false;

    while let Some(packet) = media.next_packet().await {
        match packet {
            Ok(payload) => {
                if !ready {
                    ready = true;
                    let start = {
                        let mut status = status.lock();
                        let start = muted || status.play_requested;
                        status.state = if start {
                            SinkState::Playing
                        } else {
                            SinkState::Ready
                        };
                        state_tx.send_replace(status.state.clone());
                        start
                    };
                    let _ = events.send(TransportEvent::Sink(kind, SinkEvent::MetadataLoaded));
                    let _ = events.send(TransportEvent::Sink(kind, SinkEvent::CanPlay));
                    if start {
                        let _ = events.send(TransportEvent::Sink(kind, SinkEvent::Playing));
                    }
                }
                let _ = packets.send(MediaPacket { kind, payload });
            }
            Err(e) => {
                let reason = e.to_string();
                set_state(&status, &state_tx, SinkState::Error(reason.clone()));
                let _ = events.send(TransportEvent::Sink(kind, SinkEvent::Error(reason)));
                return;
            }
        }
    }

    debug!("Remote {} track ended", kind);
}
