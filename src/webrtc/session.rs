//! Transport session
//!
//! One `TransportSession` owns one peer connection for its whole life. It is
//! created when negotiation starts and closed before any replacement is
//! created, so an orchestrator never holds two live connections.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::TransportConfig;
use super::peer::{EventReceiver, EventSender, PeerLink, TransportFactory};
use super::signaling::{SdpAnswer, SdpOffer, StateSnapshot};
use super::track::{MediaKind, PlaybackSinks, RemoteMedia};
use crate::error::{AppError, Result};

/// Default delay before the explicit play call on a freshly bound sink
pub const AUTOPLAY_RETRY: Duration = Duration::from_secs(1);

/// A live peer connection plus the remote tracks bound from it
pub struct TransportSession {
    id: String,
    link: Arc<dyn PeerLink>,
    sinks: Arc<PlaybackSinks>,
    events: EventSender,
    autoplay_retry: Duration,
    retry_count: u32,
    play_timers: Mutex<Vec<JoinHandle<()>>>,
    bound: Mutex<Vec<(MediaKind, String)>>,
    closed: AtomicBool,
}

impl TransportSession {
    /// Create the peer connection
    ///
    /// A construction failure is retried once with the credentials stripped
    /// from the relay set before it is propagated.
    pub async fn create(
        factory: &dyn TransportFactory,
        config: &TransportConfig,
        sinks: Arc<PlaybackSinks>,
        autoplay_retry: Duration,
        retry_count: u32,
    ) -> Result<(Self, EventReceiver)> {
        let (events, rx) = mpsc::unbounded_channel();

        let link = match factory.create(config, events.clone()).await {
            Ok(link) => link,
            Err(first) => {
                warn!(
                    "Transport construction failed ({}), retrying with address-only relays",
                    first
                );
                factory
                    .create(&config.address_only(), events.clone())
                    .await
                    .map_err(|e| match e {
                        AppError::TransportConstruction(_) => e,
                        other => AppError::TransportConstruction(other.to_string()),
                    })?
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        info!("Transport session {} created (retry {})", id, retry_count);

        Ok((
            Self {
                id,
                link,
                sinks,
                events,
                autoplay_retry,
                retry_count,
                play_timers: Mutex::new(Vec::new()),
                bound: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Recovery attempt this session was created for; 0 for the first one
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sender feeding the same channel as the peer connection callbacks
    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Declare one video and one audio send/receive line
    pub async fn declare_media_lines(&self) -> Result<()> {
        self.ensure_open()?;
        self.link.add_media_line(MediaKind::Video).await?;
        self.link.add_media_line(MediaKind::Audio).await?;
        debug!("Session {} declared video and audio media lines", self.id);
        Ok(())
    }

    /// Initial offer
    pub async fn create_offer(&self) -> Result<SdpOffer> {
        self.ensure_open()?;
        self.link.create_offer(false).await
    }

    /// Offer that restarts ICE on the existing connection
    pub async fn restart_ice(&self) -> Result<SdpOffer> {
        self.ensure_open()?;
        info!("Session {} restarting ICE", self.id);
        self.link.create_offer(true).await
    }

    pub async fn apply_answer(&self, answer: SdpAnswer) -> Result<()> {
        self.ensure_open()?;
        self.link.apply_answer(answer).await
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.link.snapshot()
    }

    /// Bound `(kind, track id)` pairs
    pub fn bound_tracks(&self) -> Vec<(MediaKind, String)> {
        self.bound.lock().clone()
    }

    /// Attach a remote track to the sink of its kind
    ///
    /// An explicit play call follows after `autoplay_retry` in case the sink
    /// did not start on its own.
    pub fn bind_remote_track(&self, media: Arc<dyn RemoteMedia>) -> Result<()> {
        self.ensure_open()?;
        let kind = media.kind();
        let track_id = media.id();
        let sink = self.sinks.for_kind(kind).clone();
        sink.attach(media, self.events.clone())?;
        self.bound.lock().push((kind, track_id));

        let delay = self.autoplay_retry;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = sink.play() {
                debug!("Deferred play of {} sink failed: {}", kind, e);
            }
        });
        self.play_timers.lock().push(timer);
        Ok(())
    }

    /// Release everything; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for timer in self.play_timers.lock().drain(..) {
            timer.abort();
        }
        if !self.bound.lock().is_empty() {
            self.sinks.detach_all();
        }
        self.bound.lock().clear();

        if let Err(e) = self.link.close().await {
            warn!("Session {} close reported: {}", self.id, e);
        }
        info!("Transport session {} closed", self.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::InvalidState(format!(
                "transport session {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        for timer in self.play_timers.get_mut().drain(..) {
            timer.abort();
        }
        if !self.closed.load(Ordering::SeqCst) {
            warn!("Transport session {} dropped without close", self.id);
            let link = self.link.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = link.close().await;
                });
            }
        }
    }
}
