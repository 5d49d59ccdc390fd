//! WebRTC peer connection management
//!
//! `PeerLink` and `TransportFactory` are the seam between the session logic
//! and the `webrtc` crate. Every peer connection callback is turned into a
//! `TransportEvent` and posted to the owner's channel; nothing here mutates
//! session state directly.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::config::{RelayServerSet, TransportConfig};
use super::mdns::{mdns_host_name, mdns_mode, mdns_mode_label};
use super::signaling::{ConnectionState, IceConnectionState, SdpAnswer, SdpOffer, StateSnapshot};
use super::track::{MediaKind, RemoteMedia, SinkEvent};
use crate::error::{AppError, Result};

/// Typed event posted by a peer connection callback or a playback sink
#[derive(Clone)]
pub enum TransportEvent {
    IceConnection(IceConnectionState),
    Connection(ConnectionState),
    Signaling(String),
    Gathering(String),
    Track(Arc<dyn RemoteMedia>),
    Sink(MediaKind, SinkEvent),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::IceConnection(s) => write!(f, "IceConnection({})", s),
            TransportEvent::Connection(s) => write!(f, "Connection({})", s),
            TransportEvent::Signaling(s) => write!(f, "Signaling({})", s),
            TransportEvent::Gathering(s) => write!(f, "Gathering({})", s),
            TransportEvent::Track(t) => write!(f, "Track({} {})", t.kind(), t.id()),
            TransportEvent::Sink(kind, e) => write!(f, "Sink({}, {:?})", kind, e),
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// One live peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Declare one send/receive media line
    async fn add_media_line(&self, kind: MediaKind) -> Result<()>;

    /// Create an offer, apply it locally and wait for candidate gathering
    async fn create_offer(&self, ice_restart: bool) -> Result<SdpOffer>;

    /// Apply the remote answer
    async fn apply_answer(&self, answer: SdpAnswer) -> Result<()>;

    /// Current transport, session, signaling and gathering states
    fn snapshot(&self) -> StateSnapshot;

    /// Release the connection
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, config: &TransportConfig, events: EventSender)
        -> Result<Arc<dyn PeerLink>>;
}

/// `TransportFactory` backed by the `webrtc` crate
#[derive(Debug, Default, Clone)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        config: &TransportConfig,
        events: EventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = RtcPeerLink::new(config, events).await?;
        Ok(Arc::new(link))
    }
}

/// Build the ICE server list for a relay set
pub fn ice_servers(relays: &RelayServerSet) -> Vec<RTCIceServer> {
    relays
        .servers()
        .iter()
        .map(|relay| RTCIceServer {
            urls: relay.addresses.clone(),
            username: relay.username.clone().unwrap_or_default(),
            credential: relay.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Peer connection wrapper with event forwarding
pub struct RtcPeerLink {
    link_id: String,
    pc: Arc<RTCPeerConnection>,
    gathering_timeout: Duration,
}

impl RtcPeerLink {
    /// Create a new peer connection
    pub async fn new(config: &TransportConfig, events: EventSender) -> Result<Self> {
        let link_id = uuid::Uuid::new_v4().to_string();

        // Create media engine
        let mut media_engine = MediaEngine::default();

        // Register codecs
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::TransportConstruction(format!("Failed to register codecs: {}", e)))?;

        // Create interceptor registry
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::TransportConstruction(format!("Failed to register interceptors: {}", e))
        })?;

        // Create API (with optional mDNS settings)
        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode(config.mdns);
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(mdns_host_name(&link_id));
        }
        debug!("WebRTC mDNS mode: {} (link {})", mdns_mode_label(mode), link_id);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(&config.relays),
            ice_transport_policy: RTCIceTransportPolicy::All,
            bundle_policy: RTCBundlePolicy::MaxBundle,
            rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
            ice_candidate_pool_size: config.candidate_pool_size,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::TransportConstruction(format!("Failed to create peer connection: {}", e))
        })?;

        let link = Self {
            link_id,
            pc: Arc::new(pc),
            gathering_timeout: config.gathering_timeout,
        };
        link.setup_event_handlers(events);

        info!(
            "Peer connection {} created with {} relay descriptor(s)",
            link.link_id,
            config.relays.len()
        );
        Ok(link)
    }

    /// Forward peer connection callbacks as transport events
    fn setup_event_handlers(&self, events: EventSender) {
        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                if let Some(state) = map_ice_state(s) {
                    let _ = tx.send(TransportEvent::IceConnection(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                if let Some(state) = map_connection_state(s) {
                    let _ = tx.send(TransportEvent::Connection(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
                let _ = tx.send(TransportEvent::Signaling(s.to_string()));
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let _ = tx.send(TransportEvent::Gathering(s.to_string()));
                Box::pin(async {})
            }));

        let tx = events;
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            match RtpTrack::new(track) {
                Some(track) => {
                    let _ = tx.send(TransportEvent::Track(Arc::new(track)));
                }
                None => warn!("Ignoring remote track of unknown kind"),
            }
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn add_media_line(&self, kind: MediaKind) -> Result<()> {
        let codec_type = match kind {
            MediaKind::Video => RTPCodecType::Video,
            MediaKind::Audio => RTPCodecType::Audio,
        };
        // No init: transceivers default to sendrecv
        self.pc
            .add_transceiver_from_kind(codec_type, None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e)))?;
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SdpOffer> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        let mut gathering_done = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(self.gathering_timeout, gathering_done.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering not complete after {:?}, sending partial offer",
                self.gathering_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtcError("Local description missing".to_string()))?;

        Ok(SdpOffer {
            sdp: local.sdp,
            ice_restart,
        })
    }

    async fn apply_answer(&self, answer: SdpAnswer) -> Result<()> {
        let sdp = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set remote description: {}", e)))
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            ice: map_ice_state(self.pc.ice_connection_state()).unwrap_or_default(),
            connection: map_connection_state(self.pc.connection_state()).unwrap_or_default(),
            signaling: self.pc.signaling_state().to_string(),
            gathering: self.pc.ice_gathering_state().to_string(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        debug!("Peer connection {} closed", self.link_id);
        Ok(())
    }
}

fn map_ice_state(s: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match s {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

fn map_connection_state(s: RTCPeerConnectionState) -> Option<ConnectionState> {
    Some(match s {
        RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => return None,
    })
}

/// Remote RTP track as a media source
pub struct RtpTrack {
    kind: MediaKind,
    track: Arc<TrackRemote>,
}

impl RtpTrack {
    fn new(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = match track.kind() {
            RTPCodecType::Video => MediaKind::Video,
            RTPCodecType::Audio => MediaKind::Audio,
            _ => return None,
        };
        Some(Self { kind, track })
    }
}

#[async_trait]
impl RemoteMedia for RtpTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn id(&self) -> String {
        self.track.id()
    }

    async fn next_packet(&self) -> Option<Result<Bytes>> {
        match self.track.read_rtp().await {
            Ok((packet, _)) => Some(Ok(packet.payload)),
            Err(e) => {
                let desc = e.to_string();
                // Track ends with a closed pipe / EOF once the connection goes away
                if desc.contains("closed") || desc.contains("EOF") {
                    None
                } else {
                    Some(Err(AppError::WebRtcError(format!("RTP read failed: {}", desc))))
                }
            }
        }
    }
}
