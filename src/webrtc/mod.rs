//! WebRTC transport for the avatar session
//!
//! ```text
//! RelayServerResolver ---> TransportConfig
//!                               |
//!                               v
//!             TransportFactory -> PeerLink (RTCPeerConnection)
//!                               |  callbacks
//!                               v
//!                        TransportEvent channel ---> HealthMonitor
//!                               |
//!                               v
//!                 PlaybackSink (video, muted) / PlaybackSink (audio)
//! ```

pub mod config;
pub mod health;
pub mod mdns;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod track;

pub use config::{RelayDescriptor, RelayServerSet, TransportConfig};
pub use health::{HealthMonitor, HealthPolicy, MonitorInput, RecoveryAction};
pub use peer::{PeerLink, TransportEvent, TransportFactory, WebRtcTransportFactory};
pub use relay::{HttpRelayFetcher, RelayFetcher, RelayServerResolver};
pub use session::TransportSession;
pub use signaling::{ConnectionState, IceConnectionState, SdpAnswer, SdpOffer, StateSnapshot};
pub use track::{MediaKind, PlaybackSink, PlaybackSinks, RemoteMedia, SinkEvent, SinkState};
