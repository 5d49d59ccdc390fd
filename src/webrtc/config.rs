//! WebRTC transport configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public STUN servers used when no relay descriptor can be derived.
pub mod public_ice {
    use super::RelayDescriptor;

    /// Address-only public servers, in preference order
    pub const FALLBACK_SERVERS: [&str; 2] = [
        "stun:stun.l.google.com:19302",
        "stun:stun1.l.google.com:19302",
    ];

    /// One descriptor per fallback address
    pub fn fallback_descriptors() -> Vec<RelayDescriptor> {
        FALLBACK_SERVERS
            .iter()
            .map(|url| RelayDescriptor::address_only(*url))
            .collect()
    }
}

/// Smallest usable fallback set
pub const MIN_FALLBACK_SERVERS: usize = 2;

/// One ICE/relay server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    /// Server URLs (e.g., ["turn:relay.example.com:3478?transport=udp"])
    pub addresses: Vec<String>,
    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RelayDescriptor {
    pub fn address_only(url: impl Into<String>) -> Self {
        Self {
            addresses: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(
        addresses: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            addresses,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// At least one non-blank address
    pub fn is_valid(&self) -> bool {
        self.addresses.iter().any(|a| !a.trim().is_empty())
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.credential.is_some()
    }

    /// Copy of this descriptor without username/credential
    pub fn strip_credentials(&self) -> Self {
        Self {
            addresses: self.addresses.clone(),
            username: None,
            credential: None,
        }
    }
}

/// Ordered, never-empty set of relay descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayServerSet {
    servers: Vec<RelayDescriptor>,
}

impl RelayServerSet {
    /// Build a set, falling back to the public servers when nothing valid remains
    pub fn new(servers: Vec<RelayDescriptor>) -> Self {
        let servers: Vec<_> = servers.into_iter().filter(|s| s.is_valid()).collect();
        if servers.is_empty() {
            Self::fallback()
        } else {
            Self { servers }
        }
    }

    /// The hardcoded public fallback set
    pub fn fallback() -> Self {
        Self {
            servers: public_ice::fallback_descriptors(),
        }
    }

    /// Fallback set built from configured addresses
    ///
    /// Topped up from the public servers to at least `MIN_FALLBACK_SERVERS`.
    pub fn fallback_from(addresses: &[String]) -> Self {
        let mut servers: Vec<_> = addresses
            .iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| RelayDescriptor::address_only(a.clone()))
            .collect();
        for public in public_ice::fallback_descriptors() {
            if servers.len() >= MIN_FALLBACK_SERVERS {
                break;
            }
            if !servers.contains(&public) {
                servers.push(public);
            }
        }
        Self { servers }
    }

    /// Same servers with every credential removed
    pub fn address_only(&self) -> Self {
        Self {
            servers: self.servers.iter().map(|s| s.strip_credentials()).collect(),
        }
    }

    pub fn servers(&self) -> &[RelayDescriptor] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn is_address_only(&self) -> bool {
        self.servers.iter().all(|s| !s.has_credentials())
    }
}

/// Peer connection construction options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay servers handed to ICE
    pub relays: RelayServerSet,
    /// Pre-gathered candidate pool (larger than default to help constrained networks)
    pub candidate_pool_size: u8,
    /// Candidate gathering timeout
    pub gathering_timeout: Duration,
    /// Enable mDNS host candidates
    pub mdns: bool,
}

impl TransportConfig {
    pub fn new(relays: RelayServerSet) -> Self {
        Self {
            relays,
            ..Default::default()
        }
    }

    /// Same options over the address-only variant of the relay set
    pub fn address_only(&self) -> Self {
        Self {
            relays: self.relays.address_only(),
            ..self.clone()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relays: RelayServerSet::fallback(),
            candidate_pool_size: 10,
            gathering_timeout: Duration::from_millis(5000),
            mdns: false,
        }
    }
}
