//! Relay server resolution
//!
//! The relay token endpoint is vendor hosted and does not commit to a single
//! response schema, so the body is inspected as raw JSON and matched against
//! the known shapes in priority order:
//!
//! 1. one descriptor with addresses, username and secret (fallbacks appended)
//! 2. one descriptor with generic addresses only
//! 3. a list of descriptors under a well-known key
//! 4. anything else: the public fallback set
//!
//! Resolution never fails; degraded outcomes are logged and answered with the
//! fallback set.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::{RelayDescriptor, RelayServerSet};
use crate::error::{AppError, Result};

/// Address keys, vendor spelling first
const ADDRESS_KEYS: [&str; 3] = ["Urls", "urls", "addresses"];
const GENERIC_ADDRESS_KEYS: [&str; 2] = ["urls", "addresses"];
const USERNAME_KEYS: [&str; 2] = ["Username", "username"];
const SECRET_KEYS: [&str; 3] = ["Password", "credential", "password"];
const LIST_KEYS: [&str; 4] = ["iceServers", "ice_servers", "servers", "relays"];

/// Source of raw relay descriptor payloads
#[async_trait]
pub trait RelayFetcher: Send + Sync {
    /// Fetch the raw body; `Ok(None)` when the endpoint answered without one
    async fn fetch(&self, region: &str, credential: &str) -> Result<Option<Value>>;
}

/// Fetches relay descriptors from the vendor relay-token endpoint
pub struct HttpRelayFetcher {
    client: reqwest::Client,
    endpoint_template: String,
}

impl HttpRelayFetcher {
    /// `endpoint_template` may contain a `{region}` placeholder
    pub fn new(client: reqwest::Client, endpoint_template: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_template: endpoint_template.into(),
        }
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_template.replace("{region}", region)
    }
}

#[async_trait]
impl RelayFetcher for HttpRelayFetcher {
    async fn fetch(&self, region: &str, credential: &str) -> Result<Option<Value>> {
        let url = self.endpoint(region);
        debug!("Fetching relay descriptors from {}", url);

        let response = self.client.get(&url).bearer_auth(credential).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::WebRtcError(format!(
                "Relay endpoint returned {}",
                status
            )));
        }

        let body = response.bytes().await?;
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }
}

/// Resolves the relay server set for one connection attempt
pub struct RelayServerResolver {
    fetcher: Arc<dyn RelayFetcher>,
    timeout: Duration,
    fallback: RelayServerSet,
}

impl RelayServerResolver {
    pub fn new(fetcher: Arc<dyn RelayFetcher>, timeout: Duration) -> Self {
        Self {
            fetcher,
            timeout,
            fallback: RelayServerSet::fallback(),
        }
    }

    /// Replace the built-in fallback set
    pub fn with_fallback(mut self, fallback: RelayServerSet) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> &RelayServerSet {
        &self.fallback
    }

    /// Resolve the relay set; never fails
    pub async fn resolve(&self, region: &str, credential: &str) -> RelayServerSet {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(region, credential)).await {
            Ok(Ok(body)) => {
                let set = parse_relay_response(body.as_ref(), &self.fallback);
                info!(
                    "Resolved {} relay descriptor(s) for region {}",
                    set.len(),
                    region
                );
                set
            }
            Ok(Err(e)) => {
                warn!("Relay resolution degraded, using fallback servers: {}", e);
                self.fallback.clone()
            }
            Err(_) => {
                warn!(
                    "Relay resolution timed out after {:?}, using fallback servers",
                    self.timeout
                );
                self.fallback.clone()
            }
        }
    }
}

/// Normalize a relay endpoint body into a relay set
pub fn parse_relay_response(body: Option<&Value>, fallback: &RelayServerSet) -> RelayServerSet {
    let Some(Value::Object(obj)) = body else {
        warn!("Relay response missing or not an object, using fallback servers");
        return fallback.clone();
    };

    // Shape 1: authenticated single descriptor
    let addresses = string_list(obj, &ADDRESS_KEYS);
    let username = string_field(obj, &USERNAME_KEYS);
    let secret = string_field(obj, &SECRET_KEYS);
    if !addresses.is_empty() {
        if let (Some(username), Some(secret)) = (username.clone(), secret.clone()) {
            let mut servers = vec![RelayDescriptor::with_credentials(addresses, username, secret)];
            servers.extend(fallback.servers().iter().cloned());
            return RelayServerSet::new(servers);
        }
    }

    // Shape 2: generic addresses, credentials optional
    let generic = string_list(obj, &GENERIC_ADDRESS_KEYS);
    if !generic.is_empty() {
        return RelayServerSet::new(vec![RelayDescriptor {
            addresses: generic,
            username,
            credential: secret,
        }]);
    }

    // Shape 3: list of descriptors
    if let Some(entries) = LIST_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
    {
        let servers: Vec<_> = entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let descriptor = entry.as_object().and_then(descriptor_from_entry);
                if descriptor.is_none() {
                    warn!("Dropping relay descriptor #{} without addresses", i);
                }
                descriptor
            })
            .collect();
        if !servers.is_empty() {
            return RelayServerSet::new(servers);
        }
    }

    warn!("No relay descriptor derived from response, using fallback servers");
    fallback.clone()
}

fn descriptor_from_entry(entry: &Map<String, Value>) -> Option<RelayDescriptor> {
    let addresses = string_list(entry, &ADDRESS_KEYS);
    if addresses.is_empty() {
        return None;
    }
    Some(RelayDescriptor {
        addresses,
        username: string_field(entry, &USERNAME_KEYS),
        credential: string_field(entry, &SECRET_KEYS),
    })
}

/// First key holding a string or list of strings; blanks removed
fn string_list(obj: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        let values: Vec<String> = match obj.get(*key) {
            Some(Value::String(s)) => vec![s.trim().to_string()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .collect(),
            _ => continue,
        };
        let values: Vec<String> = values.into_iter().filter(|s| !s.is_empty()).collect();
        if !values.is_empty() {
            return values;
        }
    }
    Vec::new()
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
