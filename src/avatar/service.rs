//! Synthesis service client
//!
//! The service renders the avatar: it answers the session's offer, then
//! plays synthesized speech over the established transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::AvatarConfig;
use super::credential::Credential;
use crate::error::{AppError, Result};
use crate::webrtc::signaling::{SdpAnswer, SdpOffer};

/// Remote avatar synthesis service
#[async_trait]
pub trait AvatarService: Send + Sync {
    /// Exchange an offer for the service's answer
    async fn negotiate(&self, credential: &Credential, offer: SdpOffer) -> Result<SdpAnswer>;

    /// Speak `text` over the negotiated session
    async fn speak(&self, text: &str) -> Result<()>;

    /// Interrupt the current utterance
    async fn stop_speaking(&self) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AvatarDescriptor<'a> {
    character: &'a str,
    style: &'a str,
    customized: bool,
    use_built_in_voice: bool,
    background_color: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest<'a> {
    region: &'a str,
    offer: &'a SdpOffer,
    avatar: AvatarDescriptor<'a>,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_id: Option<&'a str>,
}

#[derive(Serialize)]
struct SpeakRequest {
    ssml: String,
}

#[derive(Deserialize)]
struct SpeakResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `AvatarService` over the synthesis service's JSON API
pub struct HttpAvatarService {
    client: reqwest::Client,
    config: AvatarConfig,
    credential: Mutex<Option<Credential>>,
}

impl HttpAvatarService {
    pub fn new(client: reqwest::Client, config: AvatarConfig) -> Self {
        Self {
            client,
            config,
            credential: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.signaling_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> Result<String> {
        self.credential
            .lock()
            .as_ref()
            .map(|c| c.token.clone())
            .ok_or_else(|| AppError::InvalidState("avatar session not negotiated".into()))
    }

    async fn post_speech(&self, path: &str, body: Option<SpeakRequest>) -> Result<()> {
        let token = self.token()?;
        let mut request = self.client.post(self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Synthesis(format!("{} returned {}", path, status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AppError::Synthesis(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(());
        }
        let reply: SpeakResponse = serde_json::from_str(&text)?;
        if !reply.success {
            return Err(AppError::Synthesis(
                reply.error.unwrap_or_else(|| "synthesis failed".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AvatarService for HttpAvatarService {
    async fn negotiate(&self, credential: &Credential, offer: SdpOffer) -> Result<SdpAnswer> {
        let request = ConnectRequest {
            region: &credential.region,
            offer: &offer,
            avatar: AvatarDescriptor {
                character: &self.config.character,
                style: &self.config.style,
                customized: self.config.custom_avatar,
                use_built_in_voice: self.config.use_built_in_voice,
                background_color: &self.config.background_color,
            },
            voice: &self.config.voice,
            endpoint_id: self.config.endpoint_id.as_deref(),
        };

        debug!(
            "Sending {} offer to avatar service",
            if offer.ice_restart { "ICE restart" } else { "initial" }
        );
        let response = self
            .client
            .post(self.url("connect"))
            .bearer_auth(&credential.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::WebRtcError(format!("avatar negotiation failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::WebRtcError(format!(
                "avatar service rejected offer: {}",
                status
            )));
        }

        let answer: SdpAnswer = response
            .json()
            .await
            .map_err(|e| AppError::WebRtcError(format!("invalid answer: {}", e)))?;
        *self.credential.lock() = Some(credential.clone());
        info!("Avatar service answered ({} bytes of SDP)", answer.sdp.len());
        Ok(answer)
    }

    async fn speak(&self, text: &str) -> Result<()> {
        let ssml = self.config.speech_markup(text);
        self.post_speech("speak", Some(SpeakRequest { ssml })).await
    }

    async fn stop_speaking(&self) -> Result<()> {
        self.post_speech("stop", None).await
    }
}
