//! Speech transcription client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::wav::EncodedClip;
use crate::error::{AppError, Result};

/// Text recognized from a clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
}

/// Remote speech recognizer
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &EncodedClip) -> Result<Transcript>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn transcript_from_response(body: TranscribeResponse) -> Result<Transcript> {
    if !body.success {
        return Err(AppError::Transcription(
            body.error
                .unwrap_or_else(|| "transcription failed".to_string()),
        ));
    }
    Ok(Transcript {
        text: body.text.unwrap_or_default().trim().to_string(),
    })
}

/// Posts clips as multipart `file` uploads
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, clip: &EncodedClip) -> Result<Transcript> {
        let part = reqwest::multipart::Part::bytes(clip.to_bytes().to_vec())
            .file_name("recording.wav")
            .mime_str(clip.mime_type())
            .map_err(|e| AppError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(
            "Uploading {} bytes for transcription to {}",
            clip.byte_len(),
            self.endpoint
        );
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Transcription(e.to_string()))?;

        let status = response.status();
        let body: TranscribeResponse = response.json().await.map_err(|e| {
            AppError::Transcription(format!("invalid response ({}): {}", status, e))
        })?;
        let transcript = transcript_from_response(body)?;
        info!("Transcribed {} characters", transcript.text.chars().count());
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Transcript> {
        transcript_from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_success_response() {
        let transcript = parse(r#"{"success": true, "text": " こんにちは "}"#).unwrap();
        assert_eq!(transcript.text, "こんにちは");
    }

    #[test]
    fn test_empty_text_is_not_an_error() {
        assert_eq!(parse(r#"{"success": true}"#).unwrap().text, "");
    }

    #[test]
    fn test_failure_response() {
        match parse(r#"{"success": false, "error": "no speech detected"}"#) {
            Err(AppError::Transcription(msg)) => assert_eq!(msg, "no speech detected"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse("{}"), Err(AppError::Transcription(_))));
    }
}
