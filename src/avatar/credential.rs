//! Short-lived service credential

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Tokens are issued for 10 minutes; refresh a minute early
pub const DEFAULT_MAX_AGE_SECS: i64 = 540;

/// Bearer token plus the service region it is valid for
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub region: String,
    pub issued_at: DateTime<Utc>,
    pub max_age_secs: i64,
}

impl Credential {
    pub fn new(token: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            region: region.into(),
            issued_at: Utc::now(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + ChronoDuration::seconds(self.max_age_secs)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("region", &self.region)
            .field("issued_at", &self.issued_at)
            .field("max_age_secs", &self.max_age_secs)
            .finish()
    }
}

/// Supplies credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    region: Option<String>,
}

/// Fetches credentials from the token backend
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn acquire(&self) -> Result<Credential> {
        debug!("Requesting credential from {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| AppError::Credential(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Credential(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Credential(format!("invalid token response: {}", e)))?;
        let credential = credential_from_response(body)?;
        info!("Acquired credential for region {}", credential.region);
        Ok(credential)
    }
}

fn credential_from_response(body: TokenResponse) -> Result<Credential> {
    let token = body
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Credential("response has no token".into()))?;
    let region = body
        .region
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Credential("response has no region".into()))?;
    Ok(Credential::new(token, region))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Credential> {
        credential_from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_response_parsing() {
        let credential = parse(r#"{"token": "abc", "region": " japaneast "}"#).unwrap();
        assert_eq!(credential.token, "abc");
        assert_eq!(credential.region, "japaneast");
        assert_eq!(credential.max_age_secs, DEFAULT_MAX_AGE_SECS);

        assert!(matches!(parse(r#"{"region": "x"}"#), Err(AppError::Credential(_))));
        assert!(matches!(parse(r#"{"token": "t", "region": ""}"#), Err(AppError::Credential(_))));
        assert!(parse(r#"{"token": " ", "region": "x"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("very-secret", "westus2");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("westus2"));
    }

    #[test]
    fn test_expiry() {
        let credential = Credential::new("t", "r");
        assert!(!credential.is_expired_at(credential.issued_at));
        assert!(credential.is_expired_at(credential.issued_at + ChronoDuration::seconds(540)));
    }
}
