//! GitHub App installation token minting.
//!
//! Signs a short-lived RS256 assertion, exchanges it for an installation
//! access token, and caches the token until 30s before it expires.

use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::config::GithubAppConfig;
use crate::error::SyncError;

const ASSERTION_LIFETIME: Duration = Duration::from_secs(600);
const REFRESH_SKEW: Duration = Duration::from_secs(30);

/// Absolute expiry for the currently-cached installation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenExpiry(pub chrono::DateTime<chrono::Utc>);

impl TokenExpiry {
    pub fn needs_refresh(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now + chrono::Duration::from_std(REFRESH_SKEW).unwrap() >= self.0
    }
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub struct GithubAppCredential {
    config: GithubAppConfig,
    cached: Option<(String, TokenExpiry)>,
}

impl GithubAppCredential {
    pub fn new(config: GithubAppConfig) -> Self {
        GithubAppCredential { config, cached: None }
    }

    /// Return a valid installation token, minting a fresh one if the cached
    /// token is missing or within `REFRESH_SKEW` of expiring.
    pub fn token(&mut self) -> Result<String, SyncError> {
        let now = chrono::Utc::now();
        if let Some((token, expiry)) = &self.cached
            && !expiry.needs_refresh(now)
        {
            return Ok(token.clone());
        }

        let jwt = self.sign_assertion(now)?;
        let (token, expiry) = self.exchange(&jwt)?;
        self.cached = Some((token.clone(), expiry));
        Ok(token)
    }

    fn sign_assertion(&self, now: chrono::DateTime<chrono::Utc>) -> Result<String, SyncError> {
        let key_pem = std::fs::read(&self.config.private_key_file)
            .map_err(|e| SyncError::Credential(format!("reading GitHub App private key: {e}")))?;
        let key = EncodingKey::from_rsa_pem(&key_pem)
            .map_err(|e| SyncError::Credential(format!("parsing GitHub App private key: {e}")))?;

        let iat = now.timestamp();
        let claims = Claims {
            iss: self.config.app_id.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| SyncError::Credential(format!("signing GitHub App JWT: {e}")))
    }

    fn exchange(&self, jwt: &str) -> Result<(String, TokenExpiry), SyncError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.config.base_url.trim_end_matches('/'),
            self.config.installation_id
        );

        let client = reqwest::blocking::Client::new();
        let resp = client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|e| SyncError::Credential(format!("GitHub App token request failed: {e}")))?;

        if resp.status().as_u16() != 201 {
            return Err(SyncError::Credential(format!(
                "GitHub App token exchange returned status {}",
                resp.status()
            )));
        }

        let body: InstallationToken = resp
            .json()
            .map_err(|e| SyncError::Credential(format!("parsing GitHub App token response: {e}")))?;

        Ok((body.token, TokenExpiry(body.expires_at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_refresh_when_within_skew() {
        let now = chrono::Utc::now();
        let expiry = TokenExpiry(now + chrono::Duration::seconds(10));
        assert!(expiry.needs_refresh(now));
    }

    #[test]
    fn does_not_need_refresh_when_far_from_expiry() {
        let now = chrono::Utc::now();
        let expiry = TokenExpiry(now + chrono::Duration::seconds(600));
        assert!(!expiry.needs_refresh(now));
    }
}
