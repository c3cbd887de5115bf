//! OAuth 2.0 client-credentials token for the distributor API.
//!
//! Tokens are cached in memory for the life of the process and refreshed one
//! margin before they expire; the margin is one hour, or half the token's
//! lifetime when that is shorter.
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::SyscomCredentials;

const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    current: Option<CachedToken>,
}

pub fn refresh_margin(lifetime: Duration) -> Duration {
    MAX_REFRESH_MARGIN.min(lifetime / 2)
}

impl TokenCache {
    /// Cached token if it is still before its refresh point at `now`.
    pub fn valid_at(&self, now: Instant) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|t| now < t.refresh_at)
            .map(|t| t.access_token.as_str())
    }

    pub fn store(&mut self, access_token: String, expires_in: Duration, issued_at: Instant) {
        let refresh_at = issued_at + expires_in.saturating_sub(refresh_margin(expires_in));
        self.current = Some(CachedToken {
            access_token,
            refresh_at,
        });
    }
}

pub async fn fetch_token(
    client: &Client,
    oauth_url: &str,
    creds: &SyscomCredentials,
) -> Result<TokenResponse> {
    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
    ];
    let response = client
        .post(oauth_url)
        .form(&params)
        .send()
        .await
        .context("sending distributor OAuth token request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "distributor OAuth token request failed: {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .context("parsing distributor OAuth token response")?;
    info!(
        target: "syscom",
        token_type = token.token_type.as_deref().unwrap_or("bearer"),
        expires_in = token.expires_in,
        "access token acquired"
    );
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_is_capped_at_an_hour_or_half_lifetime() {
        assert_eq!(refresh_margin(Duration::from_secs(365 * 86_400)), MAX_REFRESH_MARGIN);
        assert_eq!(refresh_margin(Duration::from_secs(600)), Duration::from_secs(300));
    }

    #[test]
    fn cached_token_expires_one_margin_early() {
        let t0 = Instant::now();
        let mut cache = TokenCache::default();
        assert!(cache.valid_at(t0).is_none());

        cache.store("abc".into(), Duration::from_secs(7200), t0);
        assert_eq!(cache.valid_at(t0 + Duration::from_secs(3599)), Some("abc"));
        assert!(cache.valid_at(t0 + Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn token_response_tolerates_missing_fields() {
        let t: TokenResponse = serde_json::from_str(r#"{"access_token":"x"}"#).unwrap();
        assert_eq!(t.expires_in, 0);
        let mut cache = TokenCache::default();
        let now = Instant::now();
        cache.store(t.access_token, Duration::from_secs(t.expires_in), now);
        assert!(cache.valid_at(now).is_none());
    }
}
