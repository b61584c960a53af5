//! ============================================================================
//! Twitter OAuth 2.0 + PKCE Bridge
//! ============================================================================
//! Authorization code flow with PKCE, run server side. The PKCE verifier is
//! derived from the linking token with an HMAC key, so any process holding
//! the key can finish a flow another process started.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::OAuthBridge;
use crate::config::LinkingConfig;
use crate::types::{ExternalIdentityProof, LinkError, SessionToken};

const TWITTER_AUTH_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const TWITTER_ME_URL: &str = "https://api.twitter.com/2/users/me";

/// Scopes needed to read the authorizing user's id and handle
const SCOPES: &str = "tweet.read users.read";

/// Profile lookups are retried; the code exchange is not (codes are single use)
const PROFILE_ATTEMPTS: u32 = 3;
const PROFILE_RETRY_DELAY: Duration = Duration::from_secs(1);

type HmacSha256 = Hmac<Sha256>;

/// Provider endpoints (overridable for tests and proxies)
#[derive(Debug, Clone)]
pub struct TwitterEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub profile: Url,
}

impl Default for TwitterEndpoints {
    fn default() -> Self {
        // Compile-time constants, always parse
        Self {
            authorize: Url::parse(TWITTER_AUTH_URL).expect("authorize URL"),
            token: Url::parse(TWITTER_TOKEN_URL).expect("token URL"),
            profile: Url::parse(TWITTER_ME_URL).expect("profile URL"),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct MeResponse {
    data: TwitterUser,
}

#[derive(Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
    name: Option<String>,
}

/// Twitter OAuth 2.0 bridge
pub struct TwitterOAuth {
    client_id: String,
    client_secret: Option<String>,
    pkce_secret: String,
    redirect_uri: Url,
    endpoints: TwitterEndpoints,
    retry_delay: Duration,
    client: Client,
}

impl TwitterOAuth {
    /// Create a new Twitter OAuth bridge
    pub fn new(client_id: String, pkce_secret: String, redirect_uri: Url) -> Self {
        Self {
            client_id,
            client_secret: None,
            pkce_secret,
            redirect_uri,
            endpoints: TwitterEndpoints::default(),
            retry_delay: PROFILE_RETRY_DELAY,
            client: Client::new(),
        }
    }

    /// Build from configuration (client id and PKCE key are required)
    pub fn from_config(config: &LinkingConfig) -> Result<Self> {
        let mut oauth = Self::new(
            config.require_client_id()?.to_string(),
            config.require_pkce_secret()?.to_string(),
            config.redirect_uri.clone(),
        );
        oauth.client_secret = config.twitter_client_secret.clone();
        Ok(oauth)
    }

    /// Authenticate the token exchange as a confidential client
    pub fn with_client_secret(mut self, secret: String) -> Self {
        self.client_secret = Some(secret);
        self
    }

    pub fn with_endpoints(mut self, endpoints: TwitterEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// PKCE code verifier bound to a linking token: base64url(HMAC(key, token))
    fn pkce_verifier(&self, token: &SessionToken) -> String {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(self.pkce_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(token.as_str().as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// S256 challenge for a verifier
    fn pkce_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Exchange the authorization code for an access token
    async fn request_access_token(&self, token: &SessionToken, code: &str) -> Result<String, LinkError> {
        let verifier = self.pkce_verifier(token);
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];

        let mut request = self.client.post(self.endpoints.token.clone()).form(&params);
        if let Some(secret) = &self.client_secret {
            request = request.basic_auth(&self.client_id, Some(secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LinkError::OAuthExchangeFailed(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Token exchange failed: {} - {}", status, error_text);
            return Err(LinkError::OAuthExchangeFailed(format!(
                "Token exchange failed ({}): {}",
                status, error_text
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            LinkError::OAuthExchangeFailed(format!("Failed to parse token response: {}", e))
        })?;

        Ok(token_response.access_token)
    }

    async fn fetch_profile_once(&self, access_token: &str) -> Result<TwitterUser, String> {
        let response = self
            .client
            .get(self.endpoints.profile.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| format!("Profile request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Twitter API error: {}", response.status()));
        }

        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse profile: {}", e))?;
        Ok(me.data)
    }

    /// Look up the authorizing user, retrying transient failures
    async fn fetch_profile(&self, access_token: &str) -> Result<TwitterUser, LinkError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.fetch_profile_once(access_token).await {
                Ok(user) => return Ok(user),
                Err(e) if attempts >= PROFILE_ATTEMPTS => {
                    error!("Failed to fetch Twitter profile after {} attempts: {}", attempts, e);
                    return Err(LinkError::OAuthExchangeFailed(e));
                }
                Err(e) => {
                    warn!("Attempt {}/{} to fetch Twitter profile failed: {}", attempts, PROFILE_ATTEMPTS, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl OAuthBridge for TwitterOAuth {
    fn authorization_url(&self, token: &SessionToken) -> Url {
        let challenge = Self::pkce_challenge(&self.pkce_verifier(token));

        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", token.as_str())
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        debug!("Generated auth URL for session {}", token.short());
        url
    }

    async fn exchange_code(
        &self,
        token: &SessionToken,
        code: &str,
    ) -> Result<ExternalIdentityProof, LinkError> {
        info!("Exchanging authorization code for session {}", token.short());

        let access_token = self.request_access_token(token, code).await?;
        let user = self.fetch_profile(&access_token).await?;

        info!("Verified Twitter account @{} ({})", user.username, user.id);

        Ok(ExternalIdentityProof {
            external_user_id: user.id,
            external_handle: format!("@{}", user.username),
            display_name: user.name,
            verified_at: chrono::Utc::now().timestamp(),
        })
    }
}
