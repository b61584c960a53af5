//! ============================================================================
//! Linking Configuration - Environment-driven settings
//! ============================================================================
//! Loaded from process environment (the binary calls `dotenvy::dotenv()`
//! first, so a `.env` file works too).
//! ============================================================================

use anyhow::{anyhow, bail, Result};
use std::net::SocketAddr;
use url::Url;

use crate::types::AccountId;

/// Redirect URI pre-registered with the provider
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:9876/callback";

/// Address the callback listener binds to
pub const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:9876";

/// Linking sessions are redeemable for 10 minutes
pub const DEFAULT_SESSION_TTL_SECS: i64 = 600;

/// Upper bound on the session lifetime (one day)
pub const MAX_SESSION_TTL_SECS: i64 = 86_400;

/// Settings for the linking service
#[derive(Debug, Clone)]
pub struct LinkingConfig {
    pub twitter_client_id: Option<String>,
    pub twitter_client_secret: Option<String>,
    /// HMAC key for deriving PKCE verifiers from linking tokens
    pub pkce_secret: Option<String>,
    /// Fixed, absolute callback URL. Never taken from request input.
    pub redirect_uri: Url,
    pub callback_addr: SocketAddr,
    pub session_ttl_secs: i64,
    pub db_path: Option<String>,
    /// Wallet account the CLI acts for
    pub account_id: Option<AccountId>,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            twitter_client_id: None,
            twitter_client_secret: None,
            pkce_secret: None,
            // Both constants are well-formed literals
            redirect_uri: Url::parse(DEFAULT_REDIRECT_URI).expect("default redirect URI"),
            callback_addr: DEFAULT_CALLBACK_ADDR.parse().expect("default callback address"),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            db_path: None,
            account_id: None,
        }
    }
}

impl LinkingConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.twitter_client_id = get("TWITTER_CLIENT_ID");
        config.twitter_client_secret = get("TWITTER_CLIENT_SECRET");
        config.pkce_secret = get("LINKING_PKCE_SECRET");

        if let Some(raw) = get("LINKING_REDIRECT_URI") {
            config.redirect_uri = parse_redirect_uri(&raw)?;
        }

        if let Some(raw) = get("LINKING_CALLBACK_ADDR") {
            config.callback_addr = raw
                .parse()
                .map_err(|e| anyhow!("LINKING_CALLBACK_ADDR is invalid ({}): {}", raw, e))?;
        }

        if let Some(raw) = get("LINKING_SESSION_TTL_SECS") {
            let ttl: i64 = raw
                .parse()
                .map_err(|e| anyhow!("LINKING_SESSION_TTL_SECS is invalid ({}): {}", raw, e))?;
            if !(0..=MAX_SESSION_TTL_SECS).contains(&ttl) {
                bail!(
                    "LINKING_SESSION_TTL_SECS must be between 0 and {}, got {}",
                    MAX_SESSION_TTL_SECS,
                    ttl
                );
            }
            config.session_ttl_secs = ttl;
        }

        config.db_path = get("LINKING_DB_PATH");

        if let Some(raw) = get("LINKING_ACCOUNT_ID") {
            config.account_id = Some(
                AccountId::parse(&raw).map_err(|e| anyhow!("LINKING_ACCOUNT_ID: {}", e))?,
            );
        }

        Ok(config)
    }

    /// Client id, or an error explaining how to set it
    pub fn require_client_id(&self) -> Result<&str> {
        self.twitter_client_id
            .as_deref()
            .ok_or_else(|| anyhow!("TWITTER_CLIENT_ID not set. Configure in .env or the environment."))
    }

    /// PKCE key: explicit secret, else the client secret
    pub fn require_pkce_secret(&self) -> Result<&str> {
        self.pkce_secret
            .as_deref()
            .or(self.twitter_client_secret.as_deref())
            .ok_or_else(|| anyhow!("Set LINKING_PKCE_SECRET (or TWITTER_CLIENT_SECRET) to derive PKCE verifiers"))
    }
}

fn parse_redirect_uri(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow!("LINKING_REDIRECT_URI is invalid ({}): {}", raw, e))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("LINKING_REDIRECT_URI must be http(s), got {}", url.scheme());
    }
    if url.host_str().is_none() {
        bail!("LINKING_REDIRECT_URI must have a host");
    }
    Ok(url)
}
