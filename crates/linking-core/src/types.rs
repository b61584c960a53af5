//! ============================================================================
//! Core Types for XLink
//! ============================================================================
//! Data structures shared by the session manager, the identity store, the
//! OAuth bridge and the orchestrator. Records are serde types so they can be
//! stored in redb (bincode) and exported as JSON by the CLI.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Account IDs
// ============================================================================

const ACCOUNT_ID_MIN_LEN: usize = 2;
const ACCOUNT_ID_MAX_LEN: usize = 64;

/// Wallet account identifier (NEAR naming rules).
/// Example: "alice.near", "app-1.testnet", or a 64-char implicit hex account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        validate_account_id(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_account_id(raw: &str) -> Result<(), LinkError> {
    let invalid = |why: &str| LinkError::InvalidAccountId(format!("{raw:?}: {why}"));

    if raw.len() < ACCOUNT_ID_MIN_LEN || raw.len() > ACCOUNT_ID_MAX_LEN {
        return Err(invalid("length must be between 2 and 64"));
    }

    let mut prev_separator = true; // disallows a leading separator
    for c in raw.chars() {
        match c {
            'a'..='z' | '0'..='9' => prev_separator = false,
            '-' | '_' | '.' => {
                if prev_separator {
                    return Err(invalid("separator in leading or doubled position"));
                }
                prev_separator = true;
            }
            _ => return Err(invalid("only lowercase letters, digits, '-', '_' and '.' allowed")),
        }
    }

    if prev_separator {
        return Err(invalid("trailing separator"));
    }
    Ok(())
}

impl TryFrom<String> for AccountId {
    type Error = LinkError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        validate_account_id(&raw)?;
        Ok(Self(raw))
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AccountId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Session Tokens
// ============================================================================

/// Number of random bytes in a linking token (hex encoded to 64 chars)
const TOKEN_BYTES: usize = 32;

/// Opaque correlation token for one linking attempt.
/// Travels through the provider as the OAuth `state` parameter.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh unguessable token
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Wrap a token received from outside (callback, CLI argument)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix safe to put in logs
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

// Tokens are bearer secrets until redeemed; keep them out of Debug output.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.short())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Linking Sessions
// ============================================================================

/// Status of a linking session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Verified,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

/// One in-flight (or finished) link attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkingSession {
    pub token: SessionToken,
    /// Wallet account that requested the link
    pub owner_account_id: AccountId,
    pub status: SessionStatus,
    pub created_at: i64,
    pub expires_at: i64,
    /// Time of the terminal transition, if any
    pub finished_at: Option<i64>,
}

impl LinkingSession {
    pub fn new(owner_account_id: AccountId, ttl_secs: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            token: SessionToken::generate(),
            owner_account_id,
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now.saturating_add(ttl_secs),
            finished_at: None,
        }
    }

    /// Pending and past its redeemable window
    pub fn is_lapsed_at(&self, now: i64) -> bool {
        self.status == SessionStatus::Pending && now >= self.expires_at
    }
}

// ============================================================================
// Identities
// ============================================================================

/// Proof that the callback party controls an external account.
/// Only an `OAuthBridge` produces these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalIdentityProof {
    pub external_user_id: String,
    /// Handle including the leading '@'
    pub external_handle: String,
    pub display_name: Option<String>,
    pub verified_at: i64,
}

/// Committed wallet <-> external account binding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedIdentity {
    pub account_id: AccountId,
    pub external_handle: String,
    pub external_user_id: String,
    pub linked_at: i64,
}

/// Query parameters delivered to the callback route by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a raw query string (`code=...&state=...`)
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error taxonomy of the linking protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LinkError {
    #[error("No wallet session: caller identity cannot be established")]
    Unauthenticated,

    #[error("Invalid account id {0}")]
    InvalidAccountId(String),

    #[error("Linking session not found")]
    SessionNotFound,

    #[error("Linking session expired")]
    SessionExpired,

    #[error("Linking session belongs to a different account")]
    SessionOwnerMismatch,

    #[error("Linking session already finished")]
    SessionAlreadyTerminal,

    #[error("OAuth state does not match the issued linking token")]
    StateMismatch,

    #[error("Authorization declined or aborted by provider: {0}")]
    UserDeclinedOrProviderError(String),

    #[error("OAuth code exchange failed: {0}")]
    OAuthExchangeFailed(String),

    #[error("External account already linked: {0}")]
    AlreadyLinked(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LinkError {
    /// Whether the user should simply start over with a new session
    pub fn is_retryable_with_fresh_session(&self) -> bool {
        !matches!(self, LinkError::Storage(_) | LinkError::InvalidAccountId(_))
    }
}

impl From<anyhow::Error> for LinkError {
    fn from(e: anyhow::Error) -> Self {
        LinkError::Storage(format!("{:#}", e))
    }
}
