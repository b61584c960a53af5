//! ============================================================================
//! Auth Module - OAuth delegation for identity linking
//! ============================================================================
//! - OAuthBridge: the contract the orchestrator needs from a provider
//! - TwitterOAuth: Twitter OAuth 2.0 + PKCE implementation (server side)
//! - CallbackListener: the fixed `/callback` route the provider returns to
//! ============================================================================

mod callback;
mod twitter_oauth;

pub use callback::CallbackListener;
pub use twitter_oauth::{TwitterEndpoints, TwitterOAuth};

use async_trait::async_trait;
use url::Url;

use crate::types::{ExternalIdentityProof, LinkError, SessionToken};

/// Provider-facing half of the linking flow.
///
/// `exchange_code` talks to the provider with client credentials and must
/// only run in trusted backend code.
#[async_trait]
pub trait OAuthBridge: Send + Sync {
    /// Authorization redirect carrying `token` verbatim as `state`
    fn authorization_url(&self, token: &SessionToken) -> Url;

    /// Redeem an authorization code for proof of account control
    async fn exchange_code(
        &self,
        token: &SessionToken,
        code: &str,
    ) -> Result<ExternalIdentityProof, LinkError>;
}
