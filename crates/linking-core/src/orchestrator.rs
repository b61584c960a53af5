//! ============================================================================
//! Linking Orchestrator - Drives one wallet <-> Twitter link attempt
//! ============================================================================
//! ```text
//! Idle ──initiate──> AwaitingRedirect ──redirected──> AwaitingCallback
//!                                                          │ complete
//!                                                          v
//!                          Failed(reason) <──────────── Verifying ──> Linked
//! ```
//! `Failed` is reachable from every non-terminal state. There is no retry
//! inside the orchestrator: a failed flow needs a fresh `initiate`.
//!
//! `complete` also accepts a flow still in `AwaitingRedirect`: a callback
//! arriving is itself proof the hand-off happened.
//!
//! The callback is matched against the durable session record, not against
//! anything held in memory across the redirect. A process that lost its flow
//! rebuilds it with `resume`. Double redemption is refused by the session
//! manager, so every orchestrator sharing one manager is covered.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::OAuthBridge;
use crate::session::{LinkingSessionManager, Redemption};
use crate::store::IdentityStore;
use crate::types::{AccountId, CallbackParams, LinkError, LinkedIdentity, SessionToken};
use crate::wallet::WalletAuthority;

/// Position of a flow in the linking state machine
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Idle,
    AwaitingRedirect,
    AwaitingCallback,
    Verifying,
    Linked(LinkedIdentity),
    Failed(LinkError),
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Linked(_) | FlowState::Failed(_))
    }
}

/// Caller-side handle for one link attempt
#[derive(Debug, Clone)]
pub struct LinkingFlow {
    state: FlowState,
    token: Option<SessionToken>,
    owner: Option<AccountId>,
    authorization_url: Option<Url>,
}

impl Default for LinkingFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkingFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::Idle,
            token: None,
            owner: None,
            authorization_url: None,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub fn owner(&self) -> Option<&AccountId> {
        self.owner.as_ref()
    }

    pub fn authorization_url(&self) -> Option<&Url> {
        self.authorization_url.as_ref()
    }

    /// Control has been handed to the provider
    pub fn redirected(&mut self) {
        if self.state == FlowState::AwaitingRedirect {
            self.state = FlowState::AwaitingCallback;
        } else {
            debug!("redirected() ignored in state {:?}", self.state);
        }
    }

    fn fail(&mut self, error: LinkError) -> Result<LinkedIdentity, LinkError> {
        warn!("Linking flow failed: {}", error);
        self.state = FlowState::Failed(error.clone());
        Err(error)
    }
}

/// Wires wallet, sessions, provider and identity store into the link flow
pub struct LinkingOrchestrator {
    wallet: Arc<dyn WalletAuthority>,
    sessions: Arc<LinkingSessionManager>,
    oauth: Arc<dyn OAuthBridge>,
    store: Arc<dyn IdentityStore>,
}

impl LinkingOrchestrator {
    pub fn new(
        wallet: Arc<dyn WalletAuthority>,
        sessions: Arc<LinkingSessionManager>,
        oauth: Arc<dyn OAuthBridge>,
        store: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            wallet,
            sessions,
            oauth,
            store,
        }
    }

    pub fn sessions(&self) -> &LinkingSessionManager {
        &self.sessions
    }

    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    /// Start a link attempt: issue a session and build the provider redirect.
    /// Any previous state of `flow` is discarded. On failure the flow is Idle.
    pub async fn initiate(&self, flow: &mut LinkingFlow) -> Result<Url, LinkError> {
        *flow = LinkingFlow::new();

        let owner = self.wallet.current_account_id().await;
        let session = self.sessions.initiate(owner)?;
        let url = self.oauth.authorization_url(&session.token);
        info!("Linking flow awaiting redirect for {}", session.owner_account_id);

        flow.token = Some(session.token);
        flow.owner = Some(session.owner_account_id);
        flow.authorization_url = Some(url.clone());
        flow.state = FlowState::AwaitingRedirect;
        Ok(url)
    }

    /// Rebuild a flow waiting for its callback from the session store.
    /// Without an explicit token, the caller's current pending session is used.
    pub async fn resume(&self, token: Option<SessionToken>) -> Result<LinkingFlow, LinkError> {
        let owner = self
            .wallet
            .current_account_id()
            .await
            .ok_or(LinkError::Unauthenticated)?;

        let session = match token {
            Some(token) => self.sessions.get(&token)?.ok_or(LinkError::SessionNotFound)?,
            None => self.sessions.pending_for(&owner)?.ok_or(LinkError::SessionNotFound)?,
        };

        if session.owner_account_id != owner {
            return Err(LinkError::SessionOwnerMismatch);
        }

        debug!("Resumed linking flow for session {}", session.token.short());
        Ok(LinkingFlow {
            state: FlowState::AwaitingCallback,
            token: Some(session.token),
            owner: Some(owner),
            authorization_url: None,
        })
    }

    /// Handle the provider's return to the callback route
    pub async fn complete(
        &self,
        flow: &mut LinkingFlow,
        callback: &CallbackParams,
    ) -> Result<LinkedIdentity, LinkError> {
        if flow.state.is_terminal() {
            return Err(LinkError::SessionAlreadyTerminal);
        }

        let awaiting = matches!(
            flow.state,
            FlowState::AwaitingRedirect | FlowState::AwaitingCallback
        );
        let (token, owner) = match (awaiting, flow.token.clone(), flow.owner.clone()) {
            (true, Some(token), Some(owner)) => (token, owner),
            _ => return flow.fail(LinkError::SessionNotFound),
        };

        flow.state = FlowState::Verifying;

        // Forgery defense: checked before anything else, whatever the code says
        if callback.state.as_deref() != Some(token.as_str()) {
            warn!("Callback state does not match session {}", token.short());
            return flow.fail(LinkError::StateMismatch);
        }

        let code = match (&callback.error, callback.code.as_deref()) {
            (None, Some(code)) if !code.is_empty() => code,
            (error, _) => {
                let reason = match error {
                    Some(error) => match &callback.error_description {
                        Some(desc) => format!("{} - {}", error, desc),
                        None => error.clone(),
                    },
                    None => "no authorization code in callback".to_string(),
                };
                self.discard_session(&token);
                return flow.fail(LinkError::UserDeclinedOrProviderError(reason));
            }
        };

        // Session errors mean the session is not ours to clean up
        let redemption = match self.sessions.begin_redemption(&token, &owner) {
            Ok(redemption) => redemption,
            Err(e) => return flow.fail(e),
        };

        match self.redeem(redemption, &owner, code).await {
            Ok(linked) => {
                info!(
                    "Linked {} to {} ({})",
                    owner, linked.external_handle, linked.external_user_id
                );
                flow.state = FlowState::Linked(linked.clone());
                Ok(linked)
            }
            Err(e) => flow.fail(e),
        }
    }

    /// Exchange, commit and close a claimed session
    async fn redeem(
        &self,
        redemption: Redemption<'_>,
        owner: &AccountId,
        code: &str,
    ) -> Result<LinkedIdentity, LinkError> {
        match self.exchange_and_commit(redemption.token(), owner, code).await {
            Ok(linked) => {
                redemption.mark_verified()?;
                Ok(linked)
            }
            Err(e) => {
                let token = redemption.token().clone();
                if let Err(cleanup) = redemption.mark_failed() {
                    warn!("Failed to close session {}: {}", token.short(), cleanup);
                }
                Err(e)
            }
        }
    }

    async fn exchange_and_commit(
        &self,
        token: &SessionToken,
        owner: &AccountId,
        code: &str,
    ) -> Result<LinkedIdentity, LinkError> {
        let proof = self.oauth.exchange_code(token, code).await?;
        self.store.commit(owner, &proof).await
    }

    /// Best-effort cleanup; the session expires on its own if this fails
    fn discard_session(&self, token: &SessionToken) {
        match self.sessions.mark_failed(token) {
            Ok(_) => {}
            Err(LinkError::SessionAlreadyTerminal) => {
                debug!("Session {} already finished", token.short())
            }
            Err(e) => warn!("Failed to close session {}: {}", token.short(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionRepository;
    use crate::store::MemoryIdentityStore;
    use crate::types::{ExternalIdentityProof, SessionStatus};
    use crate::wallet::StaticWalletAuthority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider stand-in: every code maps to one fixed external account
    struct FakeBridge {
        user_id: String,
        handle: String,
        reject: bool,
        delay: Duration,
        exchanges: AtomicUsize,
    }

    impl FakeBridge {
        fn new(user_id: &str, handle: &str) -> Self {
            Self {
                user_id: user_id.to_string(),
                handle: handle.to_string(),
                reject: false,
                delay: Duration::ZERO,
                exchanges: AtomicUsize::new(0),
            }
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OAuthBridge for FakeBridge {
        fn authorization_url(&self, token: &SessionToken) -> Url {
            let mut url = Url::parse("https://provider.test/authorize").unwrap();
            url.query_pairs_mut().append_pair("state", token.as_str());
            url
        }

        async fn exchange_code(
            &self,
            _token: &SessionToken,
            _code: &str,
        ) -> Result<ExternalIdentityProof, LinkError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reject {
                return Err(LinkError::OAuthExchangeFailed("invalid_grant".to_string()));
            }
            Ok(ExternalIdentityProof {
                external_user_id: self.user_id.clone(),
                external_handle: self.handle.clone(),
                display_name: None,
                verified_at: chrono::Utc::now().timestamp(),
            })
        }
    }

    struct Harness {
        sessions: Arc<LinkingSessionManager>,
        store: Arc<MemoryIdentityStore>,
        bridge: Arc<FakeBridge>,
    }

    impl Harness {
        fn new(bridge: FakeBridge, ttl_secs: i64) -> Self {
            Self {
                sessions: Arc::new(LinkingSessionManager::new(
                    Arc::new(MemorySessionRepository::new()),
                    ttl_secs,
                )),
                store: Arc::new(MemoryIdentityStore::new()),
                bridge: Arc::new(bridge),
            }
        }

        /// Orchestrator acting for `account` (None = no wallet session)
        fn orchestrator(&self, account: Option<&str>) -> LinkingOrchestrator {
            let wallet = StaticWalletAuthority::new(account.map(|a| AccountId::parse(a).unwrap()));
            LinkingOrchestrator::new(
                Arc::new(wallet),
                self.sessions.clone(),
                self.bridge.clone(),
                self.store.clone(),
            )
        }
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..CallbackParams::default()
        }
    }

    fn alice() -> AccountId {
        AccountId::parse("alice.near").unwrap()
    }

    async fn started(orchestrator: &LinkingOrchestrator) -> (LinkingFlow, SessionToken) {
        let mut flow = LinkingFlow::new();
        let url = orchestrator.initiate(&mut flow).await.unwrap();
        assert_eq!(flow.state(), &FlowState::AwaitingRedirect);
        flow.redirected();
        assert_eq!(flow.state(), &FlowState::AwaitingCallback);

        let token = flow.token().unwrap().clone();
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == token.as_str()));
        (flow, token)
    }

    #[tokio::test]
    async fn test_links_alice_end_to_end() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&orchestrator).await;

        let linked = orchestrator
            .complete(&mut flow, &callback(Some("abc"), Some(token.as_str())))
            .await
            .unwrap();

        assert_eq!(linked.external_handle, "@alice");
        assert_eq!(linked.external_user_id, "123");
        assert_eq!(flow.state(), &FlowState::Linked(linked.clone()));

        let stored = h.store.lookup(&alice()).await.unwrap().unwrap();
        assert_eq!(stored.external_handle, "@alice");
        assert_eq!(stored.external_user_id, "123");
        assert_eq!(
            h.sessions.get(&token).unwrap().unwrap().status,
            SessionStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_tampered_state_is_rejected() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&orchestrator).await;

        let result = orchestrator
            .complete(&mut flow, &callback(Some("abc"), Some("tok-2")))
            .await;

        assert_eq!(result, Err(LinkError::StateMismatch));
        assert_eq!(flow.state(), &FlowState::Failed(LinkError::StateMismatch));
        assert_eq!(h.bridge.exchanges(), 0);
        assert_eq!(h.store.count().await.unwrap(), 0);
        // A forged callback does not close the real session
        assert_eq!(h.sessions.get(&token).unwrap().unwrap().status, SessionStatus::Pending);

        // Missing state is a mismatch too
        let (mut flow, _) = started(&orchestrator).await;
        let result = orchestrator.complete(&mut flow, &callback(Some("abc"), None)).await;
        assert_eq!(result, Err(LinkError::StateMismatch));
    }

    #[tokio::test]
    async fn test_substituted_token_of_other_owner_is_rejected() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let alice_side = h.orchestrator(Some("alice.near"));
        let bob_side = h.orchestrator(Some("bob.near"));

        let (mut alice_flow, _) = started(&alice_side).await;
        let (_bob_flow, bob_token) = started(&bob_side).await;

        let result = alice_side
            .complete(&mut alice_flow, &callback(Some("abc"), Some(bob_token.as_str())))
            .await;

        assert_eq!(result, Err(LinkError::StateMismatch));
        assert_eq!(h.bridge.exchanges(), 0);
        assert_eq!(h.store.count().await.unwrap(), 0);
        // Bob's own session is untouched
        let bob = AccountId::parse("bob.near").unwrap();
        assert!(h.sessions.validate(&bob_token, &bob).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_complete_exchanges_once() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&orchestrator).await;
        let params = callback(Some("abc"), Some(token.as_str()));

        assert!(orchestrator.complete(&mut flow, &params).await.is_ok());
        let second = orchestrator.complete(&mut flow, &params).await;
        assert_eq!(second, Err(LinkError::SessionAlreadyTerminal));
        assert!(matches!(flow.state(), FlowState::Linked(_)));

        // Same callback delivered to a fresh process that resumes by token
        let mut resumed = orchestrator.resume(Some(token.clone())).await.unwrap();
        let third = orchestrator.complete(&mut resumed, &params).await;
        assert_eq!(third, Err(LinkError::SessionAlreadyTerminal));

        assert_eq!(h.bridge.exchanges(), 1);
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_callbacks_exchange_once() {
        let mut bridge = FakeBridge::new("123", "@alice");
        bridge.delay = Duration::from_millis(50);
        let h = Harness::new(bridge, 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (_flow, token) = started(&orchestrator).await;
        let params = callback(Some("abc"), Some(token.as_str()));

        let mut first = orchestrator.resume(Some(token.clone())).await.unwrap();
        let mut second = orchestrator.resume(Some(token.clone())).await.unwrap();
        let (a, b) = tokio::join!(
            orchestrator.complete(&mut first, &params),
            orchestrator.complete(&mut second, &params)
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.contains(&Err(LinkError::SessionAlreadyTerminal)));
        assert_eq!(h.bridge.exchanges(), 1);
        assert_eq!(
            h.sessions.get(&token).unwrap().unwrap().status,
            SessionStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_callbacks_on_separate_orchestrators_exchange_once() {
        let mut bridge = FakeBridge::new("123", "@alice");
        bridge.delay = Duration::from_millis(50);
        let h = Harness::new(bridge, 600);

        // One orchestrator per request, all over the same session manager
        let first_host = h.orchestrator(Some("alice.near"));
        let second_host = h.orchestrator(Some("alice.near"));
        let (_flow, token) = started(&first_host).await;
        let params = callback(Some("abc"), Some(token.as_str()));

        let mut first = first_host.resume(Some(token.clone())).await.unwrap();
        let mut second = second_host.resume(Some(token.clone())).await.unwrap();
        let (a, b) = tokio::join!(
            first_host.complete(&mut first, &params),
            second_host.complete(&mut second, &params)
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.contains(&Err(LinkError::SessionAlreadyTerminal)));
        assert_eq!(h.bridge.exchanges(), 1);
        assert_eq!(h.store.count().await.unwrap(), 1);
        assert_eq!(
            h.sessions.get(&token).unwrap().unwrap().status,
            SessionStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_complete_without_redirected_handoff() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let mut flow = LinkingFlow::new();
        orchestrator.initiate(&mut flow).await.unwrap();
        assert_eq!(flow.state(), &FlowState::AwaitingRedirect);

        let token = flow.token().unwrap().clone();
        let linked = orchestrator
            .complete(&mut flow, &callback(Some("abc"), Some(token.as_str())))
            .await
            .unwrap();
        assert_eq!(flow.state(), &FlowState::Linked(linked));
    }

    #[tokio::test]
    async fn test_reinitiate_invalidates_first_flow() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut first, first_token) = started(&orchestrator).await;
        let (_second, second_token) = started(&orchestrator).await;
        assert_ne!(first_token, second_token);

        let result = orchestrator
            .complete(&mut first, &callback(Some("abc"), Some(first_token.as_str())))
            .await;

        assert!(matches!(
            result,
            Err(LinkError::SessionAlreadyTerminal) | Err(LinkError::SessionExpired)
        ));
        assert_eq!(h.bridge.exchanges(), 0);
        assert!(h.store.lookup(&alice()).await.unwrap().is_none());
        // The newer session is still redeemable
        assert!(h.sessions.validate(&second_token, &alice()).is_ok());
    }

    #[tokio::test]
    async fn test_expired_session_never_links() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 0);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&orchestrator).await;

        let result = orchestrator
            .complete(&mut flow, &callback(Some("abc"), Some(token.as_str())))
            .await;

        assert_eq!(result, Err(LinkError::SessionExpired));
        assert_eq!(h.bridge.exchanges(), 0);
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_declined_authorization() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));

        let (mut flow, token) = started(&orchestrator).await;
        let declined = CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("User denied".to_string()),
            state: Some(token.as_str().to_string()),
            code: None,
        };
        let result = orchestrator.complete(&mut flow, &declined).await;
        assert!(matches!(result, Err(LinkError::UserDeclinedOrProviderError(ref r)) if r.contains("access_denied")));
        assert_eq!(h.sessions.get(&token).unwrap().unwrap().status, SessionStatus::Failed);

        let (mut flow, token) = started(&orchestrator).await;
        let result = orchestrator
            .complete(&mut flow, &callback(None, Some(token.as_str())))
            .await;
        assert!(matches!(result, Err(LinkError::UserDeclinedOrProviderError(_))));
        assert_eq!(h.bridge.exchanges(), 0);
    }

    #[tokio::test]
    async fn test_exchange_failure_closes_session() {
        let mut bridge = FakeBridge::new("123", "@alice");
        bridge.reject = true;
        let h = Harness::new(bridge, 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&orchestrator).await;

        let result = orchestrator
            .complete(&mut flow, &callback(Some("stale"), Some(token.as_str())))
            .await;

        assert!(matches!(result, Err(LinkError::OAuthExchangeFailed(_))));
        assert!(matches!(flow.state(), FlowState::Failed(LinkError::OAuthExchangeFailed(_))));
        assert_eq!(h.sessions.get(&token).unwrap().unwrap().status, SessionStatus::Failed);
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_external_account_already_linked_elsewhere() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);

        let alice_side = h.orchestrator(Some("alice.near"));
        let (mut flow, token) = started(&alice_side).await;
        alice_side
            .complete(&mut flow, &callback(Some("abc"), Some(token.as_str())))
            .await
            .unwrap();

        let bob_side = h.orchestrator(Some("bob.near"));
        let (mut flow, token) = started(&bob_side).await;
        let result = bob_side
            .complete(&mut flow, &callback(Some("def"), Some(token.as_str())))
            .await;

        assert!(matches!(result, Err(LinkError::AlreadyLinked(_))));
        assert_eq!(h.sessions.get(&token).unwrap().unwrap().status, SessionStatus::Failed);
        assert_eq!(
            h.store.lookup_by_external("123").await.unwrap().unwrap().account_id,
            alice()
        );
    }

    #[tokio::test]
    async fn test_initiate_without_wallet() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(None);
        let mut flow = LinkingFlow::new();

        assert_eq!(orchestrator.initiate(&mut flow).await, Err(LinkError::Unauthenticated));
        assert_eq!(flow.state(), &FlowState::Idle);
        assert!(flow.token().is_none());
        assert!(h.sessions.list(None).unwrap().is_empty());
        assert_eq!(orchestrator.resume(None).await.unwrap_err(), LinkError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_resume_checks_owner() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let alice_side = h.orchestrator(Some("alice.near"));
        let (_flow, token) = started(&alice_side).await;

        let resumed = alice_side.resume(None).await.unwrap();
        assert_eq!(resumed.token(), Some(&token));
        assert_eq!(resumed.state(), &FlowState::AwaitingCallback);

        let bob_side = h.orchestrator(Some("bob.near"));
        assert_eq!(
            bob_side.resume(Some(token)).await.unwrap_err(),
            LinkError::SessionOwnerMismatch
        );
        assert_eq!(bob_side.resume(None).await.unwrap_err(), LinkError::SessionNotFound);
    }

    #[tokio::test]
    async fn test_complete_on_idle_flow_fails() {
        let h = Harness::new(FakeBridge::new("123", "@alice"), 600);
        let orchestrator = h.orchestrator(Some("alice.near"));
        let mut flow = LinkingFlow::new();

        let result = orchestrator.complete(&mut flow, &callback(Some("abc"), Some("x"))).await;
        assert_eq!(result, Err(LinkError::SessionNotFound));
        assert_eq!(flow.state(), &FlowState::Failed(LinkError::SessionNotFound));
    }
}
