//! ============================================================================
//! Linking Session Manager
//! ============================================================================
//! Issues linking tokens and enforces the session state machine:
//!
//! ```text
//! initiate ──> Pending ──mark_verified──> Verified
//!                 │  └────mark_failed───> Failed
//!                 └──(read past expiry)─> Expired
//! ```
//!
//! Terminal sessions are never mutated again. Expiry is applied lazily when a
//! session is validated; there is no background sweep.
//!
//! A pending session being redeemed is claimed through `begin_redemption`.
//! While the claim is held, every other caller sees the session as already
//! finished, and only the claim holder can move it to a terminal state.
//! ============================================================================

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::SessionRepository;
use crate::types::{AccountId, LinkError, LinkingSession, SessionStatus, SessionToken};

/// Issues and tracks linking sessions
pub struct LinkingSessionManager {
    repo: Arc<dyn SessionRepository>,
    ttl_secs: i64,
    /// Serializes read-modify-write sequences against the repository.
    /// Holds the tokens currently being redeemed.
    redeeming: Mutex<HashSet<SessionToken>>,
}

/// Exclusive claim on a pending session, released on drop
pub struct Redemption<'a> {
    manager: &'a LinkingSessionManager,
    session: LinkingSession,
}

impl Redemption<'_> {
    pub fn session(&self) -> &LinkingSession {
        &self.session
    }

    pub fn token(&self) -> &SessionToken {
        &self.session.token
    }

    /// Finish the redemption successfully
    pub fn mark_verified(self) -> Result<LinkingSession, LinkError> {
        self.manager.finish_claimed(&self.session.token, SessionStatus::Verified)
    }

    /// Give up on the redemption and close the session
    pub fn mark_failed(self) -> Result<LinkingSession, LinkError> {
        self.manager.finish_claimed(&self.session.token, SessionStatus::Failed)
    }
}

impl Drop for Redemption<'_> {
    fn drop(&mut self) {
        self.manager.lock().remove(&self.session.token);
    }
}

impl LinkingSessionManager {
    pub fn new(repo: Arc<dyn SessionRepository>, ttl_secs: i64) -> Self {
        Self {
            repo,
            ttl_secs,
            redeeming: Mutex::new(HashSet::new()),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SessionToken>> {
        self.redeeming.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, token: &SessionToken) -> Result<LinkingSession, LinkError> {
        self.repo.get(token)?.ok_or(LinkError::SessionNotFound)
    }

    /// Create a new pending session for `owner`.
    /// Any earlier pending session of the same owner is closed first, so a
    /// stale token can never be redeemed.
    pub fn initiate(&self, owner: Option<AccountId>) -> Result<LinkingSession, LinkError> {
        let owner = owner.ok_or(LinkError::Unauthenticated)?;
        let _guard = self.lock();

        if let Some(prev_token) = self.repo.pending_token_for(&owner)? {
            if let Some(mut prev) = self.repo.get(&prev_token)? {
                if prev.status == SessionStatus::Pending {
                    let now = chrono::Utc::now().timestamp();
                    prev.status = if prev.is_lapsed_at(now) {
                        SessionStatus::Expired
                    } else {
                        SessionStatus::Failed
                    };
                    prev.finished_at = Some(now);
                    self.repo.put(&prev)?;
                    info!(
                        "Superseded pending session {} for {} ({:?})",
                        prev.token.short(),
                        owner,
                        prev.status
                    );
                }
            }
        }

        let session = LinkingSession::new(owner, self.ttl_secs);
        self.repo.put(&session)?;

        info!(
            "Issued linking session {} for {} (expires in {}s)",
            session.token.short(),
            session.owner_account_id,
            self.ttl_secs
        );
        Ok(session)
    }

    /// Check that `token` is an open session issued to `owner`
    pub fn validate(&self, token: &SessionToken, owner: &AccountId) -> Result<LinkingSession, LinkError> {
        let redeeming = self.lock();
        self.validate_locked(&redeeming, token, owner)
    }

    /// Validate and claim `token` for redemption in one step.
    /// A second claim on the same token fails with `SessionAlreadyTerminal`
    /// until the first is dropped.
    pub fn begin_redemption(
        &self,
        token: &SessionToken,
        owner: &AccountId,
    ) -> Result<Redemption<'_>, LinkError> {
        let mut redeeming = self.lock();
        let session = self.validate_locked(&redeeming, token, owner)?;
        redeeming.insert(token.clone());

        debug!("Claimed linking session {} for redemption", token.short());
        Ok(Redemption {
            manager: self,
            session,
        })
    }

    fn validate_locked(
        &self,
        redeeming: &HashSet<SessionToken>,
        token: &SessionToken,
        owner: &AccountId,
    ) -> Result<LinkingSession, LinkError> {
        let mut session = self.load(token)?;

        if session.status == SessionStatus::Expired {
            return Err(LinkError::SessionExpired);
        }

        let now = chrono::Utc::now().timestamp();
        if session.is_lapsed_at(now) && !redeeming.contains(token) {
            session.status = SessionStatus::Expired;
            session.finished_at = Some(now);
            self.repo.put(&session)?;
            info!("Linking session {} expired", token.short());
            return Err(LinkError::SessionExpired);
        }

        if &session.owner_account_id != owner {
            warn!(
                "Linking session {} presented by {} but issued to {}",
                token.short(),
                owner,
                session.owner_account_id
            );
            return Err(LinkError::SessionOwnerMismatch);
        }

        if session.status.is_terminal() || redeeming.contains(token) {
            return Err(LinkError::SessionAlreadyTerminal);
        }

        debug!("Validated linking session {}", token.short());
        Ok(session)
    }

    /// One-shot transition to Verified. Not idempotent.
    pub fn mark_verified(&self, token: &SessionToken) -> Result<LinkingSession, LinkError> {
        self.finish(token, SessionStatus::Verified)
    }

    /// One-shot transition to Failed. Not idempotent.
    pub fn mark_failed(&self, token: &SessionToken) -> Result<LinkingSession, LinkError> {
        self.finish(token, SessionStatus::Failed)
    }

    fn finish(&self, token: &SessionToken, status: SessionStatus) -> Result<LinkingSession, LinkError> {
        let redeeming = self.lock();
        // Only the claim holder may finish a session under redemption
        if redeeming.contains(token) {
            return Err(LinkError::SessionAlreadyTerminal);
        }
        self.finish_locked(token, status)
    }

    fn finish_claimed(&self, token: &SessionToken, status: SessionStatus) -> Result<LinkingSession, LinkError> {
        let mut redeeming = self.lock();
        let result = self.finish_locked(token, status);
        redeeming.remove(token);
        result
    }

    fn finish_locked(&self, token: &SessionToken, status: SessionStatus) -> Result<LinkingSession, LinkError> {
        let mut session = self.load(token)?;

        if session.status.is_terminal() {
            return Err(LinkError::SessionAlreadyTerminal);
        }

        session.status = status;
        session.finished_at = Some(chrono::Utc::now().timestamp());
        self.repo.put(&session)?;

        info!("Linking session {} -> {:?}", token.short(), status);
        Ok(session)
    }

    pub fn get(&self, token: &SessionToken) -> Result<Option<LinkingSession>, LinkError> {
        Ok(self.repo.get(token)?)
    }

    /// The owner's current pending session, looked up from storage
    pub fn pending_for(&self, owner: &AccountId) -> Result<Option<LinkingSession>, LinkError> {
        let Some(token) = self.repo.pending_token_for(owner)? else {
            return Ok(None);
        };
        Ok(self
            .repo
            .get(&token)?
            .filter(|s| s.status == SessionStatus::Pending))
    }

    pub fn list(&self, status_filter: Option<SessionStatus>) -> Result<Vec<LinkingSession>, LinkError> {
        let sessions = self.repo.list()?;
        Ok(match status_filter {
            Some(status) => sessions.into_iter().filter(|s| s.status == status).collect(),
            None => sessions,
        })
    }

    /// Sessions eligible for pruning: finished (or lapsed) before the cutoff
    pub fn prunable(&self, older_than_days: i64) -> Result<Vec<LinkingSession>, LinkError> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now.saturating_sub(older_than_days.saturating_mul(86400));
        Ok(self
            .repo
            .list()?
            .into_iter()
            .filter(|s| match s.finished_at {
                Some(finished) => s.status.is_terminal() && finished < cutoff,
                None => s.is_lapsed_at(now) && s.expires_at < cutoff,
            })
            .collect())
    }

    /// Delete finished sessions older than the given number of days.
    /// Returns the number of sessions deleted.
    pub fn prune_finished(&self, older_than_days: i64) -> Result<usize, LinkError> {
        let _guard = self.lock();
        let candidates = self.prunable(older_than_days)?;

        let mut deleted = 0;
        for session in &candidates {
            if self.repo.delete(&session.token)? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!("Pruned {} linking sessions older than {} days", deleted, older_than_days);
        }
        Ok(deleted)
    }
}
