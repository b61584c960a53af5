//! ============================================================================
//! Session Module - Linking session issuance and tracking
//! ============================================================================
//! - LinkingSessionManager: the per-attempt state machine
//!   (Pending -> Verified | Failed | Expired)
//! - SessionRepository: durable storage seam (redb in `db`, memory here)
//! ============================================================================

mod manager;
mod memory;

pub use manager::{LinkingSessionManager, Redemption};
pub use memory::MemorySessionRepository;

use anyhow::Result;

use crate::types::{AccountId, LinkingSession, SessionToken};

/// Storage for linking sessions, keyed by token with an owner index.
///
/// `put` maintains the owner index: a `Pending` session becomes the owner's
/// current session, a terminal one is dropped from the index if it was there.
pub trait SessionRepository: Send + Sync {
    fn get(&self, token: &SessionToken) -> Result<Option<LinkingSession>>;

    fn put(&self, session: &LinkingSession) -> Result<()>;

    /// Token of the owner's current pending session, if any
    fn pending_token_for(&self, owner: &AccountId) -> Result<Option<SessionToken>>;

    fn list(&self) -> Result<Vec<LinkingSession>>;

    fn delete(&self, token: &SessionToken) -> Result<bool>;
}
