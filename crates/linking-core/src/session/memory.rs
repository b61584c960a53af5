//! In-memory session repository for tests and embedding.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

use super::SessionRepository;
use crate::types::{AccountId, LinkingSession, SessionStatus, SessionToken};

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionToken, LinkingSession>,
    pending_by_owner: HashMap<AccountId, SessionToken>,
}

/// Session repository backed by process memory
#[derive(Default)]
pub struct MemorySessionRepository {
    tables: Mutex<Tables>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionRepository for MemorySessionRepository {
    fn get(&self, token: &SessionToken) -> Result<Option<LinkingSession>> {
        Ok(self.tables().sessions.get(token).cloned())
    }

    fn put(&self, session: &LinkingSession) -> Result<()> {
        let mut tables = self.tables();
        let owner = &session.owner_account_id;

        if session.status == SessionStatus::Pending {
            tables.pending_by_owner.insert(owner.clone(), session.token.clone());
        } else if tables.pending_by_owner.get(owner) == Some(&session.token) {
            tables.pending_by_owner.remove(owner);
        }

        tables.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    fn pending_token_for(&self, owner: &AccountId) -> Result<Option<SessionToken>> {
        Ok(self.tables().pending_by_owner.get(owner).cloned())
    }

    fn list(&self) -> Result<Vec<LinkingSession>> {
        let mut sessions: Vec<_> = self.tables().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    fn delete(&self, token: &SessionToken) -> Result<bool> {
        let mut tables = self.tables();
        let Some(session) = tables.sessions.remove(token) else {
            return Ok(false);
        };
        if tables.pending_by_owner.get(&session.owner_account_id) == Some(token) {
            tables.pending_by_owner.remove(&session.owner_account_id);
        }
        Ok(true)
    }
}
