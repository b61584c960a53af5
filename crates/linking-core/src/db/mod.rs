// ============================================================================
// LinkingDb - Embedded Database (redb)
// ============================================================================
// Durable storage for linking sessions and committed links.
// Default path: ~/.xlink/linking.redb (callers pass LinkingConfig::db_path)
//
// Every mutation runs in a single redb write transaction. redb allows one
// writer at a time, which is what makes `commit` atomic across both link
// indexes.
// ============================================================================

pub mod types;

pub use types::DbStats;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::session::SessionRepository;
use crate::store::{plan_commit, IdentityStore};
use crate::types::{
    AccountId, ExternalIdentityProof, LinkError, LinkedIdentity, LinkingSession, SessionStatus,
    SessionToken,
};

// Table definitions
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const SESSIONS_BY_OWNER: TableDefinition<&str, &str> = TableDefinition::new("sessions_by_owner");
const LINKS: TableDefinition<&str, &[u8]> = TableDefinition::new("links");
const LINKS_BY_EXTERNAL: TableDefinition<&str, &str> = TableDefinition::new("links_by_external");

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| anyhow!("Failed to serialize {}: {}", what, e))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| anyhow!("Failed to deserialize {}: {}", what, e))
}

/// Embedded database for linking sessions and identities
pub struct LinkingDb {
    db: Database,
    path: PathBuf,
}

impl LinkingDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None (or blank), uses ~/.xlink/linking.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path.filter(|p| !p.trim().is_empty()) {
            PathBuf::from(p)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let xlink_dir = home.join(".xlink");
            std::fs::create_dir_all(&xlink_dir)
                .map_err(|e| anyhow!("Failed to create .xlink directory: {}", e))?;
            xlink_dir.join("linking.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(SESSIONS).map_err(|e| anyhow!("Failed to create sessions table: {}", e))?;
            let _ = write_txn.open_table(SESSIONS_BY_OWNER).map_err(|e| anyhow!("Failed to create owner index: {}", e))?;
            let _ = write_txn.open_table(LINKS).map_err(|e| anyhow!("Failed to create links table: {}", e))?;
            let _ = write_txn.open_table(LINKS_BY_EXTERNAL).map_err(|e| anyhow!("Failed to create external index: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Link Reads
    // ========================================================================

    fn read_link(&self, account_id: &str) -> Result<Option<LinkedIdentity>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(LINKS)
            .map_err(|e| anyhow!("Failed to open links table: {}", e))?;

        match table.get(account_id).map_err(|e| anyhow!("Failed to get link: {}", e))? {
            Some(value) => Ok(Some(decode(value.value(), "link")?)),
            None => Ok(None),
        }
    }

    fn read_owner_of_external(&self, external_user_id: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(LINKS_BY_EXTERNAL)
            .map_err(|e| anyhow!("Failed to open external index: {}", e))?;

        let owner = table
            .get(external_user_id)
            .map_err(|e| anyhow!("Failed to get external link: {}", e))?
            .map(|value| value.value().to_string());
        Ok(owner)
    }

    pub fn list_links(&self) -> Result<Vec<LinkedIdentity>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(LINKS)
            .map_err(|e| anyhow!("Failed to open links table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate links: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(decode(value.value(), "link")?);
        }
        Ok(results)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let sessions = SessionRepository::list(self)?;
        let total_links = self.list_links()?.len();

        let mut session_counts = HashMap::new();
        for session in &sessions {
            *session_counts.entry(session.status.as_str().to_string()).or_insert(0usize) += 1;
        }

        Ok(DbStats {
            total_sessions: sessions.len(),
            session_counts,
            total_links,
        })
    }
}

// ============================================================================
// Session Operations
// ============================================================================

impl SessionRepository for LinkingDb {
    fn get(&self, token: &SessionToken) -> Result<Option<LinkingSession>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;

        match table.get(token.as_str()).map_err(|e| anyhow!("Failed to get session: {}", e))? {
            Some(value) => Ok(Some(decode(value.value(), "session")?)),
            None => Ok(None),
        }
    }

    fn put(&self, session: &LinkingSession) -> Result<()> {
        let value = encode(session, "session")?;
        let owner = session.owner_account_id.as_str();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            table.insert(session.token.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert session: {}", e))?;

            let mut index = write_txn.open_table(SESSIONS_BY_OWNER)
                .map_err(|e| anyhow!("Failed to open owner index: {}", e))?;
            if session.status == SessionStatus::Pending {
                index.insert(owner, session.token.as_str())
                    .map_err(|e| anyhow!("Failed to index session: {}", e))?;
            } else {
                let indexed = index
                    .get(owner)
                    .map_err(|e| anyhow!("Failed to read owner index: {}", e))?
                    .map(|v| v.value().to_string());
                if indexed.as_deref() == Some(session.token.as_str()) {
                    index.remove(owner)
                        .map_err(|e| anyhow!("Failed to unindex session: {}", e))?;
                }
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored session: {} ({:?})", session.token.short(), session.status);
        Ok(())
    }

    fn pending_token_for(&self, owner: &AccountId) -> Result<Option<SessionToken>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SESSIONS_BY_OWNER)
            .map_err(|e| anyhow!("Failed to open owner index: {}", e))?;

        let token = table
            .get(owner.as_str())
            .map_err(|e| anyhow!("Failed to read owner index: {}", e))?
            .map(|value| SessionToken::from_raw(value.value()));
        Ok(token)
    }

    fn list(&self) -> Result<Vec<LinkingSession>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;

        let mut results: Vec<LinkingSession> = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate sessions: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(decode(value.value(), "session")?);
        }
        results.sort_by_key(|s| s.created_at);
        Ok(results)
    }

    fn delete(&self, token: &SessionToken) -> Result<bool> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            let session: Option<LinkingSession> = match table
                .remove(token.as_str())
                .map_err(|e| anyhow!("Failed to remove session: {}", e))?
            {
                Some(value) => Some(decode(value.value(), "session")?),
                None => None,
            };
            removed = session.is_some();

            if let Some(session) = session {
                let owner = session.owner_account_id.as_str();
                let mut index = write_txn.open_table(SESSIONS_BY_OWNER)
                    .map_err(|e| anyhow!("Failed to open owner index: {}", e))?;
                let indexed = index
                    .get(owner)
                    .map_err(|e| anyhow!("Failed to read owner index: {}", e))?
                    .map(|v| v.value().to_string());
                if indexed.as_deref() == Some(token.as_str()) {
                    index.remove(owner)
                        .map_err(|e| anyhow!("Failed to unindex session: {}", e))?;
                }
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted session: {}", token.short());
        }
        Ok(removed)
    }
}

// ============================================================================
// Link Operations
// ============================================================================

#[async_trait]
impl IdentityStore for LinkingDb {
    async fn commit(
        &self,
        account_id: &AccountId,
        proof: &ExternalIdentityProof,
    ) -> Result<LinkedIdentity, LinkError> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let record;
        {
            let mut links = write_txn.open_table(LINKS)
                .map_err(|e| anyhow!("Failed to open links table: {}", e))?;
            let mut by_external = write_txn.open_table(LINKS_BY_EXTERNAL)
                .map_err(|e| anyhow!("Failed to open external index: {}", e))?;

            let current: Option<LinkedIdentity> = match links
                .get(account_id.as_str())
                .map_err(|e| anyhow!("Failed to get link: {}", e))?
            {
                Some(value) => Some(decode(value.value(), "link")?),
                None => None,
            };
            let owner: Option<AccountId> = match by_external
                .get(proof.external_user_id.as_str())
                .map_err(|e| anyhow!("Failed to get external link: {}", e))?
            {
                Some(value) => Some(AccountId::parse(value.value())?),
                None => None,
            };

            // An Err here drops the transaction uncommitted
            let plan = plan_commit(account_id, proof, current.as_ref(), owner.as_ref())?;

            if let Some(released) = &plan.release_external {
                by_external.remove(released.as_str())
                    .map_err(|e| anyhow!("Failed to release external id: {}", e))?;
            }
            by_external.insert(plan.record.external_user_id.as_str(), account_id.as_str())
                .map_err(|e| anyhow!("Failed to index link: {}", e))?;
            let value = encode(&plan.record, "link")?;
            links.insert(account_id.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert link: {}", e))?;

            record = plan.record;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit link: {}", e))?;

        info!(
            "Linked {} -> {} ({})",
            account_id, record.external_handle, record.external_user_id
        );
        Ok(record)
    }

    async fn lookup(&self, account_id: &AccountId) -> Result<Option<LinkedIdentity>, LinkError> {
        Ok(self.read_link(account_id.as_str())?)
    }

    async fn lookup_by_external(
        &self,
        external_user_id: &str,
    ) -> Result<Option<LinkedIdentity>, LinkError> {
        match self.read_owner_of_external(external_user_id)? {
            Some(account) => Ok(self.read_link(&account)?),
            None => Ok(None),
        }
    }

    async fn count(&self) -> Result<usize, LinkError> {
        Ok(self.list_links()?.len())
    }
}
