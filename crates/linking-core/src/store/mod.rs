//! ============================================================================
//! Identity Store - Committed wallet <-> Twitter bindings
//! ============================================================================
//! The store is the trusted authority for links. `commit` is atomic and
//! keeps the mapping injective both ways:
//! - one external user id belongs to at most one account
//! - one account holds at most one external user id (relinking replaces the
//!   prior record and releases the old external id in the same write)
//! ============================================================================

mod memory;

pub use memory::MemoryIdentityStore;

use async_trait::async_trait;

use crate::types::{AccountId, ExternalIdentityProof, LinkError, LinkedIdentity};

/// Persistent account -> external identity mapping
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Atomically check uniqueness and write the link.
    /// Fails with `AlreadyLinked` if the external id belongs to another account.
    async fn commit(
        &self,
        account_id: &AccountId,
        proof: &ExternalIdentityProof,
    ) -> Result<LinkedIdentity, LinkError>;

    async fn lookup(&self, account_id: &AccountId) -> Result<Option<LinkedIdentity>, LinkError>;

    /// Reverse view: which account holds this external user id
    async fn lookup_by_external(
        &self,
        external_user_id: &str,
    ) -> Result<Option<LinkedIdentity>, LinkError>;

    async fn is_linked(&self, account_id: &AccountId) -> Result<bool, LinkError> {
        Ok(self.lookup(account_id).await?.is_some())
    }

    async fn count(&self) -> Result<usize, LinkError>;
}

/// Outcome of the uniqueness check, applied by each backend inside its own
/// lock or write transaction
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommitPlan {
    pub record: LinkedIdentity,
    /// External id previously held by this account that must be released
    pub release_external: Option<String>,
}

/// Decide what a commit writes, given the current state of both indexes
pub(crate) fn plan_commit(
    account_id: &AccountId,
    proof: &ExternalIdentityProof,
    current_for_account: Option<&LinkedIdentity>,
    current_owner_of_external: Option<&AccountId>,
) -> Result<CommitPlan, LinkError> {
    if let Some(owner) = current_owner_of_external {
        if owner != account_id {
            return Err(LinkError::AlreadyLinked(format!(
                "{} ({}) is linked to another account",
                proof.external_handle, proof.external_user_id
            )));
        }
    }

    let release_external = current_for_account
        .map(|prev| prev.external_user_id.clone())
        .filter(|prev_id| prev_id != &proof.external_user_id);

    Ok(CommitPlan {
        record: LinkedIdentity {
            account_id: account_id.clone(),
            external_handle: proof.external_handle.clone(),
            external_user_id: proof.external_user_id.clone(),
            linked_at: chrono::Utc::now().timestamp(),
        },
        release_external,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(id: &str, handle: &str) -> ExternalIdentityProof {
        ExternalIdentityProof {
            external_user_id: id.to_string(),
            external_handle: handle.to_string(),
            display_name: None,
            verified_at: 0,
        }
    }

    #[test]
    fn test_plan_fresh_link() {
        let alice = AccountId::parse("alice.near").unwrap();
        let plan = plan_commit(&alice, &proof("123", "@alice"), None, None).unwrap();
        assert_eq!(plan.record.external_user_id, "123");
        assert_eq!(plan.release_external, None);
    }

    #[test]
    fn test_plan_rejects_foreign_owner() {
        let alice = AccountId::parse("alice.near").unwrap();
        let bob = AccountId::parse("bob.near").unwrap();
        let result = plan_commit(&bob, &proof("123", "@alice"), None, Some(&alice));
        assert!(matches!(result, Err(LinkError::AlreadyLinked(_))));
    }

    #[test]
    fn test_plan_relink_releases_previous() {
        let alice = AccountId::parse("alice.near").unwrap();
        let current = plan_commit(&alice, &proof("123", "@alice"), None, None)
            .unwrap()
            .record;

        let relink = plan_commit(&alice, &proof("456", "@alice2"), Some(&current), None).unwrap();
        assert_eq!(relink.release_external.as_deref(), Some("123"));

        // Same external id again (handle rename) releases nothing
        let refresh =
            plan_commit(&alice, &proof("123", "@alice_new"), Some(&current), Some(&alice)).unwrap();
        assert_eq!(refresh.release_external, None);
        assert_eq!(refresh.record.external_handle, "@alice_new");
    }
}
