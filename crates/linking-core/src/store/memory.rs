//! In-memory identity store. One lock covers both indexes, so every commit
//! is checked and written as a unit.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use super::{plan_commit, IdentityStore};
use crate::types::{AccountId, ExternalIdentityProof, LinkError, LinkedIdentity};

#[derive(Default)]
struct Links {
    by_account: HashMap<AccountId, LinkedIdentity>,
    by_external: HashMap<String, AccountId>,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    links: RwLock<Links>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn commit(
        &self,
        account_id: &AccountId,
        proof: &ExternalIdentityProof,
    ) -> Result<LinkedIdentity, LinkError> {
        let mut links = self.links.write().await;

        let plan = plan_commit(
            account_id,
            proof,
            links.by_account.get(account_id),
            links.by_external.get(&proof.external_user_id),
        )?;

        if let Some(released) = &plan.release_external {
            links.by_external.remove(released);
        }
        links
            .by_external
            .insert(plan.record.external_user_id.clone(), account_id.clone());
        links.by_account.insert(account_id.clone(), plan.record.clone());

        info!(
            "Linked {} -> {} ({})",
            account_id, plan.record.external_handle, plan.record.external_user_id
        );
        Ok(plan.record)
    }

    async fn lookup(&self, account_id: &AccountId) -> Result<Option<LinkedIdentity>, LinkError> {
        Ok(self.links.read().await.by_account.get(account_id).cloned())
    }

    async fn lookup_by_external(
        &self,
        external_user_id: &str,
    ) -> Result<Option<LinkedIdentity>, LinkError> {
        let links = self.links.read().await;
        Ok(links
            .by_external
            .get(external_user_id)
            .and_then(|account| links.by_account.get(account))
            .cloned())
    }

    async fn count(&self) -> Result<usize, LinkError> {
        Ok(self.links.read().await.by_account.len())
    }
}
