//! ============================================================================
//! Wallet Authority - Who is calling?
//! ============================================================================
//! The linking core never touches wallet keys. It only asks the wallet
//! authority for the currently signed-in account.
//! ============================================================================

use async_trait::async_trait;

use crate::types::AccountId;

/// Source of the caller's wallet identity
#[async_trait]
pub trait WalletAuthority: Send + Sync {
    /// Currently signed-in account, or None if there is no wallet session
    async fn current_account_id(&self) -> Option<AccountId>;
}

/// Wallet authority with a fixed (possibly absent) account.
/// Used by the CLI, where the operator configures the account up front.
#[derive(Debug, Clone, Default)]
pub struct StaticWalletAuthority {
    account_id: Option<AccountId>,
}

impl StaticWalletAuthority {
    pub fn new(account_id: Option<AccountId>) -> Self {
        Self { account_id }
    }

    pub fn signed_in(account_id: AccountId) -> Self {
        Self::new(Some(account_id))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl WalletAuthority for StaticWalletAuthority {
    async fn current_account_id(&self) -> Option<AccountId> {
        self.account_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_authority() {
        let alice = AccountId::parse("alice.near").unwrap();
        let wallet = StaticWalletAuthority::signed_in(alice.clone());
        assert_eq!(wallet.current_account_id().await, Some(alice));

        assert_eq!(StaticWalletAuthority::signed_out().current_account_id().await, None);
    }
}
