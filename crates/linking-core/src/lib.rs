//! ============================================================================
//! LINKING-CORE: Wallet <-> Twitter identity linking
//! ============================================================================
//! This crate handles all backend logic for XLink:
//! - One-shot linking sessions bound to a wallet account
//! - Twitter OAuth 2.0 + PKCE delegation and the callback route
//! - The linking state machine tying the two together
//! - Durable session and identity storage via redb
//! ============================================================================

pub mod auth;
pub mod config;
pub mod db;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod types;
pub mod wallet;

// Re-export main types for convenience
pub use types::*;
pub use auth::{CallbackListener, OAuthBridge, TwitterOAuth};
pub use config::LinkingConfig;
pub use db::LinkingDb;
pub use orchestrator::{FlowState, LinkingFlow, LinkingOrchestrator};
pub use session::{LinkingSessionManager, MemorySessionRepository, SessionRepository};
pub use store::{IdentityStore, MemoryIdentityStore};
pub use wallet::{StaticWalletAuthority, WalletAuthority};
