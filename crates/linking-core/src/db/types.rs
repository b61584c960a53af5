//! ============================================================================
//! Database Types - Summary records for the linking database
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counts reported by `LinkingDb::stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_sessions: usize,
    /// Session count per status name ("pending", "verified", ...)
    pub session_counts: HashMap<String, usize>,
    pub total_links: usize,
}
