//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::proposal::ProposalService;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Register/query protocol over the configured ledger host
    pub proposals: ProposalService,
}

impl AppState {
    pub fn new(proposals: ProposalService) -> Self {
        Self { proposals }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
