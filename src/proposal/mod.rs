//! Proposal module - the heart of the ledger
//!
//! Handles boleto proposals: the record model, the admin-gated store and
//! the register/query protocol.

mod models;
mod service;
mod store;

pub use models::*;
pub use service::ProposalService;
pub use store::{ProposalStore, ResetOutcome};
