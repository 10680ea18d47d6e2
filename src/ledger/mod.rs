//! Ledger host abstraction
//!
//! The host persists whatever the proposal core writes: one keyed table of
//! proposal rows plus a small key/value state area holding the administrator
//! credential. Every invocation runs inside one `LedgerTxn`; the host
//! serializes transactions, so a guard check and the write it protects can
//! never interleave with a reset.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use crate::error::AppError;
use async_trait::async_trait;

/// Name of the proposal table
pub const PROPOSAL_TABLE: &str = "proposta";

/// State key under which the administrator credential is stored
pub const ADMIN_STATE_KEY: &str = "admin";

/// A raw table row as the host returns it.
///
/// Non-key columns are optional because the host may hand back a malformed
/// row; callers treat any missing column as an absent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRow {
    pub id: String,
    pub payer_tax_id: Option<String>,
    pub payer_accepted: Option<bool>,
    pub beneficiary_accepted: Option<bool>,
    pub paid: Option<bool>,
}

/// Result of an insert-or-replace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
}

/// A ledger host: hands out serialized transactions
#[async_trait]
pub trait LedgerHost: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Open a transaction. Waits until every earlier transaction has ended.
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, AppError>;
}

/// Table and state operations inside one host transaction.
///
/// Nothing is visible to other transactions until `commit`. Dropping the
/// transaction without committing rolls every change back.
#[async_trait]
pub trait LedgerTxn: Send {
    async fn table_exists(&mut self) -> Result<bool, AppError>;

    /// Drop the proposal table. Must succeed when the table is absent.
    async fn drop_table(&mut self) -> Result<(), AppError>;

    async fn create_table(&mut self) -> Result<(), AppError>;

    /// Insert the row, or replace the existing row with the same id.
    async fn upsert_row(&mut self, row: ProposalRow) -> Result<UpsertOutcome, AppError>;

    async fn get_row(&mut self, id: &str) -> Result<Option<ProposalRow>, AppError>;

    async fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), AppError>;

    async fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

fn missing_table() -> AppError {
    AppError::Internal(format!(
        "Table '{}' does not exist; invoke init first",
        PROPOSAL_TABLE
    ))
}
