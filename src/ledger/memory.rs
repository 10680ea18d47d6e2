//! In-memory ledger host
//!
//! Table and state sit behind a single lock. A transaction owns the write
//! half of that lock until it ends, so transactions run one at a time.

use super::{missing_table, LedgerHost, LedgerTxn, ProposalRow, UpsertOutcome};
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

type Table = HashMap<String, ProposalRow>;

#[derive(Default)]
struct MemoryState {
    /// `None` until the table has been created
    table: Option<Table>,
    state: HashMap<String, Vec<u8>>,
}

/// In-memory ledger host
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<RwLock<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in the proposal table
    #[cfg(test)]
    pub async fn row_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.table.as_ref().map_or(0, HashMap::len)
    }

    /// Write a row verbatim, bypassing the upsert path
    #[cfg(test)]
    pub async fn insert_raw(&self, row: ProposalRow) {
        let mut inner = self.inner.write().await;
        inner
            .table
            .get_or_insert_with(HashMap::new)
            .insert(row.id.clone(), row);
    }
}

#[async_trait]
impl LedgerHost for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, AppError> {
        let guard = self.inner.clone().write_owned().await;
        Ok(Box::new(MemoryTxn {
            guard,
            undo: Vec::new(),
        }))
    }
}

/// How to reverse one applied change
enum Undo {
    Table(Option<Table>),
    Row { id: String, previous: Option<ProposalRow> },
    State { key: String, previous: Option<Vec<u8>> },
}

/// Changes apply in place; the undo log restores them unless committed.
struct MemoryTxn {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    undo: Vec<Undo>,
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn table_exists(&mut self) -> Result<bool, AppError> {
        Ok(self.guard.table.is_some())
    }

    async fn drop_table(&mut self) -> Result<(), AppError> {
        let previous = self.guard.table.take();
        if let Some(table) = &previous {
            debug!("Dropped in-memory table with {} rows", table.len());
        }
        self.undo.push(Undo::Table(previous));
        Ok(())
    }

    async fn create_table(&mut self) -> Result<(), AppError> {
        let previous = self.guard.table.replace(HashMap::new());
        self.undo.push(Undo::Table(previous));
        Ok(())
    }

    async fn upsert_row(&mut self, row: ProposalRow) -> Result<UpsertOutcome, AppError> {
        let table = self.guard.table.as_mut().ok_or_else(missing_table)?;
        let id = row.id.clone();
        let previous = table.insert(id.clone(), row);
        let outcome = if previous.is_none() {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Replaced
        };
        self.undo.push(Undo::Row { id, previous });
        Ok(outcome)
    }

    async fn get_row(&mut self, id: &str) -> Result<Option<ProposalRow>, AppError> {
        let table = self.guard.table.as_ref().ok_or_else(missing_table)?;
        Ok(table.get(id).cloned())
    }

    async fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), AppError> {
        let previous = self.guard.state.insert(key.to_string(), value.to_vec());
        self.undo.push(Undo::State {
            key: key.to_string(),
            previous,
        });
        Ok(())
    }

    async fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        Ok(self.guard.state.get(key).cloned())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let mut txn = self;
        txn.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        // the undo log is replayed on drop
        Ok(())
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!("Rolling back {} uncommitted change(s)", self.undo.len());
        }
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Table(previous) => self.guard.table = previous,
                Undo::Row { id, previous } => {
                    if let Some(table) = self.guard.table.as_mut() {
                        match previous {
                            Some(row) => table.insert(id, row),
                            None => table.remove(&id),
                        };
                    }
                }
                Undo::State { key, previous } => {
                    match previous {
                        Some(value) => self.guard.state.insert(key, value),
                        None => self.guard.state.remove(&key),
                    };
                }
            }
        }
    }
}
