//! Proposal storage
//!
//! Owns the proposal table and the administrator credential, both kept by
//! the ledger host.

use crate::error::AppError;
use crate::identity::{AdminCredential, CallerIdentity, IdentityGuard};
use crate::ledger::{LedgerHost, LedgerTxn, UpsertOutcome, ADMIN_STATE_KEY, PROPOSAL_TABLE};
use crate::proposal::Proposal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a reset did. Non-fatal problems are collected in `warnings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    /// The lookup found a table and it was dropped
    pub dropped_existing: bool,
    /// The captured administrator credential is empty
    pub admin_empty: bool,
    pub admin_fingerprint: String,
    pub warnings: Vec<String>,
}

/// Proposal store backed by a ledger host.
///
/// Each public operation runs in one host transaction.
#[derive(Clone)]
pub struct ProposalStore {
    host: Arc<dyn LedgerHost>,
}

impl ProposalStore {
    pub fn new(host: Arc<dyn LedgerHost>) -> Self {
        Self { host }
    }

    pub fn backend(&self) -> &'static str {
        self.host.name()
    }

    /// Drop and recreate the proposal table, then capture `caller` as the
    /// administrator.
    ///
    /// Lookup and drop failures are logged and recorded as warnings; only a
    /// failed create or credential write is returned as `StoreInit`, and
    /// then nothing changes.
    pub async fn reset(&self, caller: &CallerIdentity) -> Result<ResetOutcome, AppError> {
        let mut txn = self.host.begin().await.map_err(|e| {
            AppError::StoreInit(format!("Failed opening ledger transaction: {}", e))
        })?;
        let result = Self::reset_in(txn.as_mut(), caller).await;
        finish(txn, result).await
    }

    async fn reset_in(txn: &mut dyn LedgerTxn, caller: &CallerIdentity) -> Result<ResetOutcome, AppError> {
        let mut warnings = Vec::new();

        debug!("Checking whether table {} exists...", PROPOSAL_TABLE);
        let found = match txn.table_exists().await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!("Failed looking up table {}: {}", PROPOSAL_TABLE, e);
                warnings.push(format!("table lookup failed: {}", e));
                None
            }
        };

        let mut dropped_existing = false;
        // drop is a no-op on an absent table, so an unknown lookup still tries it
        if found != Some(false) {
            match txn.drop_table().await {
                Ok(()) => {
                    dropped_existing = found == Some(true);
                    info!("Table {} dropped", PROPOSAL_TABLE);
                }
                Err(e) => {
                    warn!("Failed dropping table {}: {}", PROPOSAL_TABLE, e);
                    warnings.push(format!("table drop failed: {}", e));
                }
            }
        }

        debug!("Creating table {}...", PROPOSAL_TABLE);
        txn.create_table().await.map_err(|e| {
            AppError::StoreInit(format!("Failed creating table {}: {}", PROPOSAL_TABLE, e))
        })?;
        info!("Table {} created", PROPOSAL_TABLE);

        let credential = IdentityGuard::admin_from_caller(caller);
        if credential.is_empty() {
            warnings.push("administrator credential is empty".to_string());
        }
        set_admin(txn, &credential).await?;

        Ok(ResetOutcome {
            dropped_existing,
            admin_empty: credential.is_empty(),
            admin_fingerprint: credential.fingerprint(),
            warnings,
        })
    }

    /// Insert or replace `proposal` if `caller` is the administrator.
    ///
    /// The credential read, the guard and the write share one transaction,
    /// so a concurrent reset either completes before the check or starts
    /// after the write.
    pub async fn upsert_as_admin(
        &self,
        caller: &CallerIdentity,
        proposal: &Proposal,
    ) -> Result<UpsertOutcome, AppError> {
        let mut txn = self.host.begin().await?;
        let result = Self::upsert_in(txn.as_mut(), caller, proposal).await;
        finish(txn, result).await
    }

    async fn upsert_in(
        txn: &mut dyn LedgerTxn,
        caller: &CallerIdentity,
        proposal: &Proposal,
    ) -> Result<UpsertOutcome, AppError> {
        let admin = admin_credential_in(txn).await?;
        if !IdentityGuard::check_caller(&admin, caller)? {
            return Err(AppError::Unauthorized(
                "The caller is not an administrator".to_string(),
            ));
        }
        txn.upsert_row(proposal.to_row()).await
    }

    /// Read the stored administrator credential
    #[cfg(test)]
    pub async fn admin_credential(&self) -> Result<AdminCredential, AppError> {
        let mut txn = self.host.begin().await?;
        let result = admin_credential_in(txn.as_mut()).await;
        finish(txn, result).await
    }

    /// Look up a proposal. Absent and incomplete rows are both `None`.
    pub async fn get(&self, id: &str) -> Result<Option<Proposal>, AppError> {
        let mut txn = self.host.begin().await?;
        let row = txn.get_row(id).await;
        let Some(row) = finish(txn, row).await? else {
            return Ok(None);
        };
        let proposal = Proposal::from_row(row);
        if proposal.is_none() {
            warn!("Proposal [{}] has an incomplete row; treating as absent", id);
        }
        Ok(proposal)
    }
}

/// Commit on success, roll back on failure
async fn finish<T>(txn: Box<dyn LedgerTxn>, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!("Failed rolling back ledger transaction: {}", rollback);
            }
            Err(e)
        }
    }
}

/// Persist the administrator credential
async fn set_admin(txn: &mut dyn LedgerTxn, credential: &AdminCredential) -> Result<(), AppError> {
    txn.put_state(ADMIN_STATE_KEY, credential.as_bytes())
        .await
        .map_err(|e| {
            AppError::StoreInit(format!("Failed storing administrator credential: {}", e))
        })?;
    info!("Administrator set [{}]", credential.fingerprint());
    Ok(())
}

async fn admin_credential_in(txn: &mut dyn LedgerTxn) -> Result<AdminCredential, AppError> {
    match txn.get_state(ADMIN_STATE_KEY).await {
        Ok(Some(bytes)) => Ok(AdminCredential::from_bytes(bytes)),
        Ok(None) => Err(AppError::IdentityUnavailable(
            "Administrator credential has not been initialized".to_string(),
        )),
        Err(e) => Err(AppError::IdentityUnavailable(format!(
            "Failed fetching admin identity: {}",
            e
        ))),
    }
}
