//! Proposal mutation protocol
//!
//! Routes invocations by function name, validates arguments, enforces the
//! administrator guard and fires the update notification after a replace.

use crate::error::{invalid_argument, AppError};
use crate::identity::CallerIdentity;
use crate::ledger::UpsertOutcome;
use crate::notify::{NotificationReport, NotificationSink};
use crate::proposal::{Proposal, ProposalStore, Registered, ResetOutcome, QUERY_ARITY};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operations reachable through the invocation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reset,
    Register,
    Query,
}

impl Operation {
    pub fn from_function(function: &str) -> Result<Self, AppError> {
        match function {
            "init" | "reset" => Ok(Operation::Reset),
            "registrarProposta" => Ok(Operation::Register),
            "consultarProposta" => Ok(Operation::Query),
            other => Err(AppError::UnknownOperation(other.to_string())),
        }
    }
}

/// Result of `registrarProposta`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// An existing proposal was replaced and a notification attempted
    Replaced(NotificationReport),
}

/// Raw result of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub payload: Vec<u8>,
    /// Set when the call replaced a proposal and notified the sink
    pub notification: Option<NotificationReport>,
}

impl Invocation {
    fn payload(payload: Vec<u8>) -> Self {
        Self {
            payload,
            notification: None,
        }
    }
}

/// Proposal protocol over a store and a notification sink
pub struct ProposalService {
    store: ProposalStore,
    notifier: Arc<dyn NotificationSink>,
}

impl ProposalService {
    pub fn new(store: ProposalStore, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &ProposalStore {
        &self.store
    }

    /// Single entry point: route `function` to reset, register or query.
    pub async fn invoke(
        &self,
        function: &str,
        args: &[String],
        caller: &CallerIdentity,
    ) -> Result<Invocation, AppError> {
        debug!("invoke is running {}", function);

        match Operation::from_function(function)? {
            Operation::Reset => {
                self.reset(args, caller).await?;
                Ok(Invocation::default())
            }
            Operation::Register => match self.register(args, caller).await? {
                RegisterOutcome::Created => Ok(Invocation::payload(Registered::payload()?)),
                RegisterOutcome::Replaced(report) => Ok(Invocation {
                    payload: Vec::new(),
                    notification: Some(report),
                }),
            },
            Operation::Query => {
                let proposal = self.query(args).await?;
                Ok(Invocation::payload(proposal.to_json_bytes()?))
            }
        }
    }

    /// Read-only entry point; only `consultarProposta` is accepted.
    pub async fn query_entry(&self, function: &str, args: &[String]) -> Result<Vec<u8>, AppError> {
        debug!("query is running {}", function);

        match Operation::from_function(function) {
            Ok(Operation::Query) => self.query(args).await?.to_json_bytes(),
            _ => Err(AppError::UnknownOperation(format!(
                "{} is not available as a query",
                function
            ))),
        }
    }

    /// Recreate the proposal table and capture `caller` as administrator
    pub async fn reset(&self, args: &[String], caller: &CallerIdentity) -> Result<ResetOutcome, AppError> {
        if !args.is_empty() {
            return Err(invalid_argument(format!(
                "Incorrect number of arguments. Expecting 0, got {}",
                args.len()
            )));
        }

        let outcome = self.store.reset(caller).await?;
        info!(
            "Store reset on {} backend (dropped existing: {}, admin [{}])",
            self.store.backend(),
            outcome.dropped_existing,
            outcome.admin_fingerprint
        );
        for warning in &outcome.warnings {
            warn!("Reset warning: {}", warning);
        }
        Ok(outcome)
    }

    /// Register a new proposal or replace an existing one.
    ///
    /// Only the administrator may call this. The guard and the write commit
    /// together; a replace then notifies the sink, and a failed notification
    /// is logged and never undoes the write.
    pub async fn register(&self, args: &[String], caller: &CallerIdentity) -> Result<RegisterOutcome, AppError> {
        let proposal = Proposal::from_args(args)?;

        let outcome = self.store.upsert_as_admin(caller, &proposal).await?;
        debug!(
            "Registered proposal [{}] (payer accepted: {}, beneficiary accepted: {}, paid: {})",
            proposal.id, proposal.payer_accepted, proposal.beneficiary_accepted, proposal.paid
        );

        match outcome {
            UpsertOutcome::Created => {
                info!("Proposal [{}] created", proposal.id);
                Ok(RegisterOutcome::Created)
            }
            UpsertOutcome::Replaced => {
                info!("Proposal [{}] updated; notifying", proposal.id);
                let report = match self.notifier.notify(&proposal).await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!("Update notification for proposal [{}] failed: {}", proposal.id, e);
                        NotificationReport::Failed(e.to_string())
                    }
                };
                Ok(RegisterOutcome::Replaced(report))
            }
        }
    }

    /// Look up a proposal by id
    pub async fn query(&self, args: &[String]) -> Result<Proposal, AppError> {
        if args.len() != QUERY_ARITY {
            return Err(invalid_argument(format!(
                "Incorrect number of arguments. Expecting {}, got {}",
                QUERY_ARITY,
                args.len()
            )));
        }
        let id = &args[0];

        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::ProposalNotFound(id.clone()))
    }
}
