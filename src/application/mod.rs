//! Application layer: the loan lifecycle engine and the asynchronous
//! processes around it.
//!
//! `LoanLifecycle` owns every status transition and routes all money movement
//! through the ledger store's atomic primitive. `WorkflowOrchestrator`
//! sequences the multi-step disbursement/repayment processes and
//! `CallbackReconciler` feeds gateway notifications back into the same
//! settle path.

pub mod eligibility;
pub mod lifecycle;
pub mod reconciler;
pub mod workflow;
