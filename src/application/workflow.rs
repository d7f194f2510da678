use crate::application::lifecycle::LoanLifecycle;
use crate::domain::loan::{Loan, LoanId, LoanStatus, RepaymentOutcome};
use crate::domain::money::Amount;
use crate::domain::ports::{
    LedgerStoreRef, PaymentGatewayRef, PushRequest, SmsNotifierRef,
};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::domain::user::{PhoneNumber, UserId};
use crate::error::{LoanError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Retry policy for gateway calls made from inside a workflow. Only
/// `LoanError::Gateway` is retried; everything else short-circuits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Soft, in-memory step status for observability. Never persisted; the
/// durable record of a workflow outcome is the transaction ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowStage {
    ProcessingDisbursement,
    Disbursed,
    DisbursementFailed { reason: String },
    RepaymentRecorded,
}

/// Sequences the multi-step disbursement and repayment processes.
///
/// The orchestrator never owns financial state: every step that changes
/// money or status delegates to `LoanLifecycle`, which enforces the atomic
/// guards. This layer only orders the calls, applies the retry policy and
/// records compensation markers when an external step fails.
pub struct WorkflowOrchestrator {
    store: LedgerStoreRef,
    lifecycle: Arc<LoanLifecycle>,
    gateway: PaymentGatewayRef,
    notifier: SmsNotifierRef,
    retry: RetryPolicy,
    stages: Mutex<HashMap<LoanId, WorkflowStage>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: LedgerStoreRef,
        lifecycle: Arc<LoanLifecycle>,
        gateway: PaymentGatewayRef,
        notifier: SmsNotifierRef,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            lifecycle,
            gateway,
            notifier,
            retry,
            stages: Mutex::new(HashMap::new()),
        }
    }

    /// Current soft status of a loan's workflow, if one has run.
    pub fn workflow_stage(&self, loan_id: &LoanId) -> Option<WorkflowStage> {
        self.stages.lock().unwrap().get(loan_id).cloned()
    }

    fn set_stage(&self, loan_id: LoanId, stage: WorkflowStage) {
        self.stages.lock().unwrap().insert(loan_id, stage);
    }

    /// Queues the disbursement workflow and returns immediately; the
    /// APPROVED -> DISBURSED transition is observed later by status query.
    pub fn dispatch_disbursement(self: &Arc<Self>, loan_id: LoanId) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.run_disbursement(&loan_id).await {
                error!(loan = %loan_id, %err, "disbursement workflow failed");
            }
        });
    }

    /// The disbursement chain: soft status, gateway push (with retry), the
    /// atomic disburse, then best-effort notification and re-scoring.
    ///
    /// Failure before the disburse step compensates: the loan stays APPROVED
    /// and a failed-disbursement marker is recorded so the workflow can be
    /// retried. Failures after it only log.
    pub async fn run_disbursement(&self, loan_id: &LoanId) -> Result<Loan> {
        self.set_stage(*loan_id, WorkflowStage::ProcessingDisbursement);

        let loan = self
            .store
            .loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::not_found("loan"))?;
        if loan.status != LoanStatus::Approved {
            return Err(LoanError::InvalidTransition {
                loan: *loan_id,
                from: loan.status,
                attempted: "disburse",
            });
        }
        let user = self
            .store
            .user(&loan.user_id)
            .await?
            .ok_or_else(|| LoanError::not_found("user"))?;

        let request = PushRequest {
            phone: user.phone_number.clone(),
            amount: loan.amount,
            reference: loan.id.short_ref(),
            description: "Loan disbursement".to_string(),
        };
        let push = self
            .with_retry("initiate_push", || {
                self.gateway.initiate_push(request.clone())
            })
            .await;

        let push = match push {
            Ok(push) => push,
            Err(err) => {
                self.compensate_disbursement(&loan, &err.to_string()).await;
                return Err(err);
            }
        };

        let loan = match self
            .lifecycle
            .disburse(loan_id, Some(push.checkout_request_id.clone()))
            .await
        {
            Ok(loan) => loan,
            Err(err) => {
                // Funds may already be on their way; this divergence is an
                // operational incident, not a silent retry.
                error!(
                    loan = %loan_id,
                    checkout = %push.checkout_request_id,
                    %err,
                    "gateway push accepted but disburse did not commit"
                );
                // A lost race against a concurrent disbursement needs no
                // marker; the other workflow completed the payout.
                if !matches!(err, LoanError::InvalidTransition { .. }) {
                    self.compensate_disbursement(&loan, &err.to_string()).await;
                }
                return Err(err);
            }
        };
        self.set_stage(*loan_id, WorkflowStage::Disbursed);

        let message = format!(
            "Your loan of KES {} has been disbursed to your M-Pesa.",
            loan.amount
        );
        if let Err(err) = self.notifier.send(&user.phone_number, &message).await {
            warn!(loan = %loan_id, %err, "disbursement SMS failed");
        }
        if let Err(err) = self.lifecycle.rescore(&loan.user_id).await {
            warn!(user = %loan.user_id, %err, "credit re-scoring failed");
        }

        info!(loan = %loan_id, "disbursement workflow completed");
        Ok(loan)
    }

    /// Compensation: the loan stays APPROVED; a failed marker makes the
    /// outcome visible on the ledger and keeps the retry point open.
    async fn compensate_disbursement(&self, loan: &Loan, reason: &str) {
        self.set_stage(
            loan.id,
            WorkflowStage::DisbursementFailed {
                reason: reason.to_string(),
            },
        );
        let now = Utc::now();
        let loan_id = loan.id;
        let user_id = loan.user_id;
        let amount = loan.amount;
        let reason = reason.to_string();
        let marker = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    entry.transactions.push(Transaction::failed_disbursement(
                        user_id, loan_id, amount, reason, now,
                    ));
                    Ok(())
                }),
            )
            .await;
        if let Err(err) = marker {
            error!(loan = %loan_id, %err, "failed to record disbursement failure marker");
        }
    }

    /// Initiates a repayment push on the user's phone and appends the
    /// pending repayment row the callback reconciler later settles. Runs in
    /// the synchronous request path, so exactly one gateway attempt.
    pub async fn initiate_repayment(&self, user_id: &UserId, amount: Amount) -> Result<Transaction> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| LoanError::not_found("user"))?;
        let loan = self
            .store
            .user_loans(user_id)
            .await?
            .into_iter()
            .find(|l| l.status == LoanStatus::Disbursed)
            .ok_or_else(|| LoanError::not_found("active loan"))?;

        let push = self
            .gateway
            .initiate_push(PushRequest {
                phone: user.phone_number.clone(),
                amount,
                reference: loan.id.short_ref(),
                description: "Loan repayment".to_string(),
            })
            .await?;

        let now = Utc::now();
        let loan_id = loan.id;
        let uid = *user_id;
        let checkout = push.checkout_request_id.clone();
        let phone = user.phone_number.as_str().to_string();
        let entry = self
            .store
            .mutate(
                user_id,
                Box::new(move |entry| {
                    // The loan may have settled between the read and the push.
                    let loan = entry
                        .loan(&loan_id)
                        .ok_or_else(|| LoanError::not_found("loan"))?;
                    if loan.status != LoanStatus::Disbursed {
                        return Err(LoanError::InvalidTransition {
                            loan: loan_id,
                            from: loan.status,
                            attempted: "repay",
                        });
                    }
                    entry.transactions.push(Transaction::pending_repayment(
                        uid, loan_id, amount, checkout, phone, now,
                    ));
                    Ok(())
                }),
            )
            .await?;

        let tx = entry
            .transactions
            .iter()
            .find(|t| t.checkout_request_id.as_deref() == Some(push.checkout_request_id.as_str()))
            .cloned()
            .ok_or_else(|| LoanError::system("pending repayment committed but missing"))?;
        info!(
            loan = %loan_id,
            checkout = %push.checkout_request_id,
            "repayment push initiated"
        );
        Ok(tx)
    }

    /// The repayment-confirmation chain, invoked by the reconciler on a
    /// successful callback: settle the ledger first, then notification and
    /// re-scoring — concurrent with each other, causally after the ledger
    /// write, each best-effort.
    pub async fn run_repayment_confirmation(
        &self,
        loan_id: &LoanId,
        pending_tx: TransactionId,
        amount: Amount,
        gateway_receipt: String,
        payer_phone: String,
    ) -> Result<RepaymentOutcome> {
        let outcome = self
            .lifecycle
            .settle_push_repayment(
                loan_id,
                pending_tx,
                amount,
                gateway_receipt.clone(),
                Some(payer_phone.clone()),
            )
            .await?;
        self.set_stage(*loan_id, WorkflowStage::RepaymentRecorded);

        let loan = self.store.loan(loan_id).await?;
        let user_id = match &loan {
            Some(loan) => loan.user_id,
            None => return Ok(outcome),
        };
        let message = format!(
            "Payment of KES {} received. Receipt: {}",
            amount, gateway_receipt
        );
        let phone = PhoneNumber::new(payer_phone);
        let (sms, rescore) = tokio::join!(
            self.notifier.send(&phone, &message),
            self.lifecycle.rescore(&user_id),
        );
        if let Err(err) = sms {
            warn!(loan = %loan_id, %err, "repayment SMS failed");
        }
        if let Err(err) = rescore {
            warn!(user = %user_id, %err, "credit re-scoring failed");
        }
        Ok(outcome)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.pow(attempt - 1);
                    warn!(%op, attempt, delay_ms = delay.as_millis() as u64, %err, "retrying gateway call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
