use crate::domain::loan::LoanId;
use crate::domain::money::Amount;
use crate::domain::user::UserId;
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Application,
    Disbursement,
    Repayment,
    Fee,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Application => "application",
            Self::Disbursement => "disbursement",
            Self::Repayment => "repayment",
            Self::Fee => "fee",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Append-only ledger entry.
///
/// A row never mutates after reaching `Completed` or `Failed`; corrections
/// are new entries. The only permitted in-place change is moving out of
/// `Pending`, which can happen exactly once — the reconciler's idempotency
/// rests on that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub loan_id: Option<LoanId>,
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub status: TransactionStatus,
    /// The external payment system's unique reference for a completed money
    /// movement; globally unique when present.
    pub gateway_receipt: Option<String>,
    pub payer_phone: Option<String>,
    /// Correlates an in-flight push-payment request to its eventual callback.
    pub checkout_request_id: Option<String>,
    pub description: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn base(
        user_id: UserId,
        loan_id: Option<LoanId>,
        tx_type: TransactionType,
        amount: Amount,
        status: TransactionStatus,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            loan_id,
            tx_type,
            amount,
            status,
            gateway_receipt: None,
            payer_phone: None,
            checkout_request_id: None,
            description,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Pending marker appended together with a new loan application.
    pub fn application(
        user_id: UserId,
        loan_id: LoanId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(
            user_id,
            Some(loan_id),
            TransactionType::Application,
            amount,
            TransactionStatus::Pending,
            format!("Loan application of KES {}", amount.value()),
            now,
        )
    }

    /// Completed disbursement row, written in the same atomic unit as the
    /// status flip and wallet credit.
    pub fn disbursement(
        user_id: UserId,
        loan_id: LoanId,
        amount: Amount,
        gateway_receipt: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::base(
            user_id,
            Some(loan_id),
            TransactionType::Disbursement,
            amount,
            TransactionStatus::Completed,
            format!("Loan disbursement of KES {}", amount.value()),
            now,
        );
        tx.gateway_receipt = gateway_receipt;
        tx.completed_at = Some(now);
        tx
    }

    /// Failed-disbursement marker: records the compensation so the workflow
    /// can be retried while the loan stays approved.
    pub fn failed_disbursement(
        user_id: UserId,
        loan_id: LoanId,
        amount: Amount,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::base(
            user_id,
            Some(loan_id),
            TransactionType::Disbursement,
            amount,
            TransactionStatus::Failed,
            format!("Loan disbursement of KES {}", amount.value()),
            now,
        );
        tx.error_message = Some(reason.into());
        tx
    }

    /// Pending repayment created when a push payment is initiated; the
    /// callback reconciler later settles or fails it by `checkout_request_id`.
    pub fn pending_repayment(
        user_id: UserId,
        loan_id: LoanId,
        amount: Amount,
        checkout_request_id: String,
        payer_phone: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::base(
            user_id,
            Some(loan_id),
            TransactionType::Repayment,
            amount,
            TransactionStatus::Pending,
            "Loan repayment via M-Pesa".to_string(),
            now,
        );
        tx.checkout_request_id = Some(checkout_request_id);
        tx.payer_phone = Some(payer_phone);
        tx
    }

    /// Completed repayment row for the direct path (receipt already in hand).
    pub fn repayment(
        user_id: UserId,
        loan_id: LoanId,
        amount: Amount,
        gateway_receipt: String,
        payer_phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::base(
            user_id,
            Some(loan_id),
            TransactionType::Repayment,
            amount,
            TransactionStatus::Completed,
            "Loan repayment via M-Pesa".to_string(),
            now,
        );
        tx.gateway_receipt = Some(gateway_receipt);
        tx.payer_phone = payer_phone;
        tx.completed_at = Some(now);
        tx
    }

    fn guard_pending(&self, attempted: &str) -> Result<()> {
        if self.status == TransactionStatus::Pending {
            Ok(())
        } else {
            Err(LoanError::system(format!(
                "transaction {} already settled, cannot {attempted}",
                self.id
            )))
        }
    }

    /// Settles a pending row, attaching the gateway's receipt when the
    /// movement came through the payment system. Fails if the row has
    /// already moved out of `Pending`.
    pub fn complete(
        &mut self,
        gateway_receipt: Option<String>,
        payer_phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.guard_pending("complete")?;
        self.status = TransactionStatus::Completed;
        if gateway_receipt.is_some() {
            self.gateway_receipt = gateway_receipt;
        }
        if payer_phone.is_some() {
            self.payer_phone = payer_phone;
        }
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.guard_pending("fail")?;
        self.status = TransactionStatus::Failed;
        self.error_message = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard_pending("cancel")?;
        self.status = TransactionStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}

/// Filter for the transaction history surfaces.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub page: usize,
    pub per_page: usize,
}
