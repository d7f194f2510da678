use crate::domain::money::{Amount, Balance};
use crate::domain::user::UserId;
use crate::error::{LoanError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanId(Uuid);

impl LoanId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short reference shown to end users (USSD and SMS copy).
    pub fn short_ref(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loan lifecycle states.
///
/// Transitions are forward-only: `Pending -> Approved -> Disbursed ->
/// {Repaid, Defaulted}` plus `Pending -> Rejected`. A failed disbursement is
/// not a state of its own; the loan stays `Approved` and the failure is
/// recorded on the transaction ledger so the workflow can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Disbursed,
    Repaid,
    Defaulted,
}

impl LoanStatus {
    /// A user may hold at most one loan in an active status.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Disbursed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Repaid | Self::Defaulted)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Disbursed => "disbursed",
            Self::Repaid => "repaid",
            Self::Defaulted => "defaulted",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a repayment against a disbursed loan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepaymentOutcome {
    pub fully_repaid: bool,
    pub remaining: Balance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: UserId,
    /// Principal requested.
    pub amount: Amount,
    pub term_days: u32,
    /// Flat interest rate, e.g. `0.15`.
    pub interest_rate: Decimal,
    /// Principal plus flat interest remaining to be repaid.
    pub amount_due: Balance,
    pub purpose: String,
    pub status: LoanStatus,
    pub application_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub disbursed_date: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
}

impl Loan {
    pub fn new(
        user_id: UserId,
        amount: Amount,
        term_days: u32,
        purpose: impl Into<String>,
        interest_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let amount_due = Balance::new(amount.value() * (Decimal::ONE + interest_rate));
        Self {
            id: LoanId::new(),
            user_id,
            amount,
            term_days,
            interest_rate,
            amount_due,
            purpose: purpose.into(),
            status: LoanStatus::Pending,
            application_date: now,
            approved_date: None,
            disbursed_date: None,
            due_date: now + Duration::days(i64::from(term_days)),
        }
    }

    fn guard(&self, expected: LoanStatus, attempted: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(LoanError::InvalidTransition {
                loan: self.id,
                from: self.status,
                attempted,
            })
        }
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(LoanStatus::Pending, "approve")?;
        self.status = LoanStatus::Approved;
        self.approved_date = Some(now);
        Ok(())
    }

    pub fn reject(&mut self) -> Result<()> {
        self.guard(LoanStatus::Pending, "reject")?;
        self.status = LoanStatus::Rejected;
        Ok(())
    }

    /// Flips the loan to `Disbursed`. The status guard here is the sole
    /// safeguard against double disbursement; callers must run it inside the
    /// same atomic unit as the wallet writes.
    pub fn disburse(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(LoanStatus::Approved, "disburse")?;
        self.status = LoanStatus::Disbursed;
        self.disbursed_date = Some(now);
        Ok(())
    }

    /// Applies a repayment to the amount due. An overpayment settles the loan
    /// in full; the surplus is not tracked as credit.
    pub fn settle(&mut self, payment: Amount) -> Result<RepaymentOutcome> {
        self.guard(LoanStatus::Disbursed, "repay")?;
        let remaining = self.amount_due - payment.into();
        if remaining <= Balance::ZERO {
            self.status = LoanStatus::Repaid;
            self.amount_due = Balance::ZERO;
            Ok(RepaymentOutcome {
                fully_repaid: true,
                remaining: Balance::ZERO,
            })
        } else {
            self.amount_due = remaining;
            Ok(RepaymentOutcome {
                fully_repaid: false,
                remaining,
            })
        }
    }

    /// Marks an overdue disbursed loan as defaulted. This is a status label
    /// only; wallet balances are untouched and recovery is external.
    pub fn mark_defaulted(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(LoanStatus::Disbursed, "default")?;
        if self.due_date >= now {
            return Err(LoanError::InvalidTransition {
                loan: self.id,
                from: self.status,
                attempted: "default before due date",
            });
        }
        self.status = LoanStatus::Defaulted;
        Ok(())
    }
}

/// Sortable loan fields for the admin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanSortKey {
    #[default]
    ApplicationDate,
    Amount,
    AmountDue,
    TermDays,
    Status,
    DueDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Admin listing query: filter, sort, paginate.
#[derive(Debug, Clone, Default)]
pub struct LoanQuery {
    pub status: Option<LoanStatus>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Free-text match over purpose and borrower phone.
    pub search: Option<String>,
    pub sort_by: LoanSortKey,
    pub sort_direction: SortDirection,
    pub page: usize,
    pub per_page: usize,
}

impl LoanQuery {
    pub fn per_page_or_default(&self) -> usize {
        if self.per_page == 0 { 100 } else { self.per_page }
    }

    pub fn page_or_default(&self) -> usize {
        if self.page == 0 { 1 } else { self.page }
    }
}
