use crate::domain::money::{Amount, Balance};
use crate::domain::user::UserId;
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One wallet per user, created atomically with the user.
///
/// Invariants: `current_loan_limit <= total_loan_limit`, `loan_balance >= 0`,
/// and `loan_balance` equals the sum of `amount_due` over the user's
/// DISBURSED loans. Every mutation goes through the ledger store's atomic
/// primitive; the methods here validate before they write so a failed
/// operation leaves the snapshot untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    /// Disbursed funds credited to the user.
    pub available_balance: Balance,
    /// Outstanding amount owed across active loans.
    pub loan_balance: Balance,
    /// Credit ceiling, per user tier.
    pub total_loan_limit: Balance,
    /// Portion of the ceiling currently available to borrow.
    pub current_loan_limit: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            available_balance: Balance::ZERO,
            loan_balance: Balance::ZERO,
            total_loan_limit: Balance::new(dec!(50000)),
            current_loan_limit: Balance::new(dec!(5000)),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies the ledger side of a disbursement: credit the principal to the
    /// available balance, add the full amount due to the loan balance and
    /// consume the principal from the current limit.
    pub fn credit_disbursement(&mut self, principal: Amount, amount_due: Balance) -> Result<()> {
        if self.current_loan_limit < principal.into() {
            return Err(LoanError::Ineligible(
                "Amount exceeds loan limit".to_string(),
            ));
        }
        self.available_balance += principal.into();
        self.loan_balance += amount_due;
        self.current_loan_limit -= principal.into();
        Ok(())
    }

    /// Reduces the outstanding loan balance by a partial repayment.
    pub fn apply_partial_repayment(&mut self, amount: Amount) {
        self.loan_balance -= amount.into();
        if self.loan_balance < Balance::ZERO {
            self.loan_balance = Balance::ZERO;
        }
    }

    /// Settles the wallet on full repayment: the loan balance is forced to
    /// zero (overpayment is not tracked as credit) and the full original
    /// principal's limit is restored, capped at the ceiling.
    pub fn settle_in_full(&mut self, principal: Amount) {
        self.loan_balance = Balance::ZERO;
        self.current_loan_limit += principal.into();
        if self.current_loan_limit > self.total_loan_limit {
            self.current_loan_limit = self.total_loan_limit;
        }
    }

    /// Raises the borrowable portion toward a re-scored target, never above
    /// the ceiling and never downward (limits only grow through repayment
    /// history).
    pub fn raise_limit(&mut self, target: Balance) {
        let capped = if target > self.total_loan_limit {
            self.total_loan_limit
        } else {
            target
        };
        if capped > self.current_loan_limit {
            self.current_loan_limit = capped;
        }
    }
}
