use crate::application::eligibility::{Eligibility, EligibilityEvaluator};
use crate::domain::loan::{Loan, LoanId, LoanQuery, LoanStatus, RepaymentOutcome};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{LedgerEntry, LedgerStoreRef, Page};
use crate::domain::transaction::{
    Transaction, TransactionFilter, TransactionId, TransactionStatus, TransactionType,
};
use crate::domain::user::{CreditScore, PhoneNumber, User, UserId};
use crate::domain::wallet::Wallet;
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

/// Credit awarded on settling a loan in full.
const FULL_REPAYMENT_SCORE_BONUS: i32 = 50;

/// The loan lifecycle engine.
///
/// Owns every status transition and keeps the wallet reconciled with each of
/// them. All status-changing operations run as single atomic units through
/// the ledger store: read current status, validate, apply ledger and status
/// writes together, or fail with no partial effect.
pub struct LoanLifecycle {
    store: LedgerStoreRef,
    interest_rate: Decimal,
    country_prefix: String,
}

impl LoanLifecycle {
    pub fn new(store: LedgerStoreRef, interest_rate: Decimal, country_prefix: String) -> Self {
        Self {
            store,
            interest_rate,
            country_prefix,
        }
    }

    /// Flat-rate 15% with the default dial prefix.
    pub fn with_defaults(store: LedgerStoreRef) -> Self {
        Self::new(store, dec!(0.15), "254".to_string())
    }

    /// Registers a user by phone number, creating the wallet in the same
    /// atomic unit. Idempotent: an already-registered number returns the
    /// existing user.
    pub async fn register_user(&self, phone: &PhoneNumber) -> Result<User> {
        let phone = phone.normalized(&self.country_prefix);
        if let Some(user) = self.store.user_by_phone(&phone).await? {
            return Ok(user);
        }

        let now = Utc::now();
        let user = User::new(phone.clone(), now);
        let wallet = Wallet::new(user.id, now);
        match self.store.create_user(user, wallet).await {
            Ok(user) => {
                info!(user = %user.id, phone = %phone, "registered new user");
                Ok(user)
            }
            // Lost the registration race; someone else inserted the number.
            Err(err) => match self.store.user_by_phone(&phone).await? {
                Some(user) => Ok(user),
                None => Err(err),
            },
        }
    }

    pub async fn find_user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<User>> {
        self.store
            .user_by_phone(&phone.normalized(&self.country_prefix))
            .await
    }

    /// Users are never deleted, only deactivated.
    pub async fn deactivate_user(&self, user_id: &UserId) -> Result<User> {
        let now = Utc::now();
        let entry = self
            .store
            .mutate(
                user_id,
                Box::new(move |entry| {
                    entry.user.is_active = false;
                    entry.user.updated_at = now;
                    Ok(())
                }),
            )
            .await?;
        Ok(entry.user)
    }

    /// Read-only eligibility probe for the web/session surfaces.
    pub async fn check_eligibility(
        &self,
        user_id: &UserId,
        requested: Decimal,
    ) -> Result<Eligibility> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| LoanError::not_found("user"))?;
        let wallet = self
            .store
            .wallet(user_id)
            .await?
            .ok_or_else(|| LoanError::not_found("wallet"))?;
        let loans = self.store.user_loans(user_id).await?;
        EligibilityEvaluator::evaluate(&user, &wallet, &loans, requested)
    }

    /// Creates a loan application. Eligibility is re-evaluated inside the
    /// atomic unit so two concurrent applications cannot both pass the
    /// single-active-loan rule.
    pub async fn apply(
        &self,
        user_id: &UserId,
        requested: Decimal,
        term_days: u32,
        purpose: &str,
    ) -> Result<Loan> {
        let now = Utc::now();
        let rate = self.interest_rate;
        let uid = *user_id;
        let purpose = purpose.to_string();

        let entry = self
            .store
            .mutate(
                user_id,
                Box::new(move |entry| {
                    EligibilityEvaluator::evaluate(
                        &entry.user,
                        &entry.wallet,
                        &entry.loans,
                        requested,
                    )?;
                    let amount = Amount::new(requested)?;
                    let loan = Loan::new(uid, amount, term_days, purpose, rate, now);
                    let tx = Transaction::application(uid, loan.id, amount, now);
                    entry.loans.push(loan);
                    entry.transactions.push(tx);
                    Ok(())
                }),
            )
            .await?;

        let loan = entry
            .active_loan()
            .cloned()
            .ok_or_else(|| LoanError::system("application committed but loan missing"))?;
        info!(loan = %loan.id, user = %uid, amount = %loan.amount, "created loan application");
        Ok(loan)
    }

    async fn owner_of(&self, loan_id: &LoanId) -> Result<UserId> {
        let loan = self
            .store
            .loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::not_found("loan"))?;
        Ok(loan.user_id)
    }

    pub async fn approve(&self, loan_id: &LoanId) -> Result<Loan> {
        let user_id = self.owner_of(loan_id).await?;
        let now = Utc::now();
        let id = *loan_id;

        let entry = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    let loan = entry
                        .loan_mut(&id)
                        .ok_or_else(|| LoanError::not_found("loan"))?;
                    loan.approve(now)
                }),
            )
            .await?;

        let loan = self.committed_loan(&entry, loan_id)?;
        info!(loan = %loan.id, "loan approved");
        Ok(loan)
    }

    /// Rejects a pending application and cancels its application marker.
    pub async fn reject(&self, loan_id: &LoanId) -> Result<Loan> {
        let user_id = self.owner_of(loan_id).await?;
        let now = Utc::now();
        let id = *loan_id;

        let entry = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    let loan = entry
                        .loan_mut(&id)
                        .ok_or_else(|| LoanError::not_found("loan"))?;
                    loan.reject()?;
                    if let Some(tx) = entry.transactions.iter_mut().find(|t| {
                        t.loan_id == Some(id)
                            && t.tx_type == TransactionType::Application
                            && t.status == TransactionStatus::Pending
                    }) {
                        tx.cancel(now)?;
                    }
                    Ok(())
                }),
            )
            .await?;

        self.committed_loan(&entry, loan_id)
    }

    /// Moves an approved loan to `Disbursed` and credits the wallet, all in
    /// one atomic unit. The status guard inside that unit is the sole
    /// safeguard against double disbursement: a second concurrent attempt
    /// fails with `InvalidTransition` and leaves the wallet untouched.
    pub async fn disburse(&self, loan_id: &LoanId, gateway_receipt: Option<String>) -> Result<Loan> {
        let user_id = self.owner_of(loan_id).await?;
        let now = Utc::now();
        let id = *loan_id;

        let entry = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    let (principal, amount_due) = {
                        let loan = entry
                            .loan_mut(&id)
                            .ok_or_else(|| LoanError::not_found("loan"))?;
                        loan.disburse(now)?;
                        (loan.amount, loan.amount_due)
                    };
                    entry.wallet.credit_disbursement(principal, amount_due)?;
                    entry.wallet.updated_at = now;

                    // The application marker is fulfilled by the payout.
                    if let Some(tx) = entry.transactions.iter_mut().find(|t| {
                        t.loan_id == Some(id)
                            && t.tx_type == TransactionType::Application
                            && t.status == TransactionStatus::Pending
                    }) {
                        tx.complete(None, None, now)?;
                    }

                    entry.transactions.push(Transaction::disbursement(
                        entry.user.id,
                        id,
                        principal,
                        gateway_receipt,
                        now,
                    ));
                    Ok(())
                }),
            )
            .await?;

        let loan = self.committed_loan(&entry, loan_id)?;
        info!(loan = %loan.id, amount = %loan.amount, "loan disbursed");
        Ok(loan)
    }

    /// Records a repayment with a receipt already in hand (web/admin path).
    /// Appends a completed repayment row.
    pub async fn record_repayment(
        &self,
        loan_id: &LoanId,
        amount: Amount,
        gateway_receipt: String,
        payer_phone: Option<String>,
    ) -> Result<RepaymentOutcome> {
        self.settle_repayment(loan_id, amount, gateway_receipt, payer_phone, None)
            .await
    }

    /// Records a repayment confirmed by a gateway callback, settling the
    /// pending push row instead of appending a second one.
    pub async fn settle_push_repayment(
        &self,
        loan_id: &LoanId,
        pending_tx: TransactionId,
        amount: Amount,
        gateway_receipt: String,
        payer_phone: Option<String>,
    ) -> Result<RepaymentOutcome> {
        self.settle_repayment(loan_id, amount, gateway_receipt, payer_phone, Some(pending_tx))
            .await
    }

    async fn settle_repayment(
        &self,
        loan_id: &LoanId,
        amount: Amount,
        gateway_receipt: String,
        payer_phone: Option<String>,
        pending_tx: Option<TransactionId>,
    ) -> Result<RepaymentOutcome> {
        let user_id = self.owner_of(loan_id).await?;
        let now = Utc::now();
        let id = *loan_id;

        let entry = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    let (outcome, principal) = {
                        let loan = entry
                            .loan_mut(&id)
                            .ok_or_else(|| LoanError::not_found("loan"))?;
                        (loan.settle(amount)?, loan.amount)
                    };

                    if outcome.fully_repaid {
                        // Forced to zero rather than floor-clamped; correct
                        // only while at most one loan is disbursed at a time.
                        entry.wallet.settle_in_full(principal);
                        entry
                            .user
                            .credit_score
                            .adjust(FULL_REPAYMENT_SCORE_BONUS);
                        entry.user.updated_at = now;
                    } else {
                        entry.wallet.apply_partial_repayment(amount);
                    }
                    entry.wallet.updated_at = now;

                    match pending_tx {
                        Some(tx_id) => {
                            let tx = entry
                                .transaction_mut(&tx_id)
                                .ok_or_else(|| LoanError::not_found("pending transaction"))?;
                            tx.complete(Some(gateway_receipt), payer_phone, now)?;
                        }
                        None => {
                            entry.transactions.push(Transaction::repayment(
                                entry.user.id,
                                id,
                                amount,
                                gateway_receipt,
                                payer_phone,
                                now,
                            ));
                        }
                    }
                    Ok(())
                }),
            )
            .await?;

        let loan = self.committed_loan(&entry, loan_id)?;
        let outcome = RepaymentOutcome {
            fully_repaid: loan.status == LoanStatus::Repaid,
            remaining: loan.amount_due,
        };
        info!(
            loan = %loan.id,
            amount = %amount,
            fully_repaid = outcome.fully_repaid,
            remaining = %outcome.remaining,
            "repayment recorded"
        );
        Ok(outcome)
    }

    /// Marks an overdue disbursed loan as defaulted. Driven by an external
    /// scheduler; wallet balances are untouched.
    pub async fn mark_defaulted(&self, loan_id: &LoanId, now: DateTime<Utc>) -> Result<Loan> {
        let user_id = self.owner_of(loan_id).await?;
        let id = *loan_id;

        let entry = self
            .store
            .mutate(
                &user_id,
                Box::new(move |entry| {
                    let loan = entry
                        .loan_mut(&id)
                        .ok_or_else(|| LoanError::not_found("loan"))?;
                    loan.mark_defaulted(now)
                }),
            )
            .await?;

        let loan = self.committed_loan(&entry, loan_id)?;
        warn!(loan = %loan.id, due = %loan.due_date, "loan marked defaulted");
        Ok(loan)
    }

    /// Batch entry point for the scheduler: defaults every disbursed loan
    /// past its due date. Races with in-flight repayments resolve through the
    /// per-loan atomic guard and are skipped.
    pub async fn sweep_defaults(&self, now: DateTime<Utc>) -> Result<Vec<LoanId>> {
        let overdue = self.store.loans_by_status(LoanStatus::Disbursed).await?;
        let mut defaulted = Vec::new();
        for loan in overdue.into_iter().filter(|l| l.due_date < now) {
            match self.mark_defaulted(&loan.id, now).await {
                Ok(_) => defaulted.push(loan.id),
                Err(LoanError::InvalidTransition { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(defaulted)
    }

    /// Credit re-scoring: raises the borrowable limit toward the tier the
    /// current score earns, net of principal still out in disbursed loans.
    pub async fn rescore(&self, user_id: &UserId) -> Result<CreditScore> {
        let now = Utc::now();
        let entry = self
            .store
            .mutate(
                user_id,
                Box::new(move |entry| {
                    let tied_up: Decimal = entry
                        .loans
                        .iter()
                        .filter(|l| l.status == LoanStatus::Disbursed)
                        .map(|l| l.amount.value())
                        .sum();
                    let target = limit_tier(entry.user.credit_score) - tied_up;
                    entry.wallet.raise_limit(Balance::new(target));
                    entry.wallet.updated_at = now;
                    Ok(())
                }),
            )
            .await?;
        Ok(entry.user.credit_score)
    }

    pub async fn loan(&self, loan_id: &LoanId) -> Result<Option<Loan>> {
        self.store.loan(loan_id).await
    }

    pub async fn user_loans(&self, user_id: &UserId) -> Result<Vec<Loan>> {
        self.store.user_loans(user_id).await
    }

    pub async fn latest_loan(&self, user_id: &UserId) -> Result<Option<Loan>> {
        Ok(self.store.user_loans(user_id).await?.into_iter().next())
    }

    pub async fn wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        self.store.wallet(user_id).await
    }

    /// Paginated, filterable, sortable admin listing.
    pub async fn list_loans(&self, query: &LoanQuery) -> Result<Page<Loan>> {
        self.store.list_loans(query).await
    }

    pub async fn user_transactions(
        &self,
        user_id: &UserId,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>> {
        self.store.user_transactions(user_id, filter).await
    }

    fn committed_loan(&self, entry: &LedgerEntry, loan_id: &LoanId) -> Result<Loan> {
        entry
            .loan(loan_id)
            .cloned()
            .ok_or_else(|| LoanError::system("mutation committed but loan missing"))
    }
}

/// Borrowing capacity earned by a credit score.
fn limit_tier(score: CreditScore) -> Decimal {
    match score.value() {
        ..400 => dec!(5000),
        400..550 => dec!(10000),
        550..700 => dec!(25000),
        _ => dec!(50000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_tier_boundaries() {
        assert_eq!(limit_tier(CreditScore::new(300)), dec!(5000));
        assert_eq!(limit_tier(CreditScore::new(400)), dec!(10000));
        assert_eq!(limit_tier(CreditScore::new(549)), dec!(10000));
        assert_eq!(limit_tier(CreditScore::new(550)), dec!(25000));
        assert_eq!(limit_tier(CreditScore::new(700)), dec!(50000));
        assert_eq!(limit_tier(CreditScore::new(850)), dec!(50000));
    }
}
