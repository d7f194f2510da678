use crate::domain::loan::Loan;
use crate::domain::money::Balance;
use crate::domain::user::{CreditScore, User};
use crate::domain::wallet::Wallet;
use crate::error::{LoanError, Result};
use rust_decimal::Decimal;

/// Positive eligibility decision, carrying the maximum borrowable amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eligibility {
    pub max_amount: Balance,
}

/// Pure decision function over a user/wallet snapshot and a requested amount.
///
/// Rules are evaluated in order and the first failing reason wins. The reason
/// strings are surfaced verbatim to the end user, so their wording is part of
/// the contract.
pub struct EligibilityEvaluator;

impl EligibilityEvaluator {
    pub fn evaluate(
        user: &User,
        wallet: &Wallet,
        loans: &[Loan],
        requested: Decimal,
    ) -> Result<Eligibility> {
        if requested <= Decimal::ZERO {
            return Err(LoanError::Ineligible("Invalid amount".to_string()));
        }
        if requested > wallet.current_loan_limit.value() {
            return Err(LoanError::Ineligible(
                "Amount exceeds loan limit".to_string(),
            ));
        }
        if user.credit_score.value() < CreditScore::MIN {
            return Err(LoanError::Ineligible("Low credit score".to_string()));
        }
        if loans.iter().any(|loan| loan.status.is_active()) {
            return Err(LoanError::Ineligible("You have an active loan".to_string()));
        }
        Ok(Eligibility {
            max_amount: wallet.current_loan_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::Loan;
    use crate::domain::money::Amount;
    use crate::domain::user::PhoneNumber;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot() -> (User, Wallet) {
        let user = User::new(PhoneNumber::new("254712345678"), Utc::now());
        let wallet = Wallet::new(user.id, Utc::now());
        (user, wallet)
    }

    fn active_loan(user: &User) -> Loan {
        Loan::new(
            user.id,
            Amount::new(dec!(1000)).unwrap(),
            30,
            "Business",
            dec!(0.15),
            Utc::now(),
        )
    }

    #[test]
    fn test_eligible_user_gets_current_limit_as_max() {
        let (user, wallet) = snapshot();
        let result = EligibilityEvaluator::evaluate(&user, &wallet, &[], dec!(1000)).unwrap();
        assert_eq!(result.max_amount, Balance::new(dec!(5000)));
    }

    #[test]
    fn test_zero_and_negative_amounts_rejected_first() {
        let (user, wallet) = snapshot();
        // Even with an active loan present, the amount check wins.
        let loans = vec![active_loan(&user)];
        let err = EligibilityEvaluator::evaluate(&user, &wallet, &loans, dec!(0)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid amount");
    }

    #[test]
    fn test_amount_over_limit_rejected() {
        let (user, wallet) = snapshot();
        let err = EligibilityEvaluator::evaluate(&user, &wallet, &[], dec!(5001)).unwrap_err();
        assert_eq!(err.to_string(), "Amount exceeds loan limit");
    }

    #[test]
    fn test_active_loan_rejected_with_contract_wording() {
        let (user, wallet) = snapshot();
        let loans = vec![active_loan(&user)];
        let err = EligibilityEvaluator::evaluate(&user, &wallet, &loans, dec!(1000)).unwrap_err();
        assert_eq!(err.to_string(), "You have an active loan");
    }

    #[test]
    fn test_settled_loans_do_not_block_new_applications() {
        let (user, wallet) = snapshot();
        let mut loan = active_loan(&user);
        loan.approve(Utc::now()).unwrap();
        loan.disburse(Utc::now()).unwrap();
        loan.settle(Amount::new(dec!(1150)).unwrap()).unwrap();

        let loans = vec![loan];
        assert!(EligibilityEvaluator::evaluate(&user, &wallet, &loans, dec!(1000)).is_ok());
    }
}
