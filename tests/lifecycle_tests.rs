mod common;

use chrono::{Duration, Utc};
use common::{harness, register_scored};
use rust_decimal_macros::dec;
use umoja_loans::domain::loan::LoanStatus;
use umoja_loans::domain::money::{Amount, Balance};
use umoja_loans::domain::transaction::{TransactionStatus, TransactionType};
use umoja_loans::error::LoanError;

#[tokio::test]
async fn test_application_computes_amount_due_and_due_date() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let before = Utc::now();
    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    let after = Utc::now();

    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.amount_due, Balance::new(dec!(1150.00)));
    assert!(loan.due_date >= before + Duration::days(30));
    assert!(loan.due_date <= after + Duration::days(30));

    // An application marker lands in the same atomic unit.
    let txs = h.store.loan_transactions(&loan.id).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].tx_type, TransactionType::Application);
    assert_eq!(txs[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_disbursement_moves_wallet_balances() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    let loan = h.lifecycle.disburse(&loan.id, None).await.unwrap();

    assert_eq!(loan.status, LoanStatus::Disbursed);
    assert!(loan.disbursed_date.is_some());

    let wallet = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet.available_balance, Balance::new(dec!(1000)));
    assert_eq!(wallet.loan_balance, Balance::new(dec!(1150.00)));
    assert_eq!(wallet.current_loan_limit, Balance::new(dec!(4000)));
}

#[tokio::test]
async fn test_second_disbursement_fails_and_leaves_wallet_unchanged() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    let wallet_before = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    let result = h.lifecycle.disburse(&loan.id, None).await;
    assert!(matches!(result, Err(LoanError::InvalidTransition { .. })));

    let wallet_after = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet_before, wallet_after);
}

#[tokio::test]
async fn test_full_repayment_restores_limits_and_bumps_score() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    let outcome = h
        .lifecycle
        .record_repayment(
            &loan.id,
            Amount::new(dec!(1150)).unwrap(),
            "QGH123".to_string(),
            Some("254712345678".to_string()),
        )
        .await
        .unwrap();

    assert!(outcome.fully_repaid);
    assert_eq!(outcome.remaining, Balance::ZERO);

    let loan = h.lifecycle.loan(&loan.id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.amount_due, Balance::ZERO);

    let wallet = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet.loan_balance, Balance::ZERO);
    assert_eq!(wallet.current_loan_limit, Balance::new(dec!(5000)));

    let user = h.store.user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.credit_score.value(), 550);
}

#[tokio::test]
async fn test_partial_repayment_keeps_loan_open() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    let outcome = h
        .lifecycle
        .record_repayment(
            &loan.id,
            Amount::new(dec!(500)).unwrap(),
            "QGH200".to_string(),
            None,
        )
        .await
        .unwrap();

    assert!(!outcome.fully_repaid);
    assert_eq!(outcome.remaining, Balance::new(dec!(650.00)));

    let loan = h.lifecycle.loan(&loan.id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Disbursed);
    assert_eq!(loan.amount_due, Balance::new(dec!(650.00)));

    let wallet = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet.loan_balance, Balance::new(dec!(650.00)));
    // Partial repayment does not restore borrowing capacity.
    assert_eq!(wallet.current_loan_limit, Balance::new(dec!(4000)));

    // Credit only moves on full settlement.
    let user = h.store.user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.credit_score.value(), 500);
}

#[tokio::test]
async fn test_repayment_round_trip_in_installments() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    for (i, payment) in [dec!(400), dec!(400), dec!(350)].iter().enumerate() {
        h.lifecycle
            .record_repayment(
                &loan.id,
                Amount::new(*payment).unwrap(),
                format!("QGH30{i}"),
                None,
            )
            .await
            .unwrap();
    }

    let loan = h.lifecycle.loan(&loan.id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.amount_due, Balance::ZERO);

    let wallet = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet.loan_balance, Balance::ZERO);
    assert_eq!(wallet.current_loan_limit, Balance::new(dec!(5000)));
}

#[tokio::test]
async fn test_second_application_rejected_while_loan_disbursed() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    let err = h
        .lifecycle
        .apply(&user.id, dec!(500), 30, "Emergency")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You have an active loan");

    // No loan row was created.
    assert_eq!(h.lifecycle.user_loans(&user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_active_loan_under_concurrent_applications() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let lifecycle = h.lifecycle.clone();
        let user_id = user.id;
        handles.push(tokio::spawn(async move {
            lifecycle.apply(&user_id, dec!(1000), 30, "Business").await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let active = h
        .lifecycle
        .user_loans(&user.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.status.is_active())
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_credit_score_capped_at_850() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 840, dec!(50000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();
    h.lifecycle
        .record_repayment(
            &loan.id,
            Amount::new(dec!(1150)).unwrap(),
            "QGH400".to_string(),
            None,
        )
        .await
        .unwrap();

    let user = h.store.user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.credit_score.value(), 850);
}

#[tokio::test]
async fn test_amount_over_limit_rejected_verbatim() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let err = h
        .lifecycle
        .apply(&user.id, dec!(6000), 30, "Business")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Amount exceeds loan limit");
}

#[tokio::test]
async fn test_mark_defaulted_requires_overdue_disbursed_loan() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    // Not overdue yet.
    assert!(h.lifecycle.mark_defaulted(&loan.id, Utc::now()).await.is_err());

    let later = Utc::now() + Duration::days(31);
    let wallet_before = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    let defaulted = h.lifecycle.mark_defaulted(&loan.id, later).await.unwrap();
    assert_eq!(defaulted.status, LoanStatus::Defaulted);

    // A default is a status label; balances are untouched.
    let wallet_after = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet_before, wallet_after);
}

#[tokio::test]
async fn test_sweep_defaults_only_overdue_loans() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();

    assert!(h.lifecycle.sweep_defaults(Utc::now()).await.unwrap().is_empty());

    let swept = h
        .lifecycle
        .sweep_defaults(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(swept, vec![loan.id]);
}

#[tokio::test]
async fn test_rejected_application_cancels_marker_and_frees_user() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    let rejected = h.lifecycle.reject(&loan.id).await.unwrap();
    assert_eq!(rejected.status, LoanStatus::Rejected);

    let txs = h.store.loan_transactions(&loan.id).await.unwrap();
    assert_eq!(txs[0].status, TransactionStatus::Cancelled);

    // Terminal status frees the single-active-loan slot.
    assert!(h.lifecycle.apply(&user.id, dec!(800), 30, "Other").await.is_ok());
}

#[tokio::test]
async fn test_deactivation_keeps_the_record() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let deactivated = h.lifecycle.deactivate_user(&user.id).await.unwrap();
    assert!(!deactivated.is_active);

    // The record itself survives.
    let found = h.store.user(&user.id).await.unwrap().unwrap();
    assert!(!found.is_active);
}

#[tokio::test]
async fn test_rescore_raises_limit_after_full_repayment() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;

    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();
    h.lifecycle
        .record_repayment(
            &loan.id,
            Amount::new(dec!(1150)).unwrap(),
            "QGH500".to_string(),
            None,
        )
        .await
        .unwrap();

    // Score is now 550, which earns the 25000 tier.
    let score = h.lifecycle.rescore(&user.id).await.unwrap();
    assert_eq!(score.value(), 550);
    let wallet = h.lifecycle.wallet(&user.id).await.unwrap().unwrap();
    assert_eq!(wallet.current_loan_limit, Balance::new(dec!(25000)));
    assert!(wallet.current_loan_limit <= wallet.total_loan_limit);
}
