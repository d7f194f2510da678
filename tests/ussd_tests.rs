mod common;

use common::{Harness, harness, register_scored};
use rust_decimal_macros::dec;
use umoja_loans::domain::user::PhoneNumber;
use umoja_loans::interfaces::ussd::{UssdMenu, UssdRequest};

fn menu(h: &Harness) -> UssdMenu {
    UssdMenu::new(h.lifecycle.clone(), h.workflow.clone())
}

fn request(phone: &str, text: &str) -> UssdRequest {
    UssdRequest {
        session_id: "ATUid_1".to_string(),
        service_code: "*384#".to_string(),
        phone_number: phone.to_string(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_first_contact_registers_user_and_shows_root_menu() {
    let h = harness();
    let menu = menu(&h);

    let response = menu.respond(&request("0712345678", "")).await;
    assert!(!response.terminal);
    assert!(response.message.contains("Welcome to Umoja Loans"));
    assert!(response.message.contains("1. Apply for Loan"));

    // The caller now exists, indexed under the normalized number.
    let user = h
        .lifecycle
        .find_user_by_phone(&PhoneNumber::new("254712345678"))
        .await
        .unwrap();
    assert!(user.is_some());
}

#[tokio::test]
async fn test_identical_paths_reproduce_identical_prompts() {
    let h = harness();
    let menu = menu(&h);

    let first = menu.respond(&request("254712345678", "1")).await;
    let second = menu.respond(&request("254712345678", "1")).await;
    assert_eq!(first, second);

    let first = menu.respond(&request("254712345678", "1*2500")).await;
    let second = menu.respond(&request("254712345678", "1*2500")).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_application_flow_end_to_end() {
    let h = harness();
    register_scored(&h, "254712345678", 500, dec!(5000)).await;
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "1")).await;
    assert_eq!(response.render(), "CON Enter loan amount (KES):");

    let response = menu.respond(&request("254712345678", "1*2500")).await;
    assert!(!response.terminal);
    assert!(response.message.contains("Select purpose"));

    let response = menu.respond(&request("254712345678", "1*2500*2")).await;
    assert!(response.terminal);
    assert!(response.message.contains("Loan application received!"));
    assert!(response.message.contains("Purpose: Business"));
    assert!(response.message.contains("Ref: "));

    let user = h
        .lifecycle
        .find_user_by_phone(&PhoneNumber::new("254712345678"))
        .await
        .unwrap()
        .unwrap();
    let loans = h.lifecycle.user_loans(&user.id).await.unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].purpose, "Business");
}

#[tokio::test]
async fn test_rejection_reason_surfaces_verbatim() {
    let h = harness();
    register_scored(&h, "254712345678", 500, dec!(5000)).await;
    let menu = menu(&h);

    // First application goes through.
    menu.respond(&request("254712345678", "1*1000*2")).await;
    // Second one must carry the exact eligibility wording.
    let response = menu.respond(&request("254712345678", "1*1000*2")).await;
    assert!(response.terminal);
    assert_eq!(
        response.render(),
        "END Application failed: You have an active loan"
    );
}

#[tokio::test]
async fn test_invalid_amount_terminates_session() {
    let h = harness();
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "1*abc")).await;
    assert!(response.terminal);
    assert!(response.message.contains("Invalid amount"));

    let response = menu.respond(&request("254712345678", "1*0*2")).await;
    assert!(response.terminal);
}

#[tokio::test]
async fn test_status_with_and_without_loans() {
    let h = harness();
    register_scored(&h, "254712345678", 500, dec!(5000)).await;
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "2")).await;
    assert_eq!(response.render(), "END No loan applications found.");

    menu.respond(&request("254712345678", "1*1000*1")).await;
    let response = menu.respond(&request("254712345678", "2")).await;
    assert!(response.terminal);
    assert!(response.message.contains("Latest Loan:"));
    assert!(response.message.contains("Status: pending"));
}

#[tokio::test]
async fn test_repayment_flow_sends_push() {
    let h = harness();
    let user = register_scored(&h, "254712345678", 500, dec!(5000)).await;
    let loan = h
        .lifecycle
        .apply(&user.id, dec!(1000), 30, "Business")
        .await
        .unwrap();
    h.lifecycle.approve(&loan.id).await.unwrap();
    h.lifecycle.disburse(&loan.id, None).await.unwrap();
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "3")).await;
    assert_eq!(response.render(), "CON Enter repayment amount (KES):");

    let response = menu.respond(&request("254712345678", "3*500")).await;
    assert!(response.terminal);
    assert!(response.message.contains("Payment request sent"));
    assert_eq!(h.gateway.calls(), 1);
}

#[tokio::test]
async fn test_repayment_without_loan_says_so() {
    let h = harness();
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "3*500")).await;
    assert_eq!(response.render(), "END You have no loan awaiting repayment.");
}

#[tokio::test]
async fn test_history_lists_recent_transactions() {
    let h = harness();
    register_scored(&h, "254712345678", 500, dec!(5000)).await;
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "4")).await;
    assert_eq!(response.render(), "END No transactions found.");

    menu.respond(&request("254712345678", "1*1000*2")).await;
    let response = menu.respond(&request("254712345678", "4")).await;
    assert!(response.terminal);
    assert!(response.message.contains("application"));
}

#[tokio::test]
async fn test_unknown_option_ends_session() {
    let h = harness();
    let menu = menu(&h);

    let response = menu.respond(&request("254712345678", "9")).await;
    assert_eq!(response.render(), "END Invalid option. Please try again.");
}
