//! Menu-driven session protocol.
//!
//! A session is stateless between requests: the telephony gateway round-trips
//! the entire navigation history as a `*`-delimited path string, and each
//! request re-derives its menu position from that path alone. `resolve` is
//! the declarative descriptor — a pure mapping from path to screen — kept
//! separate from the text-splitting and the ledger reads so the state machine
//! is independently testable.

use crate::application::lifecycle::LoanLifecycle;
use crate::application::workflow::WorkflowOrchestrator;
use crate::domain::money::Amount;
use crate::domain::transaction::TransactionFilter;
use crate::domain::user::{PhoneNumber, User};
use crate::error::LoanError;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

/// Inbound session request as forwarded by the telephony gateway.
#[derive(Debug, Clone)]
pub struct UssdRequest {
    pub session_id: String,
    pub service_code: String,
    pub phone_number: String,
    /// Full navigation history, `*`-delimited. Empty on first contact.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UssdResponse {
    pub message: String,
    /// `true` terminates the session (`END`), `false` expects more input
    /// (`CON`).
    pub terminal: bool,
}

impl UssdResponse {
    fn prompt(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            terminal: false,
        }
    }

    fn end(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            terminal: true,
        }
    }

    /// Wire form expected by the gateway.
    pub fn render(&self) -> String {
        if self.terminal {
            format!("END {}", self.message)
        } else {
            format!("CON {}", self.message)
        }
    }
}

/// Where a navigation path lands in the menu.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Root,
    ApplyAmount,
    ApplyPurpose { amount: String },
    ApplySubmit { amount: String, purpose: String },
    Status,
    RepayAmount,
    RepaySubmit { amount: String },
    History,
    Invalid,
}

/// The declarative menu descriptor: `(level, prior inputs) -> screen`.
/// Deterministic — identical paths always resolve to the same screen.
pub fn resolve(path: &[&str]) -> Screen {
    match path {
        [] | [""] => Screen::Root,
        ["1"] => Screen::ApplyAmount,
        ["1", amount] => Screen::ApplyPurpose {
            amount: amount.to_string(),
        },
        ["1", amount, purpose] => Screen::ApplySubmit {
            amount: amount.to_string(),
            purpose: purpose.to_string(),
        },
        ["2"] => Screen::Status,
        ["3"] => Screen::RepayAmount,
        ["3", amount] => Screen::RepaySubmit {
            amount: amount.to_string(),
        },
        ["4"] => Screen::History,
        _ => Screen::Invalid,
    }
}

fn purpose_label(choice: &str) -> &'static str {
    match choice {
        "1" => "Emergency",
        "2" => "Business",
        "3" => "Education",
        "4" => "Other",
        _ => "General",
    }
}

const DEFAULT_TERM_DAYS: u32 = 30;

/// Thin adapter translating session paths into lifecycle queries and
/// mutations. Unknown callers are registered (user and wallet in one unit)
/// before routing; any unrecovered error terminates the session with a
/// readable message instead of leaving the gateway waiting.
pub struct UssdMenu {
    lifecycle: Arc<LoanLifecycle>,
    workflow: Arc<WorkflowOrchestrator>,
}

impl UssdMenu {
    pub fn new(lifecycle: Arc<LoanLifecycle>, workflow: Arc<WorkflowOrchestrator>) -> Self {
        Self {
            lifecycle,
            workflow,
        }
    }

    pub async fn respond(&self, request: &UssdRequest) -> UssdResponse {
        let phone = PhoneNumber::new(request.phone_number.clone());
        let user = match self.lifecycle.register_user(&phone).await {
            Ok(user) => user,
            Err(err) => {
                error!(%err, phone = %phone, "session could not resolve user");
                return UssdResponse::end("Service temporarily unavailable. Please try again later.");
            }
        };

        let text = request.text.trim();
        let path: Vec<&str> = if text.is_empty() {
            Vec::new()
        } else {
            text.split('*').collect()
        };

        match resolve(&path) {
            Screen::Root => UssdResponse::prompt(
                "Welcome to Umoja Loans\n1. Apply for Loan\n2. Check Loan Status\n3. Repay Loan\n4. Transaction History",
            ),
            Screen::ApplyAmount => UssdResponse::prompt("Enter loan amount (KES):"),
            Screen::ApplyPurpose { amount } => match parse_amount(&amount) {
                Some(_) => UssdResponse::prompt(
                    "Select purpose:\n1. Emergency\n2. Business\n3. Education\n4. Other",
                ),
                None => UssdResponse::end("Invalid amount. Please try again."),
            },
            Screen::ApplySubmit { amount, purpose } => {
                self.submit_application(&user, &amount, &purpose).await
            }
            Screen::Status => self.loan_status(&user).await,
            Screen::RepayAmount => UssdResponse::prompt("Enter repayment amount (KES):"),
            Screen::RepaySubmit { amount } => self.submit_repayment(&user, &amount).await,
            Screen::History => self.transaction_history(&user).await,
            Screen::Invalid => UssdResponse::end("Invalid option. Please try again."),
        }
    }

    async fn submit_application(&self, user: &User, amount: &str, purpose: &str) -> UssdResponse {
        let Some(amount) = parse_amount(amount) else {
            return UssdResponse::end("Invalid amount. Please try again.");
        };
        let purpose = purpose_label(purpose);

        match self
            .lifecycle
            .apply(&user.id, amount, DEFAULT_TERM_DAYS, purpose)
            .await
        {
            Ok(loan) => UssdResponse::end(format!(
                "Loan application received!\nAmount: KES {}\nPurpose: {}\nRef: {}\nYou will receive an SMS confirmation.",
                loan.amount,
                loan.purpose,
                loan.id.short_ref(),
            )),
            Err(err @ LoanError::Ineligible(_)) => {
                UssdResponse::end(format!("Application failed: {err}"))
            }
            Err(err) => {
                error!(%err, user = %user.id, "loan application failed");
                UssdResponse::end("Application failed. Please try again later.")
            }
        }
    }

    async fn loan_status(&self, user: &User) -> UssdResponse {
        match self.lifecycle.latest_loan(&user.id).await {
            Ok(Some(loan)) => UssdResponse::end(format!(
                "Latest Loan:\nAmount: KES {}\nStatus: {}\nDate: {}",
                loan.amount,
                loan.status,
                loan.application_date.format("%d/%m/%Y"),
            )),
            Ok(None) => UssdResponse::end("No loan applications found."),
            Err(err) => {
                error!(%err, user = %user.id, "loan status lookup failed");
                UssdResponse::end("Service temporarily unavailable. Please try again later.")
            }
        }
    }

    async fn submit_repayment(&self, user: &User, amount: &str) -> UssdResponse {
        let Some(amount) = parse_amount(amount).and_then(|v| Amount::new(v).ok()) else {
            return UssdResponse::end("Invalid amount. Please try again.");
        };

        match self.workflow.initiate_repayment(&user.id, amount).await {
            Ok(_) => UssdResponse::end(
                "Payment request sent to your phone. Authorize it to complete your repayment.",
            ),
            Err(LoanError::NotFound(_)) => {
                UssdResponse::end("You have no loan awaiting repayment.")
            }
            Err(LoanError::Gateway(_)) => UssdResponse::end(
                "Payment service temporarily unavailable. Please try again later.",
            ),
            Err(err) => {
                error!(%err, user = %user.id, "repayment initiation failed");
                UssdResponse::end("Repayment failed. Please try again later.")
            }
        }
    }

    async fn transaction_history(&self, user: &User) -> UssdResponse {
        let filter = TransactionFilter {
            per_page: 3,
            ..TransactionFilter::default()
        };
        match self.lifecycle.user_transactions(&user.id, &filter).await {
            Ok(page) if page.data.is_empty() => UssdResponse::end("No transactions found."),
            Ok(page) => {
                let lines: Vec<String> = page
                    .data
                    .iter()
                    .map(|tx| {
                        format!(
                            "{} {} KES {}",
                            tx.created_at.format("%d/%m"),
                            tx.tx_type,
                            tx.amount,
                        )
                    })
                    .collect();
                UssdResponse::end(format!("Recent transactions:\n{}", lines.join("\n")))
            }
            Err(err) => {
                error!(%err, user = %user.id, "transaction history lookup failed");
                UssdResponse::end("Service temporarily unavailable. Please try again later.")
            }
        }
    }
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|v| *v > Decimal::ZERO)
}
