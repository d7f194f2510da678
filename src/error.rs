use crate::domain::loan::{LoanId, LoanStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoanError>;

/// Error taxonomy for the loan engine.
///
/// `Ineligible` and `InvalidTransition` are expected control-flow outcomes and
/// are returned to the caller for direct user messaging. `Gateway` is
/// retryable and only ever surfaces from the payment boundary. `System` wraps
/// unexpected failures; the in-flight atomic unit is rolled back before it
/// propagates.
#[derive(Error, Debug)]
pub enum LoanError {
    /// Business-rule rejection. The message is surfaced verbatim to the end
    /// user, so its wording is part of the contract.
    #[error("{0}")]
    Ineligible(String),

    /// A transition was attempted from a status that does not permit it.
    /// Signals either a race (second disbursement attempt) or a caller bug.
    #[error("loan {loan} cannot {attempted} from status {from}")]
    InvalidTransition {
        loan: LoanId,
        from: LoanStatus,
        attempted: &'static str,
    },

    #[error("{0} not found")]
    NotFound(String),

    /// External payment system unavailable, timed out or refused the request.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Unexpected persistence or internal failure, surfaced opaquely.
    #[error("internal error: {0}")]
    System(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LoanError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn system(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::System(err.into())
    }

    /// Only gateway failures are worth retrying; everything else is either
    /// expected control flow or a bug.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }
}

impl From<std::io::Error> for LoanError {
    fn from(err: std::io::Error) -> Self {
        Self::System(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::loan::LoanId;

    #[test]
    fn test_retryable_classification() {
        assert!(LoanError::Gateway("timeout".into()).is_retryable());
        assert!(!LoanError::Ineligible("Low credit score".into()).is_retryable());
        assert!(
            !LoanError::InvalidTransition {
                loan: LoanId::new(),
                from: LoanStatus::Repaid,
                attempted: "disburse",
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_ineligible_message_is_verbatim() {
        let err = LoanError::Ineligible("You have an active loan".into());
        assert_eq!(err.to_string(), "You have an active loan");
    }
}
