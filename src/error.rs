//! Error taxonomy for hedge trade planning and execution.
//!
//! Validation errors fire before any network call. Once legs are executing,
//! failures are reported but never rolled back automatically; the operator
//! resolves partially-filled state via reconciliation and a retried close.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the planner and orchestrator.
///
/// Every variant renders as a human-readable message naming the offending
/// account where one exists.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HedgeError {
    /// Malformed or missing required fields, caught before any leg runs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Participating accounts report different leverage for the symbol.
    #[error("leverage mismatch: account {account} reports {actual}x, expected {expected}x")]
    LeverageMismatch {
        account: String,
        expected: u32,
        actual: u32,
    },

    /// Requested size exceeds the margin-safe ceiling.
    ///
    /// `ceiling` is the computed maximum, carried for display.
    #[error("insufficient margin{}: max tradable size is {}", .account.as_deref().map(|a| format!(" on account {a}")).unwrap_or_default(), .ceiling)]
    InsufficientMargin {
        account: Option<String>,
        ceiling: Decimal,
    },

    /// No live price is available for the symbol.
    #[error("no price available for {0}")]
    PriceUnavailable(String),

    /// An account referenced by the order has no stored API credentials.
    #[error("no API credentials stored for account {0}")]
    CredentialsMissing(String),

    /// The account's state snapshot could not be fetched; sizing cannot
    /// proceed on stale or absent data.
    #[error("account state unavailable for {0}")]
    StateUnavailable(String),

    /// An opening or closing attempt is already in flight for this order.
    #[error("an attempt is already in flight for order {0}")]
    AttemptInFlight(u64),

    /// The venue rejected one specific leg's order.
    #[error("leg submission failed for account {account}: {reason}")]
    LegSubmissionFailed { account: String, reason: String },

    /// One or more legs of a multi-leg attempt failed while others succeeded.
    #[error("partial failure: {}", .failures.join("; "))]
    PartialFailure { failures: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_messages_name_the_account() {
        let err = HedgeError::InsufficientMargin {
            account: Some("acct-b".to_string()),
            ceiling: dec!(0.123),
        };
        assert_eq!(
            err.to_string(),
            "insufficient margin on account acct-b: max tradable size is 0.123"
        );

        let err = HedgeError::InsufficientMargin {
            account: None,
            ceiling: dec!(1.5),
        };
        assert_eq!(err.to_string(), "insufficient margin: max tradable size is 1.5");

        let err = HedgeError::LegSubmissionFailed {
            account: "main".to_string(),
            reason: "Margin is insufficient".to_string(),
        };
        assert!(err.to_string().contains("main"));
        assert!(err.to_string().contains("Margin is insufficient"));
    }

    #[test]
    fn test_partial_failure_joins_legs() {
        let err = HedgeError::PartialFailure {
            failures: vec!["a: rejected".to_string(), "b: timeout".to_string()],
        };
        assert_eq!(err.to_string(), "partial failure: a: rejected; b: timeout");
    }
}
