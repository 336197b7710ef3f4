//! Error types for the redemption protocol.
//!
//! Errors are split by layer: [`StoreError`] is what the row store reports,
//! [`LedgerError`] is what the ledger reports to the session machine. Every
//! ledger error maps to an [`ErrorCategory`] which decides how the voter is
//! told about it.

use std::fmt;

use thiserror::Error;

use crate::store::Table;

/// Failures reported by a [`RowStore`](crate::RowStore) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connectivity or authentication failure. The call may be retried later.
    #[error("row store unavailable: {0}")]
    Unavailable(String),

    /// A write addressed a row that does not exist.
    #[error("row {row} is out of range for table {table}")]
    RowOutOfRange { table: Table, row: usize },

    /// A write addressed a column outside the table layout.
    #[error("column {column} is out of range for table {table}")]
    ColumnOutOfRange { table: Table, column: usize },

    /// The backend answered, but with something we cannot interpret.
    #[error("unexpected response from row store: {0}")]
    Protocol(String),
}

impl StoreError {
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self::Unavailable(reason.to_string())
    }
}

/// Failures reported by the [`CodeLedger`](crate::CodeLedger).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("code {code} is not present in the ledger")]
    NotFound { code: String },

    #[error("code {code} has already been claimed")]
    AlreadyClaimed { code: String },

    #[error("candidate {0:?} is not part of this election")]
    UnknownCandidate(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// The claim is durable but the vote row was never appended.
    #[error("code {code} was claimed at row {row} but the vote was not recorded: {source}")]
    PartialCommit {
        code: String,
        row: usize,
        #[source]
        source: StoreError,
    },
}

/// How a failure is surfaced to the voter and to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input. Reprompt, no state change.
    Validation,
    /// Code absent. Reprompt.
    NotFound,
    /// Code consumed by an earlier claim.
    AlreadyClaimed,
    /// Store unreachable. Retry later, session abandoned.
    StoreUnavailable,
    /// Claim succeeded but vote append failed. Needs manual reconciliation.
    PartialCommit,
}

impl ErrorCategory {
    /// Whether operators have to look at the store by hand.
    pub fn needs_reconciliation(self) -> bool {
        matches!(self, ErrorCategory::PartialCommit)
    }
}

/// Types that can be classified into an [`ErrorCategory`].
pub trait Categorizable {
    fn category(&self) -> ErrorCategory;
}

impl Categorizable for LedgerError {
    fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::NotFound { .. } => ErrorCategory::NotFound,
            LedgerError::AlreadyClaimed { .. } => ErrorCategory::AlreadyClaimed,
            LedgerError::UnknownCandidate(_) => ErrorCategory::Validation,
            LedgerError::StoreUnavailable(_) => ErrorCategory::StoreUnavailable,
            LedgerError::PartialCommit { .. } => ErrorCategory::PartialCommit,
        }
    }
}

/// Invalid election configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read election config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse election config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("election config is invalid: {0}")]
    Invalid(String),
}

/// Failures of the administrative code generation step.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("class roster is empty, nothing to generate")]
    EmptyRoster,

    #[error("failed to rewrite the codes table: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_categories() {
        let unavailable = LedgerError::from(StoreError::unavailable("timeout"));
        assert_eq!(unavailable.category(), ErrorCategory::StoreUnavailable);

        let partial = LedgerError::PartialCommit {
            code: "AB12CD34".into(),
            row: 3,
            source: StoreError::unavailable("reset"),
        };
        assert_eq!(partial.category(), ErrorCategory::PartialCommit);
        assert!(partial.category().needs_reconciliation());

        let used = LedgerError::AlreadyClaimed {
            code: "AB12CD34".into(),
        };
        assert_eq!(used.category(), ErrorCategory::AlreadyClaimed);
        assert!(!used.category().needs_reconciliation());
    }

    #[test]
    fn partial_commit_message_names_code_and_row() {
        let partial = LedgerError::PartialCommit {
            code: "AB12CD34".into(),
            row: 7,
            source: StoreError::unavailable("reset"),
        };
        let message = partial.to_string();
        assert!(message.contains("AB12CD34"));
        assert!(message.contains("row 7"));
    }
}
