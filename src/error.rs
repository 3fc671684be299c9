use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors surfaced by the linkability engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller input that can never succeed. Names the offending field.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The transaction is not in the ledger at all.
    #[error("transaction {txid} not found")]
    NotFound { txid: String },

    /// The ledger collaborator failed. Not retried here.
    #[error("ledger query failed: {0}")]
    Upstream(#[from] LedgerError),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(txid: &str) -> Self {
        EngineError::NotFound {
            txid: txid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_names_field() {
        let err = EngineError::validation("limit", "must be between 1 and 20");
        assert_eq!(err.to_string(), "invalid limit: must be between 1 and 20");
    }

    #[test]
    fn upstream_wraps_ledger_error() {
        let err: EngineError = LedgerError::Unavailable("connection reset".into()).into();
        assert!(matches!(err, EngineError::Upstream(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
