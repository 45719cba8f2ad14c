//! Processor-wide error type.
//!
//! Two classes only: `InvalidTransaction` rejects the current transaction and
//! carries the human-readable message returned to the host (all rule
//! violations: insufficient funds, duplicate ids, expired orders, wrong
//! signer, gateway misses, malformed payloads); `InternalError` marks
//! host-communication failures that are retryable and not attributable to
//! user input. There is no panic path in the hot loop.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcError {
    InvalidTransaction(String),
    InternalError(String),
}

impl CcError {
    /// Shorthand for the rejection path.
    pub fn invalid(message: impl Into<String>) -> Self {
        CcError::InvalidTransaction(message.into())
    }

    /// Shorthand for the retryable host-failure path.
    pub fn internal(message: impl Into<String>) -> Self {
        CcError::InternalError(message.into())
    }

    /// The message handed back to the host.
    pub fn message(&self) -> &str {
        match self {
            CcError::InvalidTransaction(m) | CcError::InternalError(m) => m,
        }
    }
}

impl std::fmt::Display for CcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CcError::InvalidTransaction(m) => write!(f, "Invalid transaction: {}", m),
            CcError::InternalError(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for CcError {}

impl From<cc_crypto::KeyError> for CcError {
    fn from(e: cc_crypto::KeyError) -> Self {
        CcError::InvalidTransaction(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_errors_reject_the_transaction() {
        let err: CcError = cc_crypto::KeyError::UnexpectedFormat.into();
        assert_eq!(err, CcError::invalid("Unexpected public key format"));
    }

    #[test]
    fn display_names_the_class() {
        assert_eq!(
            CcError::invalid("Insufficient funds").to_string(),
            "Invalid transaction: Insufficient funds"
        );
        assert_eq!(
            CcError::internal("socket closed").to_string(),
            "Internal error: socket closed"
        );
    }
}
