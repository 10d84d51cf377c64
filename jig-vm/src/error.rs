use thiserror::Error;

use jig_storage::error::StorageError;
use jig_types::error::TypesError;

/// Errors that abort a transaction.
///
/// Every variant except `InvariantBroken` is an ordinary transaction
/// failure. `InvariantBroken` means the engine itself misbehaved.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    #[error("Authorization error: {reason}")]
    Authorization { reason: String },

    #[error("Marshal error: {reason}")]
    Marshal { reason: String },

    #[error("Resource exhausted: {counter} exceeded {max} hydros")]
    ResourceExhausted { counter: String, max: u64 },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Wasm trap: {reason}")]
    WasmTrap { reason: String },

    #[error("Insufficient funding: provided {provided}, required {required}")]
    InsufficientFunding { provided: u64, required: u64 },

    #[error("Call depth exceeded: {depth} > {max}")]
    CallDepthExceeded { depth: u8, max: u8 },

    #[error("Invalid bytecode: {reason}")]
    InvalidBytecode { reason: String },

    #[error("Compile error: {reason}")]
    CompileError { reason: String },

    #[error("Config error: {reason}")]
    ConfigError { reason: String },

    #[error("Runtime error: {reason}")]
    RuntimeError { reason: String },

    #[error("Invariant broken: {reason}")]
    InvariantBroken { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Types error: {0}")]
    Types(#[from] TypesError),
}

impl ExecError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ExecError::Validation {
            reason: reason.into(),
        }
    }

    pub fn authorization(reason: impl Into<String>) -> Self {
        ExecError::Authorization {
            reason: reason.into(),
        }
    }

    pub fn marshal(reason: impl Into<String>) -> Self {
        ExecError::Marshal {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ExecError::NotFound { what: what.into() }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        ExecError::InvariantBroken {
            reason: reason.into(),
        }
    }

    /// True for engine bugs, false for ordinary transaction failures.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ExecError::InvariantBroken { .. } | ExecError::RuntimeError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_classification() {
        assert!(ExecError::invariant("empty caller stack").is_internal());
        assert!(!ExecError::authorization("locked").is_internal());
        assert!(!ExecError::ResourceExhausted {
            counter: "moved data".into(),
            max: 1
        }
        .is_internal());
    }

    #[test]
    fn test_from_types_error() {
        let err: ExecError = TypesError::UnknownLockType { code: 7 }.into();
        match err {
            ExecError::Types(TypesError::UnknownLockType { code }) => assert_eq!(code, 7),
            other => panic!("unexpected error: {other}"),
        }
    }
}
