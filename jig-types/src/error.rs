use thiserror::Error;

use crate::lock::LockType;

/// Errors raised while decoding, encoding or validating shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    // ─── Pointers ────────────────────────────────────────────────────────────
    #[error("invalid pointer: expected 34 bytes, got {len}")]
    InvalidPointer { len: usize },

    #[error("invalid pointer string: {input}")]
    InvalidPointerString { input: String },

    // ─── Locks ───────────────────────────────────────────────────────────────
    #[error("unknown lock type code: {code}")]
    UnknownLockType { code: u8 },

    #[error("invalid lock data for {kind:?}: expected {expected} bytes, got {actual}")]
    InvalidLockData {
        kind: LockType,
        expected: usize,
        actual: usize,
    },

    // ─── Instructions ────────────────────────────────────────────────────────
    #[error("unknown opcode: {code:#04x}")]
    UnknownOpCode { code: u8 },

    // ─── Codec ───────────────────────────────────────────────────────────────
    #[error("encode error: {reason}")]
    Encode { reason: String },

    #[error("decode error: {reason}")]
    Decode { reason: String },

    #[error("invalid abi: {reason}")]
    InvalidAbi { reason: String },

    // ─── Crypto ──────────────────────────────────────────────────────────────
    #[error("invalid signature: signer {signer_index}")]
    InvalidSignature { signer_index: usize },

    #[error("invalid key material")]
    InvalidKeyMaterial,
}

impl TypesError {
    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        TypesError::Encode {
            reason: err.to_string(),
        }
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        TypesError::Decode {
            reason: err.to_string(),
        }
    }
}
