//! Error taxonomy
//!
//! Every engine call either commits all of its effects or fails with exactly
//! one [`EngineError`]. Nothing is retried internally and no failure is ever
//! reported as a default value.

use crate::{
    ops::OpKind,
    types::{Capability, HandleId, Principal, TypeTag},
};
use revm::primitives::U256;
use thiserror::Error;

/// Failures raised by a pluggable [`FheBackend`](crate::backend::FheBackend)
#[derive(Debug, Error)]
pub enum BackendError {
    /// Ciphertext bytes are not a valid encryption for the declared type
    #[error("malformed {tag} ciphertext: {reason}")]
    Malformed {
        /// Declared type
        tag: TypeTag,
        /// What the backend rejected
        reason: String,
    },

    /// Plaintext does not fit the declared type
    #[error("plaintext does not fit {0}")]
    OutOfRange(TypeTag),

    /// Encrypting a value failed
    #[error("sealing failed: {0}")]
    Seal(String),

    /// Decrypting a stored ciphertext failed
    #[error("opening ciphertext failed: {0}")]
    Open(String),

    /// The backend cannot perform the requested operation
    #[error("{0} is not supported by this backend")]
    Unsupported(String),
}

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed, replayed or binding-mismatched input
    #[error("invalid input proof: {0}")]
    InvalidProof(String),

    /// Reference to a handle that does not exist or was pruned
    #[error("unknown handle {0}")]
    UnknownHandle(HandleId),

    /// Missing USE or DECRYPT grant
    #[error("{principal} lacks {capability} on {handle}")]
    PermissionDenied {
        /// Handle the principal tried to reference
        handle: HandleId,
        /// Principal that was refused
        principal: Principal,
        /// Capability that was missing
        capability: Capability,
    },

    /// Operand tags incompatible with the requested operation
    #[error("type mismatch for {op}: {reason}")]
    TypeMismatch {
        /// Requested operation
        op: OpKind,
        /// Which rule was violated
        reason: String,
    },

    /// Public plaintext wider than the requested encrypted type
    #[error("plaintext {value} does not fit {tag}")]
    PlaintextOutOfRange {
        /// Requested type
        tag: TypeTag,
        /// Rejected plaintext
        value: U256,
    },

    /// The backend could not complete; fatal for the call
    #[error("backend failure: {0}")]
    BackendFailure(#[from] BackendError),
}

/// Result alias used across the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
