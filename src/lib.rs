//! fhevm-engine: encrypted value and permission engine
//!
//! A standalone model of FHEVM's handle lifecycle. Contracts and users only
//! ever see opaque 32-byte handles; ciphertexts stay inside the engine, and
//! every use or decryption of a handle is gated by an explicit permission row.
//!
//! - Ciphertext handles are content-derived and never reused
//! - Client inputs are accepted once, bound to one contract and one user
//! - Homomorphic operations mint fresh handles that inherit no permissions
//! - Plaintext leaves only through the decryption gateway
//! - Every call is atomic; grouped calls commit or revert together, also
//!   when driven from an EVM transaction through the executor precompile

/// Ciphertext Access Control List
pub mod acl;

/// Pluggable homomorphic backend and the plaintext mock
pub mod backend;

/// Client-side input sealing and proof construction
pub mod client;

/// TOML configuration
pub mod config;

/// Key pairs and authenticated encryption for the sealed backend
pub mod crypto;

/// Handler that defers transaction commits to the coordinator
pub mod custom_handler;

/// Operation validation and backend delegation
pub mod dispatcher;

/// The engine facade
pub mod engine;

/// Error taxonomy
pub mod error;

/// Executor ABI served to contracts
pub mod executor;

/// Engine checkpoints that follow EVM call frames
pub mod frame_inspector;

/// Decryption and re-encryption
pub mod gateway;

/// Ciphertext handle store
pub mod handle_store;

/// revm host wired to the engine
pub mod host;

/// Input proof verification
pub mod input_verifier;

/// Undo journal for per-call atomicity
pub mod journal;

/// Operation catalogue, type rules and plaintext semantics
pub mod ops;

/// Executor precompile provider
pub mod precompiles;

/// Backend keeping ciphertexts sealed under a coprocessor key
pub mod sealed;

/// Transaction coordinator for atomic EVM + engine transactions
pub mod transaction_coordinator;

/// Handle, type, principal and capability identifiers
pub mod types;

pub use backend::{FheBackend, MockBackend};
pub use engine::FhevmEngine;
pub use error::{BackendError, EngineError};
pub use ops::OpKind;
pub use sealed::SealedBackend;
pub use types::{Capability, HandleId, Principal, TypeTag};
