//! Input proof verification
//!
//! A client submits a ciphertext together with an [`InputProof`] binding it
//! to one `(contract, user)` pair. The verifier checks the binding against the
//! call context, the ciphertext digest, the size limit, single use, and the
//! backend's well-formedness rules. It never grants permissions.
//!
//! Verification is split from consumption so the engine can run every check
//! before it mutates anything.

use alloy_sol_types::{SolValue, sol};
use revm::primitives::{B256, keccak256};
use std::collections::HashSet;
use tracing::warn;

use crate::{
    backend::FheBackend,
    error::{EngineError, Result},
    types::{Principal, TypeTag},
};

sol! {
    /// Attestation that a ciphertext was produced for one contract and user
    #[derive(Debug, PartialEq, Eq)]
    struct InputProof {
        address contractAddress;
        address userAddress;
        uint8 fheType;
        bytes32 ciphertextDigest;
        bytes32 salt;
    }
}

/// Identity of a proof in the consumed set
pub type ProofId = B256;

impl InputProof {
    /// ABI-encoded proof bytes as submitted on chain
    pub fn encode(&self) -> Vec<u8> {
        self.abi_encode()
    }

    /// Parse submitted proof bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        <Self as SolValue>::abi_decode(bytes)
            .map_err(|e| EngineError::InvalidProof(format!("undecodable proof: {e}")))
    }

    /// Single-use identifier
    pub fn id(&self) -> ProofId {
        keccak256(self.abi_encode())
    }
}

/// Outcome of a successful verification, ready to be ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedInput {
    pub proof_id: ProofId,
    pub tag: TypeTag,
}

/// Validates input proofs and remembers which ones were consumed
#[derive(Debug)]
pub struct InputVerifier {
    /// Only grows; replay protection outlives the handles it produced
    consumed: HashSet<ProofId>,
    max_ciphertext_bytes: usize,
}

impl InputVerifier {
    pub fn new(max_ciphertext_bytes: usize) -> Self {
        Self {
            consumed: HashSet::new(),
            max_ciphertext_bytes,
        }
    }

    /// Run every check without mutating state
    pub fn verify<B: FheBackend>(
        &self,
        backend: &B,
        ciphertext: &[u8],
        proof: &[u8],
        submitter: Principal,
        contract: Principal,
    ) -> Result<VerifiedInput> {
        let proof = InputProof::decode(proof)?;
        let proof_id = proof.id();

        let reject = |reason: String| {
            warn!(%proof_id, %submitter, %contract, %reason, "rejected input proof");
            Err(EngineError::InvalidProof(reason))
        };

        if proof.contractAddress != contract.0 {
            return reject(format!(
                "proof bound to contract {}, called from {}",
                proof.contractAddress, contract
            ));
        }
        if proof.userAddress != submitter.0 {
            return reject(format!(
                "proof bound to user {}, submitted by {}",
                proof.userAddress, submitter
            ));
        }
        if self.consumed.contains(&proof_id) {
            return reject("proof already consumed".to_string());
        }
        if ciphertext.len() > self.max_ciphertext_bytes {
            return reject(format!(
                "ciphertext of {} bytes exceeds limit of {}",
                ciphertext.len(),
                self.max_ciphertext_bytes
            ));
        }
        if proof.ciphertextDigest != keccak256(ciphertext) {
            return reject("ciphertext digest mismatch".to_string());
        }
        let Some(tag) = TypeTag::from_code(proof.fheType) else {
            return reject(format!("unknown type code {}", proof.fheType));
        };
        if let Err(e) = backend.validate(tag, ciphertext) {
            return reject(e.to_string());
        }

        Ok(VerifiedInput { proof_id, tag })
    }

    /// Whether a proof was already used
    pub fn is_consumed(&self, proof_id: &ProofId) -> bool {
        self.consumed.contains(proof_id)
    }

    /// Mark a proof as used. Returns false if it already was.
    pub(crate) fn consume(&mut self, proof_id: ProofId) -> bool {
        self.consumed.insert(proof_id)
    }

    /// Undo a consumption during a journal revert
    pub(crate) fn unconsume(&mut self, proof_id: &ProofId) {
        self.consumed.remove(proof_id);
    }

    /// Number of proofs consumed so far
    pub fn consumed_len(&self) -> usize {
        self.consumed.len()
    }
}
