//! Client-side input preparation
//!
//! Produces the `(ciphertext, proof)` pair a user submits to a contract:
//!
//! ```rust,ignore
//! let input = InputBinding::new(token_contract, alice)
//!     .seal(&alice_keys, &backend.public_key(), TypeTag::Uint64, U256::from(100))?;
//! let handle = engine.verify_and_ingest(&input.ciphertext, &input.proof, alice, token_contract)?;
//! ```

use rand::RngCore;
use revm::primitives::{B256, U256, keccak256};

use crate::{
    crypto::ClientKeyPair,
    error::BackendError,
    input_verifier::{InputProof, ProofId},
    types::{Principal, TypeTag},
};

/// Ciphertext plus the proof that binds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedInput {
    pub tag: TypeTag,
    pub ciphertext: Vec<u8>,
    /// ABI-encoded [`InputProof`]
    pub proof: Vec<u8>,
    pub proof_id: ProofId,
}

/// The `(contract, user)` pair an input is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBinding {
    pub contract: Principal,
    pub user: Principal,
}

impl InputBinding {
    pub fn new(contract: Principal, user: Principal) -> Self {
        Self { contract, user }
    }

    /// Seal `value` for a coprocessor running the sealed backend
    pub fn seal<K: ClientKeyPair>(
        &self,
        keys: &K,
        coprocessor_public_key: &[u8],
        tag: TypeTag,
        value: U256,
    ) -> Result<SubmittedInput, BackendError> {
        if !tag.fits(value) {
            return Err(BackendError::OutOfRange(tag));
        }
        let ciphertext =
            keys.seal_for_coprocessor(&tag.encode_plaintext(value), coprocessor_public_key)?;
        Ok(self.attest(tag, ciphertext))
    }

    /// Plaintext "ciphertext" understood by the mock backend
    pub fn clear(&self, tag: TypeTag, value: U256) -> Result<SubmittedInput, BackendError> {
        if !tag.fits(value) {
            return Err(BackendError::OutOfRange(tag));
        }
        Ok(self.attest(tag, tag.encode_plaintext(value)))
    }

    /// Bind an already produced ciphertext
    pub fn attest(&self, tag: TypeTag, ciphertext: Vec<u8>) -> SubmittedInput {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        let proof = InputProof {
            contractAddress: self.contract.0,
            userAddress: self.user.0,
            fheType: tag.code(),
            ciphertextDigest: keccak256(&ciphertext),
            salt: B256::from(salt),
        };

        SubmittedInput {
            tag,
            proof_id: proof.id(),
            proof: proof.encode(),
            ciphertext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revm::primitives::address;

    #[test]
    fn test_proofs_are_unique_per_submission() {
        let binding = InputBinding::new(
            Principal(address!("00000000000000000000000000000000000000C0")),
            Principal(address!("0000000000000000000000000000000000000AAA")),
        );

        let a = binding.clear(TypeTag::Uint8, U256::from(7)).unwrap();
        let b = binding.clear(TypeTag::Uint8, U256::from(7)).unwrap();

        assert_eq!(a.ciphertext, b.ciphertext);
        assert_ne!(a.proof_id, b.proof_id);

        let decoded = InputProof::decode(&a.proof).unwrap();
        assert_eq!(decoded.fheType, TypeTag::Uint8.code());
        assert_eq!(decoded.id(), a.proof_id);
    }

    #[test]
    fn test_out_of_range_plaintext() {
        let binding = InputBinding::new(
            Principal(address!("00000000000000000000000000000000000000C0")),
            Principal(address!("0000000000000000000000000000000000000AAA")),
        );
        assert!(binding.clear(TypeTag::Bool, U256::from(2)).is_err());
    }
}
