//! Coprocessor backend over AEAD-sealed payloads
//!
//! Stands in for a real FHE coprocessor: ciphertexts are sealed to the
//! coprocessor key (see [`crate::crypto`]), opened only inside this backend to
//! compute, and re-sealed before they leave it. Result nonces are derived from
//! the operation and its operand ciphertexts, so recomputing the same
//! operation yields the same bytes.

use crate::{
    backend::{FheBackend, Operand},
    crypto::{CoprocessorKeyPair, CoprocessorKeys},
    error::BackendError,
    ops::{self, OpKind},
    types::TypeTag,
};
use revm::primitives::U256;

const TRIVIAL_DOMAIN: &[u8] = b"fhevm.sealed.trivial";
const COMPUTE_DOMAIN: &[u8] = b"fhevm.sealed.compute";

/// Backend whose payloads are sealed to a coprocessor key pair
#[derive(Debug, Clone)]
pub struct SealedBackend<K: CoprocessorKeyPair = CoprocessorKeys> {
    keys: K,
}

impl<K: CoprocessorKeyPair> Default for SealedBackend<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CoprocessorKeyPair> SealedBackend<K> {
    /// Create a backend with a freshly generated coprocessor key
    pub fn new() -> Self {
        Self { keys: K::generate() }
    }

    /// Create a backend around existing keys
    pub fn with_keys(keys: K) -> Self {
        Self { keys }
    }

    /// Public key clients seal their inputs to
    pub fn public_key(&self) -> Vec<u8> {
        self.keys.public_key_bytes()
    }

    fn open(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<U256, BackendError> {
        let plaintext = self.keys.open(ciphertext).map_err(|e| BackendError::Malformed {
            tag,
            reason: e.to_string(),
        })?;
        tag.decode_plaintext(&plaintext)
            .ok_or_else(|| BackendError::Malformed {
                tag,
                reason: format!("sealed plaintext is not a valid {tag}"),
            })
    }
}

impl<K: CoprocessorKeyPair> FheBackend for SealedBackend<K> {
    fn name(&self) -> &'static str {
        "sealed"
    }

    fn validate(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<(), BackendError> {
        self.open(tag, ciphertext).map(|_| ())
    }

    fn encrypt(&self, tag: TypeTag, value: U256) -> Result<Vec<u8>, BackendError> {
        if !tag.fits(value) {
            return Err(BackendError::OutOfRange(tag));
        }
        let plaintext = tag.encode_plaintext(value);

        let mut seed = TRIVIAL_DOMAIN.to_vec();
        seed.push(tag.code());
        seed.extend_from_slice(&plaintext);
        self.keys.seal_to_self(&plaintext, &seed)
    }

    fn decrypt(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<U256, BackendError> {
        self.open(tag, ciphertext)
    }

    fn compute(
        &self,
        op: OpKind,
        operands: &[Operand<'_>],
        result: TypeTag,
    ) -> Result<Vec<u8>, BackendError> {
        let tags: Vec<TypeTag> = operands.iter().map(|o| o.tag).collect();
        let values = operands
            .iter()
            .map(|o| self.open(o.tag, o.ciphertext))
            .collect::<Result<Vec<_>, _>>()?;
        let plaintext = result.encode_plaintext(ops::evaluate(op, &tags, &values));

        let mut seed = COMPUTE_DOMAIN.to_vec();
        seed.push(op.code());
        seed.push(result.code());
        for operand in operands {
            seed.extend_from_slice(&(operand.ciphertext.len() as u32).to_be_bytes());
            seed.extend_from_slice(operand.ciphertext);
        }
        self.keys.seal_to_self(&plaintext, &seed)
    }

    fn reencrypt(
        &self,
        tag: TypeTag,
        ciphertext: &[u8],
        recipient_public_key: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        let value = self.open(tag, ciphertext)?;
        self.keys
            .seal_for(&tag.encode_plaintext(value), recipient_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ClientKeyPair, ClientKeys};

    #[test]
    fn test_client_input_is_valid_and_computable() {
        let backend: SealedBackend = SealedBackend::new();
        let client = ClientKeys::generate();

        let five = client
            .seal_for_coprocessor(&[5], &backend.public_key())
            .unwrap();
        backend.validate(TypeTag::Uint8, &five).unwrap();
        // Same bytes are not a valid euint16 (wrong width)
        assert!(backend.validate(TypeTag::Uint16, &five).is_err());

        let three = backend.encrypt(TypeTag::Uint8, U256::from(3)).unwrap();
        let operands = [
            Operand { tag: TypeTag::Uint8, ciphertext: &five },
            Operand { tag: TypeTag::Uint8, ciphertext: &three },
        ];
        let product = backend.compute(OpKind::Mul, &operands, TypeTag::Uint8).unwrap();
        let again = backend.compute(OpKind::Mul, &operands, TypeTag::Uint8).unwrap();

        assert_eq!(product, again);
        assert_eq!(
            backend.decrypt(TypeTag::Uint8, &product).unwrap(),
            U256::from(15)
        );
    }

    #[test]
    fn test_foreign_ciphertext_is_malformed() {
        let backend: SealedBackend = SealedBackend::new();
        let other: SealedBackend = SealedBackend::new();

        let sealed = other.encrypt(TypeTag::Bool, U256::from(1)).unwrap();
        assert!(matches!(
            backend.validate(TypeTag::Bool, &sealed),
            Err(BackendError::Malformed { .. })
        ));
    }

    #[test]
    fn test_reencrypt_for_client() {
        let backend: SealedBackend = SealedBackend::new();
        let client = ClientKeys::generate();

        let stored = backend.encrypt(TypeTag::Uint32, U256::from(42)).unwrap();
        let sealed = backend
            .reencrypt(TypeTag::Uint32, &stored, &client.public_key_bytes())
            .unwrap();

        let opened = client.open_from_coprocessor(&sealed).unwrap();
        assert_eq!(
            TypeTag::Uint32.decode_plaintext(&opened),
            Some(U256::from(42))
        );
    }
}
