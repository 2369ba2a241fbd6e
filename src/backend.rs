//! Pluggable homomorphic backend
//!
//! The engine never looks inside a ciphertext. Everything that needs the
//! plaintext (input well-formedness, computation, decryption) goes through
//! [`FheBackend`]. Two implementations ship with the crate:
//!
//! - [`MockBackend`]: payloads are the plaintext itself, for exercising
//!   handle and permission logic without any cryptography
//! - [`SealedBackend`](crate::sealed::SealedBackend): payloads are AEAD-sealed
//!   to a coprocessor key and only opened inside the backend

use crate::{error::BackendError, ops, ops::OpKind, types::TypeTag};
use revm::primitives::U256;

/// One operand as handed to the backend
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    /// Declared type of the operand handle
    pub tag: TypeTag,
    /// Stored ciphertext
    pub ciphertext: &'a [u8],
}

/// Capability surface of a homomorphic backend
///
/// Implementations must be deterministic in the plaintext they produce and
/// follow the overflow and division policies of [`crate::ops`].
pub trait FheBackend: std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Check that `ciphertext` is a well-formed encryption of a `tag` value
    fn validate(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<(), BackendError>;

    /// Encrypt a public plaintext (trivial encryption)
    fn encrypt(&self, tag: TypeTag, value: U256) -> Result<Vec<u8>, BackendError>;

    /// Decrypt a stored ciphertext
    fn decrypt(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<U256, BackendError>;

    /// Run `op` over the operands and return the result ciphertext
    fn compute(
        &self,
        op: OpKind,
        operands: &[Operand<'_>],
        result: TypeTag,
    ) -> Result<Vec<u8>, BackendError>;

    /// Re-encrypt a stored ciphertext under a client public key
    fn reencrypt(
        &self,
        _tag: TypeTag,
        _ciphertext: &[u8],
        _recipient_public_key: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unsupported("re-encryption".to_string()))
    }
}

/// Backend whose ciphertexts are plaintexts in fixed-width big-endian form
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

impl MockBackend {
    fn decode(tag: TypeTag, ciphertext: &[u8]) -> Result<U256, BackendError> {
        tag.decode_plaintext(ciphertext)
            .ok_or_else(|| BackendError::Malformed {
                tag,
                reason: format!("expected {} plaintext bytes in range", tag.byte_len()),
            })
    }
}

impl FheBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn validate(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<(), BackendError> {
        Self::decode(tag, ciphertext).map(|_| ())
    }

    fn encrypt(&self, tag: TypeTag, value: U256) -> Result<Vec<u8>, BackendError> {
        if !tag.fits(value) {
            return Err(BackendError::OutOfRange(tag));
        }
        Ok(tag.encode_plaintext(value))
    }

    fn decrypt(&self, tag: TypeTag, ciphertext: &[u8]) -> Result<U256, BackendError> {
        Self::decode(tag, ciphertext)
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
            .map(|o| Self::decode(o.tag, o.ciphertext))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(result.encode_plaintext(ops::evaluate(op, &tags, &values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_compute_uses_plaintext_arithmetic() {
        let backend = MockBackend;
        let a = backend.encrypt(TypeTag::Uint8, U256::from(250)).unwrap();
        let b = backend.encrypt(TypeTag::Uint8, U256::from(10)).unwrap();

        let sum = backend
            .compute(
                OpKind::Add,
                &[
                    Operand { tag: TypeTag::Uint8, ciphertext: &a },
                    Operand { tag: TypeTag::Uint8, ciphertext: &b },
                ],
                TypeTag::Uint8,
            )
            .unwrap();

        assert_eq!(backend.decrypt(TypeTag::Uint8, &sum).unwrap(), U256::from(4));
    }

    #[test]
    fn test_mock_rejects_malformed_payloads() {
        let backend = MockBackend;
        assert!(backend.validate(TypeTag::Uint32, &[0, 0, 1]).is_err());
        assert!(backend.validate(TypeTag::Bool, &[7]).is_err());
        assert!(backend.encrypt(TypeTag::Uint8, U256::from(256)).is_err());
        assert!(backend.reencrypt(TypeTag::Uint8, &[1], &[0u8; 32]).is_err());
    }
}
