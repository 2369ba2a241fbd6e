//! Identifiers shared by every engine component
//!
//! - `TypeTag`: declared encrypted type of a handle (`ebool`, `euint8`, ..., `eaddress`)
//! - `HandleId`: opaque 32-byte reference to one ciphertext
//! - `Principal`: contract or user account identity
//! - `Capability`: a right a principal holds over a handle

use revm::primitives::{Address, B256, U256};
use std::fmt;

/// Version byte stored in the last byte of every handle id
pub const HANDLE_VERSION: u8 = 0;

/// Declared encrypted type of a handle
///
/// The wire codes follow FHEVM's type numbering so handles minted here carry
/// the same type byte a Solidity contract would expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeTag {
    /// Encrypted boolean
    Bool,
    /// Encrypted 8-bit unsigned integer
    Uint8,
    /// Encrypted 16-bit unsigned integer
    Uint16,
    /// Encrypted 32-bit unsigned integer
    Uint32,
    /// Encrypted 64-bit unsigned integer
    Uint64,
    /// Encrypted 160-bit account address
    Address,
}

impl TypeTag {
    /// Every supported tag, narrowest first
    pub const ALL: [TypeTag; 6] = [
        TypeTag::Bool,
        TypeTag::Uint8,
        TypeTag::Uint16,
        TypeTag::Uint32,
        TypeTag::Uint64,
        TypeTag::Address,
    ];

    /// Number of plaintext bits
    pub const fn bits(self) -> usize {
        match self {
            TypeTag::Bool => 1,
            TypeTag::Uint8 => 8,
            TypeTag::Uint16 => 16,
            TypeTag::Uint32 => 32,
            TypeTag::Uint64 => 64,
            TypeTag::Address => 160,
        }
    }

    /// Length of the big-endian plaintext encoding
    pub const fn byte_len(self) -> usize {
        match self {
            TypeTag::Bool => 1,
            other => other.bits() / 8,
        }
    }

    /// One-byte wire code
    pub const fn code(self) -> u8 {
        match self {
            TypeTag::Bool => 0,
            TypeTag::Uint8 => 2,
            TypeTag::Uint16 => 3,
            TypeTag::Uint32 => 4,
            TypeTag::Uint64 => 5,
            TypeTag::Address => 7,
        }
    }

    /// Inverse of [`TypeTag::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.code() == code)
    }

    /// True for the unsigned integer tags
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::Uint8 | TypeTag::Uint16 | TypeTag::Uint32 | TypeTag::Uint64
        )
    }

    /// Largest plaintext representable by this tag (all bits set)
    pub fn max_value(self) -> U256 {
        U256::MAX >> (256 - self.bits())
    }

    /// Reduce a value modulo 2^bits
    pub fn wrap(self, value: U256) -> U256 {
        value & self.max_value()
    }

    /// Whether `value` is a valid plaintext for this tag
    pub fn fits(self, value: U256) -> bool {
        value <= self.max_value()
    }

    /// Fixed-width big-endian encoding of a plaintext
    ///
    /// Callers are expected to have checked [`TypeTag::fits`]; excess high bits
    /// are dropped.
    pub fn encode_plaintext(self, value: U256) -> Vec<u8> {
        let bytes = value.to_be_bytes::<32>();
        bytes[32 - self.byte_len()..].to_vec()
    }

    /// Decode a fixed-width plaintext, rejecting wrong lengths and out-of-range values
    pub fn decode_plaintext(self, bytes: &[u8]) -> Option<U256> {
        if bytes.len() != self.byte_len() {
            return None;
        }
        let value = U256::from_be_slice(bytes);
        self.fits(value).then_some(value)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeTag::Bool => "ebool",
            TypeTag::Uint8 => "euint8",
            TypeTag::Uint16 => "euint16",
            TypeTag::Uint32 => "euint32",
            TypeTag::Uint64 => "euint64",
            TypeTag::Address => "eaddress",
        })
    }
}

/// Opaque reference to one ciphertext
///
/// Byte 30 carries the type code and byte 31 the handle version; the rest is
/// a keccak digest minted by the handle store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub B256);

impl HandleId {
    /// Type tag embedded in the id, if the byte is a known code
    pub fn embedded_tag(&self) -> Option<TypeTag> {
        TypeTag::from_code(self.0[30])
    }
}

impl From<B256> for HandleId {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contract instance or end-user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Principal(pub Address);

impl From<Address> for Principal {
    fn from(value: Address) -> Self {
        Self(value)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Right held by a principal over a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Pass the handle into further homomorphic operations (contract-scoped)
    Use,
    /// Retrieve the plaintext through the decryption gateway
    Decrypt,
}

impl Capability {
    /// ABI code used by the executor precompile
    pub const fn code(self) -> u8 {
        match self {
            Capability::Use => 0,
            Capability::Decrypt => 1,
        }
    }

    /// Inverse of [`Capability::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Capability::Use),
            1 => Some(Capability::Decrypt),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Use => "USE",
            Capability::Decrypt => "DECRYPT",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_codes_round_trip() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(TypeTag::from_code(1), None);
        assert_eq!(TypeTag::from_code(6), None);
    }

    #[test]
    fn test_max_values() {
        assert_eq!(TypeTag::Bool.max_value(), U256::from(1));
        assert_eq!(TypeTag::Uint8.max_value(), U256::from(255));
        assert_eq!(TypeTag::Uint64.max_value(), U256::from(u64::MAX));
        assert_eq!(TypeTag::Address.byte_len(), 20);
    }

    #[test]
    fn test_plaintext_encoding_rejects_out_of_range() {
        let encoded = TypeTag::Uint16.encode_plaintext(U256::from(0x1234));
        assert_eq!(encoded, vec![0x12, 0x34]);
        assert_eq!(
            TypeTag::Uint16.decode_plaintext(&encoded),
            Some(U256::from(0x1234))
        );

        // Wrong width
        assert_eq!(TypeTag::Uint16.decode_plaintext(&[0x12]), None);
        // A bool must be 0 or 1
        assert_eq!(TypeTag::Bool.decode_plaintext(&[2]), None);
        assert_eq!(TypeTag::Bool.decode_plaintext(&[1]), Some(U256::from(1)));
    }

    #[test]
    fn test_wrap() {
        assert_eq!(TypeTag::Uint8.wrap(U256::from(260)), U256::from(4));
        assert_eq!(TypeTag::Uint32.wrap(U256::from(7)), U256::from(7));
    }
}
