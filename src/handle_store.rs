//! Ciphertext handle store
//!
//! Owns every backend payload. Handles are immutable: "updating" an encrypted
//! value means minting a new handle and repointing a contract storage slot at
//! it. Nothing is deleted implicitly; [`HandleStore::prune`] is the only way a
//! handle leaves the store.

use crate::{
    error::{EngineError, Result},
    ops::OpKind,
    types::{HANDLE_VERSION, HandleId, Principal, TypeTag},
};
use revm::primitives::{B256, keccak256};
use std::collections::HashMap;

const HANDLE_DOMAIN: &[u8] = b"fhevm.handle";

/// What produced a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    /// Verified client input
    Input {
        /// User that encrypted the value
        submitter: Principal,
        /// Contract the input was bound to
        contract: Principal,
    },
    /// Trivial encryption of a public constant
    Trivial {
        /// Contract that requested the encryption
        creator: Principal,
    },
    /// Result of a homomorphic operation
    Computed {
        /// Operation that produced the value
        op: OpKind,
        /// Contract that requested the operation
        creator: Principal,
    },
}

impl HandleOrigin {
    /// Contract principal responsible for the handle
    pub fn creator(&self) -> Principal {
        match *self {
            HandleOrigin::Input { contract, .. } => contract,
            HandleOrigin::Trivial { creator } | HandleOrigin::Computed { creator, .. } => creator,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match *self {
            HandleOrigin::Input { submitter, contract } => {
                out.push(0);
                out.extend_from_slice(submitter.0.as_slice());
                out.extend_from_slice(contract.0.as_slice());
            }
            HandleOrigin::Trivial { creator } => {
                out.push(1);
                out.extend_from_slice(creator.0.as_slice());
            }
            HandleOrigin::Computed { op, creator } => {
                out.push(2);
                out.push(op.code());
                out.extend_from_slice(creator.0.as_slice());
            }
        }
    }
}

/// Stored metadata and payload of one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRecord {
    /// Declared type, immutable
    pub tag: TypeTag,
    /// Backend ciphertext
    pub payload: Vec<u8>,
    /// Producer of the handle
    pub origin: HandleOrigin,
}

/// Mapping from handle ids to ciphertext records
#[derive(Debug, Default)]
pub struct HandleStore {
    handles: HashMap<HandleId, HandleRecord>,
    /// Monotonic counter mixed into every id; never rewinds, so ids are never re-issued
    sequence: u64,
}

impl HandleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload and return its fresh handle id
    pub fn create_handle(
        &mut self,
        tag: TypeTag,
        payload: Vec<u8>,
        origin: HandleOrigin,
    ) -> HandleId {
        let id = self.derive_id(tag, &payload, &origin);
        self.sequence += 1;
        self.handles.insert(
            id,
            HandleRecord {
                tag,
                payload,
                origin,
            },
        );
        id
    }

    fn derive_id(&self, tag: TypeTag, payload: &[u8], origin: &HandleOrigin) -> HandleId {
        let mut preimage = Vec::with_capacity(HANDLE_DOMAIN.len() + 64 + payload.len());
        preimage.extend_from_slice(HANDLE_DOMAIN);
        preimage.extend_from_slice(&self.sequence.to_be_bytes());
        preimage.push(tag.code());
        origin.encode_into(&mut preimage);
        preimage.extend_from_slice(payload);

        let mut id = keccak256(&preimage).0;
        id[30] = tag.code();
        id[31] = HANDLE_VERSION;
        HandleId(B256::from(id))
    }

    /// Full record of a handle
    pub fn get(&self, id: HandleId) -> Result<&HandleRecord> {
        self.handles.get(&id).ok_or(EngineError::UnknownHandle(id))
    }

    /// Stored ciphertext of a handle
    pub fn payload(&self, id: HandleId) -> Result<&[u8]> {
        self.get(id).map(|record| record.payload.as_slice())
    }

    /// Declared type of a handle
    pub fn tag(&self, id: HandleId) -> Result<TypeTag> {
        self.get(id).map(|record| record.tag)
    }

    /// Whether the handle exists
    pub fn contains(&self, id: HandleId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if no handle is stored
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove a handle (deliberate garbage collection)
    pub fn prune(&mut self, id: HandleId) -> Result<HandleRecord> {
        self.handles.remove(&id).ok_or(EngineError::UnknownHandle(id))
    }

    /// Undo a creation during a journal revert
    pub(crate) fn discard(&mut self, id: HandleId) {
        self.handles.remove(&id);
    }

    /// Undo a prune during a journal revert
    pub(crate) fn restore(&mut self, id: HandleId, record: HandleRecord) {
        self.handles.insert(id, record);
    }
}
