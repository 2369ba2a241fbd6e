//! Decryption gateway, the only place plaintext leaves the engine

use revm::primitives::U256;
use tracing::{info, warn};

use crate::{
    acl::{PermissionEntry, PermissionRegistry},
    backend::FheBackend,
    error::{EngineError, Result},
    handle_store::{HandleRecord, HandleStore},
    types::{Capability, HandleId, Principal},
};

#[derive(Debug)]
pub struct DecryptionGateway<'a, B: FheBackend> {
    backend: &'a B,
    store: &'a HandleStore,
    acl: &'a PermissionRegistry,
}

impl<'a, B: FheBackend> DecryptionGateway<'a, B> {
    pub fn new(backend: &'a B, store: &'a HandleStore, acl: &'a PermissionRegistry) -> Self {
        Self {
            backend,
            store,
            acl,
        }
    }

    fn authorize(&self, handle: HandleId, principal: Principal) -> Result<&'a HandleRecord> {
        let record = self.store.get(handle)?;
        let entry = PermissionEntry::new(handle, principal, Capability::Decrypt);
        if !self.acl.check(&entry) {
            warn!(%handle, %principal, "decryption refused");
            return Err(EngineError::PermissionDenied {
                handle,
                principal,
                capability: Capability::Decrypt,
            });
        }
        Ok(record)
    }

    /// Plaintext of `handle`, if `principal` holds DECRYPT on it
    pub fn decrypt(&self, handle: HandleId, principal: Principal) -> Result<U256> {
        let record = self.authorize(handle, principal)?;
        let value = self.backend.decrypt(record.tag, &record.payload)?;
        info!(%handle, %principal, "handle decrypted");
        Ok(value)
    }

    /// Plaintext of `handle` sealed to `recipient_public_key`
    pub fn reencrypt(
        &self,
        handle: HandleId,
        principal: Principal,
        recipient_public_key: &[u8],
    ) -> Result<Vec<u8>> {
        let record = self.authorize(handle, principal)?;
        let sealed = self
            .backend
            .reencrypt(record.tag, &record.payload, recipient_public_key)?;
        info!(%handle, %principal, "handle re-encrypted");
        Ok(sealed)
    }
}
