//! Homomorphic operation dispatcher
//!
//! Checks, in order: operand count, operand existence, the caller contract's
//! USE grant on every operand, then the operation's type rules. Only when all
//! of them pass is the backend invoked. The dispatcher reads state and never
//! writes it; the engine mints the result handle afterwards, with no
//! permission rows.

use tracing::{debug, warn};

use crate::{
    acl::{PermissionEntry, PermissionRegistry},
    backend::{FheBackend, Operand},
    error::{EngineError, Result},
    handle_store::{HandleRecord, HandleStore},
    ops::OpKind,
    types::{Capability, HandleId, Principal, TypeTag},
};

/// Result ciphertext of an operation, not yet registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed {
    pub tag: TypeTag,
    pub payload: Vec<u8>,
}

/// Read-only view used to validate and run one operation
#[derive(Debug)]
pub struct OperationDispatcher<'a, B: FheBackend> {
    backend: &'a B,
    store: &'a HandleStore,
    acl: &'a PermissionRegistry,
}

impl<'a, B: FheBackend> OperationDispatcher<'a, B> {
    pub fn new(backend: &'a B, store: &'a HandleStore, acl: &'a PermissionRegistry) -> Self {
        Self {
            backend,
            store,
            acl,
        }
    }

    /// Validate `op` over `operands` for `caller` and compute the result
    pub fn dispatch(
        &self,
        op: OpKind,
        operands: &[HandleId],
        caller: Principal,
    ) -> Result<Computed> {
        if operands.len() != op.arity() {
            return Err(EngineError::TypeMismatch {
                op,
                reason: format!("expected {} operands, got {}", op.arity(), operands.len()),
            });
        }

        let records = operands
            .iter()
            .map(|&handle| self.store.get(handle))
            .collect::<Result<Vec<&HandleRecord>>>()?;

        for &handle in operands {
            let entry = PermissionEntry::new(handle, caller, Capability::Use);
            if !self.acl.check(&entry) {
                warn!(%op, %handle, %caller, "operand not permitted for caller");
                return Err(EngineError::PermissionDenied {
                    handle,
                    principal: caller,
                    capability: Capability::Use,
                });
            }
        }

        let tags: Vec<TypeTag> = records.iter().map(|record| record.tag).collect();
        let tag = op
            .result_tag(&tags)
            .map_err(|reason| EngineError::TypeMismatch { op, reason })?;

        let inputs: Vec<Operand<'_>> = records
            .iter()
            .map(|record| Operand {
                tag: record.tag,
                ciphertext: &record.payload,
            })
            .collect();
        let payload = self.backend.compute(op, &inputs, tag)?;

        debug!(%op, backend = self.backend.name(), result = %tag, "operation computed");
        Ok(Computed { tag, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::MockBackend, handle_store::HandleOrigin};
    use revm::primitives::{B256, U256, address};

    const CONTRACT: Principal = Principal(address!("00000000000000000000000000000000000000C0"));

    fn store_value(store: &mut HandleStore, tag: TypeTag, value: u64) -> HandleId {
        let payload = MockBackend.encrypt(tag, U256::from(value)).unwrap();
        store.create_handle(tag, payload, HandleOrigin::Trivial { creator: CONTRACT })
    }

    #[test]
    fn test_checks_run_in_order() {
        let mut store = HandleStore::new();
        let mut acl = PermissionRegistry::new();
        let small = store_value(&mut store, TypeTag::Uint8, 1);
        let wide = store_value(&mut store, TypeTag::Uint16, 1);
        let missing = HandleId(B256::ZERO);

        let dispatcher = OperationDispatcher::new(&MockBackend, &store, &acl);
        assert!(matches!(
            dispatcher.dispatch(OpKind::Add, &[small], CONTRACT),
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch(OpKind::Add, &[small, missing], CONTRACT),
            Err(EngineError::UnknownHandle(h)) if h == missing
        ));
        assert!(matches!(
            dispatcher.dispatch(OpKind::Add, &[small, wide], CONTRACT),
            Err(EngineError::PermissionDenied { .. })
        ));

        acl.grant(PermissionEntry::new(small, CONTRACT, Capability::Use));
        acl.grant(PermissionEntry::new(wide, CONTRACT, Capability::Use));
        let dispatcher = OperationDispatcher::new(&MockBackend, &store, &acl);
        assert!(matches!(
            dispatcher.dispatch(OpKind::Add, &[small, wide], CONTRACT),
            Err(EngineError::TypeMismatch { op: OpKind::Add, .. })
        ));
    }

    #[test]
    fn test_comparison_yields_bool() {
        let mut store = HandleStore::new();
        let mut acl = PermissionRegistry::new();
        let a = store_value(&mut store, TypeTag::Uint32, 3);
        let b = store_value(&mut store, TypeTag::Uint32, 9);
        for handle in [a, b] {
            acl.grant(PermissionEntry::new(handle, CONTRACT, Capability::Use));
        }

        let computed = OperationDispatcher::new(&MockBackend, &store, &acl)
            .dispatch(OpKind::Lt, &[a, b], CONTRACT)
            .unwrap();

        assert_eq!(computed.tag, TypeTag::Bool);
        assert_eq!(
            MockBackend.decrypt(computed.tag, &computed.payload).unwrap(),
            U256::from(1)
        );
    }
}
