//! FHEVM engine
//!
//! Composes the handle store, permission registry, input verifier and a
//! backend behind one API. Every public mutating call runs inside a journal
//! checkpoint: it either applies all of its effects or none of them.
//!
//! ```rust,ignore
//! let mut engine = FhevmEngine::new(MockBackend);
//! let x = engine.verify_and_ingest(&input.ciphertext, &input.proof, user, contract)?;
//! let three = engine.trivial_encrypt(TypeTag::Uint8, U256::from(3), contract)?;
//! engine.grant(three, contract, Capability::Use)?;
//! engine.grant(x, contract, Capability::Use)?;
//! let sum = engine.apply(OpKind::Add, &[x, three], contract)?;
//! engine.grant(sum, user, Capability::Decrypt)?;
//! assert_eq!(engine.decrypt(sum, user)?, U256::from(8));
//! ```
//!
//! Several calls can be grouped with [`FhevmEngine::transaction`]. An outer
//! coordinator (the EVM host) drives the same machinery through
//! [`EngineJournal`].

use revm::primitives::U256;
use tracing::{debug, info};

use crate::{
    acl::{PermissionEntry, PermissionRegistry},
    backend::FheBackend,
    config::EngineConfig,
    dispatcher::OperationDispatcher,
    error::{EngineError, Result},
    gateway::DecryptionGateway,
    handle_store::{HandleOrigin, HandleRecord, HandleStore},
    input_verifier::InputVerifier,
    journal::{EngineCheckpoint, EngineJournal, Journal, JournalEntry},
    ops::OpKind,
    types::{Capability, HandleId, Principal, TypeTag},
};

#[derive(Debug)]
pub struct FhevmEngine<B: FheBackend> {
    backend: B,
    store: HandleStore,
    acl: PermissionRegistry,
    verifier: InputVerifier,
    journal: Journal,
    config: EngineConfig,
}

impl<B: FheBackend + Default> Default for FhevmEngine<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: FheBackend> FhevmEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            store: HandleStore::new(),
            acl: PermissionRegistry::new(),
            verifier: InputVerifier::new(config.limits.max_ciphertext_bytes),
            journal: Journal::new(),
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &HandleStore {
        &self.store
    }

    pub fn acl(&self) -> &PermissionRegistry {
        &self.acl
    }

    pub fn verifier(&self) -> &InputVerifier {
        &self.verifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a transaction or checkpoint is open
    pub fn in_transaction(&self) -> bool {
        self.journal.depth() > 0
    }

    /// Validate a submitted ciphertext and register it as a new handle.
    ///
    /// The proof must be bound to exactly `(contract, submitter)`. On success
    /// the proof is consumed for good and the handle carries no permissions.
    pub fn verify_and_ingest(
        &mut self,
        ciphertext: &[u8],
        proof: &[u8],
        submitter: Principal,
        contract: Principal,
    ) -> Result<HandleId> {
        self.atomically(|engine| {
            let verified =
                engine
                    .verifier
                    .verify(&engine.backend, ciphertext, proof, submitter, contract)?;

            if engine.verifier.consume(verified.proof_id) {
                engine
                    .journal
                    .record(JournalEntry::ProofConsumed(verified.proof_id));
            }

            let handle = engine.mint(
                verified.tag,
                ciphertext.to_vec(),
                HandleOrigin::Input {
                    submitter,
                    contract,
                },
            );
            info!(%handle, %submitter, %contract, tag = %verified.tag, "input ingested");
            Ok(handle)
        })
    }

    /// Encrypt a public constant under the backend.
    ///
    /// A plaintext that does not fit `tag` is refused, never truncated.
    pub fn trivial_encrypt(
        &mut self,
        tag: TypeTag,
        plaintext: U256,
        creator: Principal,
    ) -> Result<HandleId> {
        if !tag.fits(plaintext) {
            return Err(EngineError::PlaintextOutOfRange {
                tag,
                value: plaintext,
            });
        }
        self.atomically(|engine| {
            let payload = engine.backend.encrypt(tag, plaintext)?;
            Ok(engine.mint(tag, payload, HandleOrigin::Trivial { creator }))
        })
    }

    /// Run a homomorphic operation on behalf of `caller`.
    ///
    /// Requires USE for `caller` on every operand. The result handle starts
    /// with no permission rows.
    pub fn apply(
        &mut self,
        op: OpKind,
        operands: &[HandleId],
        caller: Principal,
    ) -> Result<HandleId> {
        self.atomically(|engine| {
            let computed = OperationDispatcher::new(&engine.backend, &engine.store, &engine.acl)
                .dispatch(op, operands, caller)?;
            Ok(engine.mint(
                computed.tag,
                computed.payload,
                HandleOrigin::Computed {
                    op,
                    creator: caller,
                },
            ))
        })
    }

    /// Add a persistent permission row. Idempotent.
    pub fn grant(
        &mut self,
        handle: HandleId,
        principal: Principal,
        capability: Capability,
    ) -> Result<()> {
        self.atomically(|engine| {
            engine.store.get(handle)?;
            let entry = PermissionEntry::new(handle, principal, capability);
            if engine.acl.grant(entry) {
                engine.journal.record(JournalEntry::Granted(entry));
                debug!(%handle, %principal, %capability, "permission granted");
            }
            Ok(())
        })
    }

    /// Add a permission row that expires when the current transaction ends
    pub fn grant_transient(
        &mut self,
        handle: HandleId,
        principal: Principal,
        capability: Capability,
    ) -> Result<()> {
        self.atomically(|engine| {
            engine.store.get(handle)?;
            let entry = PermissionEntry::new(handle, principal, capability);
            if engine.acl.grant_transient(entry) {
                engine.journal.record(JournalEntry::TransientGranted(entry));
                debug!(%handle, %principal, %capability, "transient permission granted");
            }
            Ok(())
        })
    }

    /// Remove a permission row, persistent and transient alike. Idempotent.
    pub fn revoke(
        &mut self,
        handle: HandleId,
        principal: Principal,
        capability: Capability,
    ) -> Result<()> {
        self.atomically(|engine| {
            let entry = PermissionEntry::new(handle, principal, capability);
            if engine.acl.revoke(&entry) {
                engine.journal.record(JournalEntry::Revoked(entry));
                debug!(%handle, %principal, %capability, "permission revoked");
            }
            if engine.acl.revoke_transient(&entry) {
                engine.journal.record(JournalEntry::TransientRevoked(entry));
            }
            Ok(())
        })
    }

    /// Record of a live handle
    pub fn handle(&self, handle: HandleId) -> Result<&HandleRecord> {
        self.store.get(handle)
    }

    /// Origin creator of a live handle
    pub fn creator_of(&self, handle: HandleId) -> Result<Principal> {
        self.store.get(handle).map(|record| record.origin.creator())
    }

    /// Whether `principal` currently holds `capability` on a live handle
    pub fn check(&self, handle: HandleId, principal: Principal, capability: Capability) -> bool {
        self.store.contains(handle)
            && self
                .acl
                .check(&PermissionEntry::new(handle, principal, capability))
    }

    pub fn decrypt(&self, handle: HandleId, principal: Principal) -> Result<U256> {
        DecryptionGateway::new(&self.backend, &self.store, &self.acl).decrypt(handle, principal)
    }

    pub fn reencrypt(
        &self,
        handle: HandleId,
        principal: Principal,
        recipient_public_key: &[u8],
    ) -> Result<Vec<u8>> {
        DecryptionGateway::new(&self.backend, &self.store, &self.acl).reencrypt(
            handle,
            principal,
            recipient_public_key,
        )
    }

    /// Drop a handle and every permission row that references it.
    ///
    /// Proofs consumed by the handle stay consumed.
    pub fn prune(&mut self, handle: HandleId) -> Result<()> {
        self.atomically(|engine| {
            let record = engine.store.prune(handle)?;
            engine
                .journal
                .record(JournalEntry::HandlePruned(handle, record));

            let (rows, transient) = engine.acl.forget_handle(handle);
            for entry in rows {
                engine.journal.record(JournalEntry::Revoked(entry));
            }
            for entry in transient {
                engine.journal.record(JournalEntry::TransientRevoked(entry));
            }
            debug!(%handle, "handle pruned");
            Ok(())
        })
    }

    /// Run several calls as one unit.
    ///
    /// If `f` fails, every handle, permission row and proof consumption it
    /// produced is undone. Transient grants made inside expire when the
    /// outermost transaction ends.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.atomically(f)
    }

    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = EngineJournal::checkpoint(self);
        let outcome = f(self);
        match outcome {
            Ok(_) => EngineJournal::checkpoint_commit(self),
            Err(_) => EngineJournal::checkpoint_revert(self, checkpoint),
        }
        if self.journal.depth() == 0 {
            self.commit_tx();
        }
        outcome
    }

    fn mint(&mut self, tag: TypeTag, payload: Vec<u8>, origin: HandleOrigin) -> HandleId {
        let handle = self.store.create_handle(tag, payload, origin);
        self.journal.record(JournalEntry::HandleCreated(handle));
        debug!(%handle, %tag, creator = %origin.creator(), "handle created");
        handle
    }

    fn undo(&mut self, entries: Vec<JournalEntry>) {
        for entry in entries {
            match entry {
                JournalEntry::HandleCreated(handle) => self.store.discard(handle),
                JournalEntry::HandlePruned(handle, record) => self.store.restore(handle, record),
                JournalEntry::Granted(row) => {
                    self.acl.revoke(&row);
                }
                JournalEntry::Revoked(row) => {
                    self.acl.grant(row);
                }
                JournalEntry::TransientGranted(row) => {
                    self.acl.revoke_transient(&row);
                }
                JournalEntry::TransientRevoked(row) => {
                    self.acl.grant_transient(row);
                }
                JournalEntry::ProofConsumed(proof_id) => self.verifier.unconsume(&proof_id),
            }
        }
    }
}

impl<B: FheBackend> EngineJournal for FhevmEngine<B> {
    fn checkpoint(&mut self) -> EngineCheckpoint {
        self.journal.checkpoint()
    }

    fn checkpoint_commit(&mut self) {
        self.journal.checkpoint_commit();
    }

    fn checkpoint_revert(&mut self, checkpoint: EngineCheckpoint) {
        let undone = self.journal.checkpoint_revert(checkpoint);
        if !undone.is_empty() {
            debug!(entries = undone.len(), "engine checkpoint reverted");
        }
        self.undo(undone);
    }

    fn commit_tx(&mut self) {
        self.journal.clear();
        self.acl.clear_transient();
    }

    /// Undo whatever is still journaled, then end the transaction
    fn discard_tx(&mut self) {
        let outstanding = self
            .journal
            .checkpoint_revert(EngineCheckpoint { journal_i: 0 });
        self.undo(outstanding);
        self.journal.clear();
        self.acl.clear_transient();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::MockBackend, client::InputBinding};
    use revm::primitives::address;

    const CONTRACT: Principal = Principal(address!("00000000000000000000000000000000000000C0"));
    const USER: Principal = Principal(address!("0000000000000000000000000000000000000AAA"));

    fn ingest(engine: &mut FhevmEngine<MockBackend>, tag: TypeTag, value: u64) -> HandleId {
        let input = InputBinding::new(CONTRACT, USER)
            .clear(tag, U256::from(value))
            .unwrap();
        engine
            .verify_and_ingest(&input.ciphertext, &input.proof, USER, CONTRACT)
            .unwrap()
    }

    #[test]
    fn test_ingest_grants_nothing() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = ingest(&mut engine, TypeTag::Uint8, 5);

        assert!(engine.store().contains(handle));
        assert!(!engine.check(handle, USER, Capability::Use));
        assert!(!engine.check(handle, CONTRACT, Capability::Use));
        assert!(!engine.check(handle, USER, Capability::Decrypt));
    }

    #[test]
    fn test_apply_requires_use_on_every_operand() {
        let mut engine = FhevmEngine::new(MockBackend);
        let a = ingest(&mut engine, TypeTag::Uint8, 5);
        let b = ingest(&mut engine, TypeTag::Uint8, 3);
        engine.grant(a, CONTRACT, Capability::Use).unwrap();

        let handles_before = engine.store().len();
        let rows_before = engine.acl().len();

        let denied = engine.apply(OpKind::Add, &[a, b], CONTRACT);
        assert!(matches!(
            denied,
            Err(EngineError::PermissionDenied { handle, .. }) if handle == b
        ));
        assert_eq!(engine.store().len(), handles_before);
        assert_eq!(engine.acl().len(), rows_before);
    }

    #[test]
    fn test_trivial_encrypt_refuses_wide_plaintext() {
        let mut engine = FhevmEngine::new(MockBackend);

        let refused = engine.trivial_encrypt(TypeTag::Uint8, U256::from(256), CONTRACT);
        assert!(matches!(
            refused,
            Err(EngineError::PlaintextOutOfRange {
                tag: TypeTag::Uint8,
                ..
            })
        ));
        assert!(engine.store().is_empty());

        let max = engine
            .trivial_encrypt(TypeTag::Uint8, U256::from(255), CONTRACT)
            .unwrap();
        assert_eq!(engine.handle(max).unwrap().tag, TypeTag::Uint8);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let mut engine = FhevmEngine::new(MockBackend);
        let input = InputBinding::new(CONTRACT, USER)
            .clear(TypeTag::Uint16, U256::from(9))
            .unwrap();

        let result: Result<()> = engine.transaction(|engine| {
            let handle =
                engine.verify_and_ingest(&input.ciphertext, &input.proof, USER, CONTRACT)?;
            engine.grant(handle, USER, Capability::Decrypt)?;
            engine.apply(OpKind::Neg, &[handle], CONTRACT)?;
            Ok(())
        });

        assert!(matches!(result, Err(EngineError::PermissionDenied { .. })));
        assert!(engine.store().is_empty());
        assert!(engine.acl().is_empty());
        assert!(!engine.verifier().is_consumed(&input.proof_id));
        assert!(!engine.in_transaction());

        engine
            .verify_and_ingest(&input.ciphertext, &input.proof, USER, CONTRACT)
            .unwrap();
    }

    #[test]
    fn test_transient_grant_lasts_for_the_transaction() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = ingest(&mut engine, TypeTag::Uint32, 41);

        let sum = engine
            .transaction(|engine| {
                engine.grant_transient(handle, CONTRACT, Capability::Use)?;
                assert!(engine.check(handle, CONTRACT, Capability::Use));
                engine.apply(OpKind::Add, &[handle, handle], CONTRACT)
            })
            .unwrap();

        assert!(engine.store().contains(sum));
        assert!(!engine.check(handle, CONTRACT, Capability::Use));
        assert_eq!(engine.acl().transient_len(), 0);
    }

    #[test]
    fn test_prune_drops_rows_for_good() {
        let mut engine = FhevmEngine::new(MockBackend);
        let handle = ingest(&mut engine, TypeTag::Bool, 1);
        engine.grant(handle, USER, Capability::Decrypt).unwrap();

        engine.prune(handle).unwrap();
        assert!(!engine.check(handle, USER, Capability::Decrypt));
        assert!(engine.acl().is_empty());
        assert!(matches!(
            engine.decrypt(handle, USER),
            Err(EngineError::UnknownHandle(_))
        ));
        assert!(matches!(
            engine.grant(handle, USER, Capability::Use),
            Err(EngineError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_discard_tx_undoes_outstanding_work() {
        let mut engine = FhevmEngine::new(MockBackend);
        let kept = ingest(&mut engine, TypeTag::Uint8, 1);

        EngineJournal::checkpoint(&mut engine);
        let dropped = ingest(&mut engine, TypeTag::Uint8, 2);
        engine.grant(kept, USER, Capability::Decrypt).unwrap();
        engine.discard_tx();

        assert!(engine.store().contains(kept));
        assert!(!engine.store().contains(dropped));
        assert!(!engine.check(kept, USER, Capability::Decrypt));
        assert!(!engine.in_transaction());
    }
}
