//! Transaction Coordinator for atomic EVM + engine transactions
//!
//! The EVM journal and the engine journal are checkpointed together when a
//! transaction starts. At the end, both commit or both revert: a contract that
//! reverts after creating handles or granting permissions leaves no trace in
//! the engine.

use crate::journal::{EngineCheckpoint, EngineJournal};
use parking_lot::Mutex;
use revm::context_interface::{JournalTr, journaled_state::JournalCheckpoint};
use std::sync::Arc;
use tracing::debug;

/// Coordinates atomic transactions across the EVM journal and the engine journal
///
/// # Architecture
///
/// 1. Create checkpoints on BOTH journals at transaction start
/// 2. Execute the transaction (may call the executor precompile many times)
/// 3. At the end: either commit all changes or revert all changes atomically
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = TransactionCoordinator::new();
///
/// let (evm_cp, engine_cp) =
///     coordinator.begin_transaction(evm.ctx.journal_mut(), &mut *engine.borrow_mut());
///
/// let result = handler.run(&mut evm)?;
///
/// if result.is_success() && !coordinator.has_error() {
///     coordinator.commit_transaction(evm.ctx.journal_mut(), &mut *engine.borrow_mut());
/// } else {
///     coordinator.revert_transaction(
///         evm.ctx.journal_mut(),
///         &mut *engine.borrow_mut(),
///         evm_cp,
///         engine_cp,
///     );
/// }
/// ```
#[derive(Clone, Debug)]
pub struct TransactionCoordinator {
    /// Transaction nesting depth (0 = no active transaction)
    depth: Arc<Mutex<usize>>,

    /// Track if any executor call failed fatally
    has_error: Arc<Mutex<bool>>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            depth: Arc::new(Mutex::new(0)),
            has_error: Arc::new(Mutex::new(false)),
        }
    }

    /// Begin an atomic transaction
    ///
    /// Creates checkpoints on both journals. Returns the checkpoints that must
    /// be handed to `revert_transaction()` if the transaction fails.
    pub fn begin_transaction<J, E>(
        &self,
        evm_journal: &mut J,
        engine: &mut E,
    ) -> (JournalCheckpoint, EngineCheckpoint)
    where
        J: JournalTr,
        E: EngineJournal + ?Sized,
    {
        let mut depth = self.depth.lock();

        // Only create checkpoints at the outermost transaction level
        if *depth == 0 {
            *self.has_error.lock() = false;

            let evm_checkpoint = evm_journal.checkpoint();
            let engine_checkpoint = engine.checkpoint();

            *depth = 1;
            debug!("coordinated transaction started");

            (evm_checkpoint, engine_checkpoint)
        } else {
            // Nested: the outer transaction owns the real checkpoints
            *depth += 1;
            (
                JournalCheckpoint {
                    log_i: 0,
                    journal_i: 0,
                },
                EngineCheckpoint { journal_i: 0 },
            )
        }
    }

    /// Increment call depth while the executor precompile runs
    pub fn enter_executor_call(&self) {
        *self.depth.lock() += 1;
    }

    /// Decrement call depth when the executor precompile returns
    pub fn exit_executor_call(&self) {
        let mut depth = self.depth.lock();
        *depth = depth.saturating_sub(1);
    }

    /// Mark that an error occurred during execution
    ///
    /// The outermost transaction will revert instead of committing.
    pub fn mark_error(&self) {
        *self.has_error.lock() = true;
    }

    pub fn has_error(&self) -> bool {
        *self.has_error.lock()
    }

    pub fn depth(&self) -> usize {
        *self.depth.lock()
    }

    pub fn in_transaction(&self) -> bool {
        *self.depth.lock() > 0
    }

    /// Commit the transaction on both journals
    pub fn commit_transaction<J, E>(&self, evm_journal: &mut J, engine: &mut E)
    where
        J: JournalTr,
        E: EngineJournal + ?Sized,
    {
        let mut depth = self.depth.lock();

        if *depth == 1 {
            evm_journal.checkpoint_commit();
            engine.checkpoint_commit();

            // Finalize (clears journals, expires transient permissions)
            evm_journal.commit_tx();
            engine.commit_tx();

            *depth = 0;
            *self.has_error.lock() = false;
            debug!("coordinated transaction committed");
        } else if *depth > 1 {
            *depth -= 1;
        }
    }

    /// Revert the transaction on both journals
    ///
    /// Undoes every EVM state change and every handle, permission row and
    /// proof consumption made since the checkpoints were taken.
    pub fn revert_transaction<J, E>(
        &self,
        evm_journal: &mut J,
        engine: &mut E,
        evm_checkpoint: JournalCheckpoint,
        engine_checkpoint: EngineCheckpoint,
    ) where
        J: JournalTr,
        E: EngineJournal + ?Sized,
    {
        let mut depth = self.depth.lock();

        if *depth == 1 {
            evm_journal.checkpoint_revert(evm_checkpoint);
            engine.checkpoint_revert(engine_checkpoint);

            evm_journal.discard_tx();
            engine.discard_tx();

            *depth = 0;
            *self.has_error.lock() = false;
            debug!("coordinated transaction reverted");
        } else if *depth > 1 {
            // The outer transaction performs the actual revert
            *self.has_error.lock() = true;
            *depth -= 1;
        }
    }

    /// Roll back after the EVM already discarded its journal mid-transaction
    /// (the handler returned an error), so no checkpoint can be trusted
    pub fn abort_transaction<J, E>(&self, evm_journal: &mut J, engine: &mut E)
    where
        J: JournalTr,
        E: EngineJournal + ?Sized,
    {
        let mut depth = self.depth.lock();

        if *depth <= 1 {
            evm_journal.discard_tx();
            engine.discard_tx();
            *depth = 0;
            *self.has_error.lock() = false;
            debug!("coordinated transaction aborted");
        } else {
            *self.has_error.lock() = true;
            *depth -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::MockBackend,
        engine::FhevmEngine,
        types::{Principal, TypeTag},
    };
    use revm::{
        context::Journal,
        database::InMemoryDB,
        primitives::{U256, address},
    };

    const CREATOR: Principal = Principal(address!("00000000000000000000000000000000000000C0"));

    #[test]
    fn test_transaction_depth_tracking() {
        let coordinator = TransactionCoordinator::new();

        assert_eq!(coordinator.depth(), 0);
        assert!(!coordinator.in_transaction());

        coordinator.enter_executor_call();
        assert_eq!(coordinator.depth(), 1);
        assert!(coordinator.in_transaction());

        coordinator.enter_executor_call();
        assert_eq!(coordinator.depth(), 2);

        coordinator.exit_executor_call();
        assert_eq!(coordinator.depth(), 1);

        coordinator.exit_executor_call();
        assert_eq!(coordinator.depth(), 0);
        assert!(!coordinator.in_transaction());
    }

    #[test]
    fn test_error_tracking() {
        let coordinator = TransactionCoordinator::new();

        assert!(!coordinator.has_error());

        coordinator.mark_error();
        assert!(coordinator.has_error());
    }

    #[test]
    fn test_revert_undoes_engine_work() {
        let coordinator = TransactionCoordinator::new();
        let mut journal: Journal<InMemoryDB> = Journal::new(InMemoryDB::default());
        let mut engine = FhevmEngine::new(MockBackend);

        let (evm_cp, engine_cp) = coordinator.begin_transaction(&mut journal, &mut engine);
        let handle = engine
            .trivial_encrypt(TypeTag::Uint8, U256::from(7), CREATOR)
            .unwrap();
        assert!(engine.store().contains(handle));

        coordinator.mark_error();
        coordinator.revert_transaction(&mut journal, &mut engine, evm_cp, engine_cp);

        assert!(!engine.store().contains(handle));
        assert!(!engine.in_transaction());
        assert!(!coordinator.in_transaction());
        assert!(!coordinator.has_error());
    }

    #[test]
    fn test_nested_failure_poisons_outer_transaction() {
        let coordinator = TransactionCoordinator::new();
        let mut journal: Journal<InMemoryDB> = Journal::new(InMemoryDB::default());
        let mut engine = FhevmEngine::new(MockBackend);

        let (evm_cp, engine_cp) = coordinator.begin_transaction(&mut journal, &mut engine);
        let handle = engine
            .trivial_encrypt(TypeTag::Uint8, U256::from(7), CREATOR)
            .unwrap();
        let (inner_evm, inner_engine) = coordinator.begin_transaction(&mut journal, &mut engine);
        coordinator.revert_transaction(&mut journal, &mut engine, inner_evm, inner_engine);

        assert_eq!(coordinator.depth(), 1);
        assert!(coordinator.has_error());

        coordinator.revert_transaction(&mut journal, &mut engine, evm_cp, engine_cp);
        assert!(!coordinator.in_transaction());
        assert!(!engine.store().contains(handle));
    }
}
