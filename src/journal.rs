//! Undo journal behind engine atomicity
//!
//! Modeled on the EVM journal: every mutation of the handle store, the
//! permission registry or the consumed-proof set appends an entry, and a
//! checkpoint is simply the journal length. Reverting pops entries back to the
//! checkpoint in reverse order; committing the outermost transaction clears
//! the journal.

use crate::{
    acl::PermissionEntry, handle_store::HandleRecord, input_verifier::ProofId, types::HandleId,
};

/// One undoable mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    HandleCreated(HandleId),
    HandlePruned(HandleId, HandleRecord),
    Granted(PermissionEntry),
    Revoked(PermissionEntry),
    TransientGranted(PermissionEntry),
    TransientRevoked(PermissionEntry),
    ProofConsumed(ProofId),
}

/// Position in the journal to revert to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCheckpoint {
    pub journal_i: usize,
}

/// Checkpoint operations an outer transaction coordinator drives
///
/// Same shape as the EVM journal's checkpoint API so both sides of an atomic
/// transaction are handled identically.
pub trait EngineJournal {
    /// Open a checkpoint
    fn checkpoint(&mut self) -> EngineCheckpoint;

    /// Close the most recent checkpoint, keeping its effects
    fn checkpoint_commit(&mut self);

    /// Close the most recent checkpoint, undoing everything after it
    fn checkpoint_revert(&mut self, checkpoint: EngineCheckpoint);

    /// Finalize the transaction: effects become permanent, transient rows expire
    fn commit_tx(&mut self);

    /// Abandon the transaction bookkeeping, transient rows expire
    fn discard_tx(&mut self);
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    depth: usize,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub fn checkpoint(&mut self) -> EngineCheckpoint {
        self.depth += 1;
        EngineCheckpoint {
            journal_i: self.entries.len(),
        }
    }

    pub fn checkpoint_commit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Pop every entry recorded after `checkpoint`, newest first
    pub fn checkpoint_revert(&mut self, checkpoint: EngineCheckpoint) -> Vec<JournalEntry> {
        self.depth = self.depth.saturating_sub(1);
        let start = checkpoint.journal_i.min(self.entries.len());
        let mut undone = self.entries.split_off(start);
        undone.reverse();
        undone
    }

    /// Open checkpoints
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revm::primitives::B256;

    #[test]
    fn test_revert_returns_newest_first() {
        let mut journal = Journal::new();
        journal.record(JournalEntry::ProofConsumed(B256::repeat_byte(1)));

        let checkpoint = journal.checkpoint();
        assert_eq!(journal.depth(), 1);
        journal.record(JournalEntry::ProofConsumed(B256::repeat_byte(2)));
        journal.record(JournalEntry::ProofConsumed(B256::repeat_byte(3)));

        let undone = journal.checkpoint_revert(checkpoint);
        assert_eq!(
            undone,
            vec![
                JournalEntry::ProofConsumed(B256::repeat_byte(3)),
                JournalEntry::ProofConsumed(B256::repeat_byte(2)),
            ]
        );
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.depth(), 0);
    }

    #[test]
    fn test_nested_checkpoints() {
        let mut journal = Journal::new();
        let outer = journal.checkpoint();
        journal.record(JournalEntry::ProofConsumed(B256::repeat_byte(1)));

        journal.checkpoint();
        journal.record(JournalEntry::ProofConsumed(B256::repeat_byte(2)));
        journal.checkpoint_commit();
        assert_eq!(journal.depth(), 1);

        assert_eq!(journal.checkpoint_revert(outer).len(), 2);
        assert!(journal.is_empty());
    }
}
