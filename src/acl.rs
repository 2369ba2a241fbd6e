//! Permission registry
//!
//! Capability rows keyed by handle id, kept apart from the handles themselves
//! so revocation and re-grant never touch ciphertext identity. Rows are never
//! derived: every handle starts with none.
//!
//! Transient rows mirror FHEVM's `allowTransient`. They are visible to
//! [`PermissionRegistry::check`] until the engine transaction that created
//! them ends.

use crate::types::{Capability, HandleId, Principal};
use std::collections::BTreeSet;

/// One `(handle, principal, capability)` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PermissionEntry {
    pub handle: HandleId,
    pub principal: Principal,
    pub capability: Capability,
}

impl PermissionEntry {
    pub fn new(handle: HandleId, principal: Principal, capability: Capability) -> Self {
        Self {
            handle,
            principal,
            capability,
        }
    }
}

/// Grant / revoke / check over capability rows
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    rows: BTreeSet<PermissionEntry>,
    transient: BTreeSet<PermissionEntry>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a persistent row. Returns false if it was already present.
    pub fn grant(&mut self, entry: PermissionEntry) -> bool {
        self.rows.insert(entry)
    }

    /// Add a transaction-scoped row. Returns false if it was already present.
    pub fn grant_transient(&mut self, entry: PermissionEntry) -> bool {
        self.transient.insert(entry)
    }

    /// Remove a persistent row. Returns false if it was absent.
    pub fn revoke(&mut self, entry: &PermissionEntry) -> bool {
        self.rows.remove(entry)
    }

    /// Remove a transient row. Returns false if it was absent.
    pub fn revoke_transient(&mut self, entry: &PermissionEntry) -> bool {
        self.transient.remove(entry)
    }

    /// Whether the row exists, persistent or transient
    pub fn check(&self, entry: &PermissionEntry) -> bool {
        self.rows.contains(entry) || self.transient.contains(entry)
    }

    /// Drop every row of a handle; returns the removed `(persistent, transient)` rows
    pub fn forget_handle(
        &mut self,
        handle: HandleId,
    ) -> (Vec<PermissionEntry>, Vec<PermissionEntry>) {
        let rows = drain_handle(&mut self.rows, handle);
        let transient = drain_handle(&mut self.transient, handle);
        (rows, transient)
    }

    /// Persistent rows of one handle
    pub fn entries_for(&self, handle: HandleId) -> impl Iterator<Item = &PermissionEntry> {
        self.rows.iter().filter(move |entry| entry.handle == handle)
    }

    /// Number of persistent rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of live transient rows
    pub fn transient_len(&self) -> usize {
        self.transient.len()
    }

    /// End of transaction: every transient row expires
    pub fn clear_transient(&mut self) {
        self.transient.clear();
    }
}

fn drain_handle(set: &mut BTreeSet<PermissionEntry>, handle: HandleId) -> Vec<PermissionEntry> {
    let removed: Vec<PermissionEntry> = set
        .iter()
        .filter(|entry| entry.handle == handle)
        .copied()
        .collect();
    for entry in &removed {
        set.remove(entry);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use revm::primitives::{B256, address};

    fn entry(capability: Capability) -> PermissionEntry {
        PermissionEntry::new(
            HandleId(B256::repeat_byte(0x11)),
            Principal(address!("00000000000000000000000000000000000000C0")),
            capability,
        )
    }

    #[test]
    fn test_grant_and_revoke_are_idempotent() {
        let mut registry = PermissionRegistry::new();
        let row = entry(Capability::Use);

        assert!(registry.grant(row));
        assert!(!registry.grant(row));
        assert!(registry.check(&row));
        assert_eq!(registry.len(), 1);

        assert!(registry.revoke(&row));
        assert!(!registry.revoke(&row));
        assert!(!registry.check(&row));
    }

    #[test]
    fn test_capabilities_are_independent() {
        let mut registry = PermissionRegistry::new();
        registry.grant(entry(Capability::Use));

        assert!(!registry.check(&entry(Capability::Decrypt)));
    }

    #[test]
    fn test_transient_rows_clear() {
        let mut registry = PermissionRegistry::new();
        let row = entry(Capability::Use);

        registry.grant_transient(row);
        assert!(registry.check(&row));
        assert!(registry.is_empty());

        registry.clear_transient();
        assert!(!registry.check(&row));
    }

    #[test]
    fn test_forget_handle() {
        let mut registry = PermissionRegistry::new();
        registry.grant(entry(Capability::Use));
        registry.grant(entry(Capability::Decrypt));
        registry.grant_transient(entry(Capability::Use));

        let (rows, transient) = registry.forget_handle(entry(Capability::Use).handle);
        assert_eq!(rows.len(), 2);
        assert_eq!(transient.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.transient_len(), 0);
    }
}
