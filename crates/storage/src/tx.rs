//! Per-transaction state: dirty buffer, undo snapshots, and the pending
//! B+Tree index updates deferred to commit (spec §4.4, §4.6, §9).

use std::collections::BTreeMap;

use shard_common::{PageId, Pk, Rid, TxId};

/// A row-move caused by `update` growing a row past its slot's capacity.
/// Applied to the B+Tree at commit so the tree never observes an
/// uncommitted RID.
#[derive(Clone, Copy)]
pub struct PendingIndexUpdate {
    pub pk: Pk,
    pub old_rid: Rid,
    pub new_rid: Rid,
}

pub struct Transaction {
    pub id: TxId,
    /// Latest image of every page this transaction has written.
    pub dirty: BTreeMap<PageId, Vec<u8>>,
    /// Original image of each page, captured on its first write this tx.
    pub undo: BTreeMap<PageId, Vec<u8>>,
    pub pending_index_updates: Vec<PendingIndexUpdate>,
    terminated: bool,
}

impl Transaction {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            dirty: BTreeMap::new(),
            undo: BTreeMap::new(),
            pending_index_updates: Vec::new(),
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    /// The tx's own dirty version of a page, if it has written one.
    pub fn read_dirty(&self, page_id: PageId) -> Option<&Vec<u8>> {
        self.dirty.get(&page_id)
    }

    pub fn queue_index_update(&mut self, pk: Pk, old_rid: Rid, new_rid: Rid) {
        self.pending_index_updates
            .push(PendingIndexUpdate { pk, old_rid, new_rid });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transaction_has_no_state() {
        let tx = Transaction::new(1);
        assert!(tx.dirty.is_empty());
        assert!(tx.undo.is_empty());
        assert!(!tx.is_terminated());
    }
}
