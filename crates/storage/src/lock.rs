//! Page-range lock service: one exclusive writer lease per page id.
//!
//! The engine runs single-threaded and cooperative (spec §5) — there is no
//! executor to make progress on a second transaction while a first is
//! suspended waiting for a lock, so unlike the reference design this
//! implementation cannot block a caller until a lease frees up. Instead a
//! conflicting acquire fails immediately with `Usage`; callers are expected
//! to finish (commit or roll back) one transaction before starting work
//! that touches the same pages from another. Re-entrant acquisition by the
//! same transaction is always a no-op, as required.

use std::collections::HashMap;

use shard_common::{PageId, StorageError, TxId};

#[derive(Default)]
pub struct LockManager {
    holders: HashMap<PageId, TxId>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, tx: TxId, page_id: PageId) -> Result<(), StorageError> {
        match self.holders.get(&page_id) {
            Some(&holder) if holder == tx => Ok(()),
            Some(&holder) => Err(StorageError::Usage(format!(
                "page {page_id} is locked by transaction {holder}"
            ))),
            None => {
                self.holders.insert(page_id, tx);
                Ok(())
            }
        }
    }

    /// Release every lock held by `tx`. Returns how many were released, for
    /// the invariant check that acquired == released.
    pub fn release_all(&mut self, tx: TxId) -> usize {
        let before = self.holders.len();
        self.holders.retain(|_, holder| *holder != tx);
        before - self.holders.len()
    }
}
