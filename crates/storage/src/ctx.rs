//! Explicit transaction context threaded through every engine-internal
//! operation (spec §9: "Ambient transaction context" — this implementation
//! carries it as a parameter rather than coroutine-local storage).

use shard_common::{PageId, StorageError};
use shard_pagestore::BufferCache;

use crate::lock::LockManager;
use crate::tx::Transaction;

pub struct Ctx<'a> {
    pub buffer: &'a mut BufferCache,
    pub locks: &'a mut LockManager,
    pub tx: &'a mut Transaction,
    pub page_size: usize,
}

impl<'a> Ctx<'a> {
    /// The tx's own dirty version if present, else the buffer layer's view.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>, StorageError> {
        if let Some(page) = self.tx.read_dirty(page_id) {
            return Ok(page.clone());
        }
        self.buffer.read(page_id)
    }

    /// Acquire the tx's write lock for `page_id`, capture undo on first
    /// write, and store the new image in the tx's private dirty map. Never
    /// touches the shared cache directly.
    pub fn write_page(&mut self, page_id: PageId, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.locks.acquire(self.tx.id, page_id)?;
        if !self.tx.dirty.contains_key(&page_id) {
            let original = self.buffer.read(page_id)?;
            self.tx.undo.entry(page_id).or_insert(original);
        }
        self.tx.dirty.insert(page_id, bytes);
        Ok(())
    }

    pub fn acquire_write_lock(&mut self, page_id: PageId) -> Result<(), StorageError> {
        self.locks.acquire(self.tx.id, page_id)
    }
}
