//! Buffer/cache layer: mediates all page I/O against the main data file.
//!
//! Holds an LRU cache of *clean* page images keyed by page id (minimum
//! capacity 100, per spec), a logical file size counter seeded from the OS,
//! and the raw file handle used for positional reads and writes. Dirty pages
//! are held separately in a plain map, never subject to the LRU's capacity
//! eviction — a dirty page must survive until `flush` regardless of how many
//! other pages are touched first (spec §4.2).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use moka::sync::Cache;
use shard_common::{PageId, StorageError};

/// Hard cap on file growth from offset 0, guarding against runaway page ids.
pub const MAX_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Minimum accepted cache capacity, enforced by callers at `open()`.
pub const MIN_CACHE_CAPACITY: u64 = 100;

pub struct BufferCache {
    file: File,
    cache: Cache<PageId, Arc<Vec<u8>>>,
    dirty: BTreeMap<PageId, Arc<Vec<u8>>>,
    logical_size: u64,
    page_size: usize,
}

impl BufferCache {
    pub fn open(file: File, page_size: usize, capacity: u64) -> Result<Self, StorageError> {
        let logical_size = file.metadata()?.len();
        Ok(Self {
            file,
            cache: Cache::new(capacity.max(MIN_CACHE_CAPACITY)),
            dirty: BTreeMap::new(),
            logical_size,
            page_size,
        })
    }

    fn offset_of(&self, page_id: PageId) -> Result<u64, StorageError> {
        let offset = (page_id as u64)
            .checked_mul(self.page_size as u64)
            .ok_or_else(|| StorageError::SafetyLimit("page id overflow".into()))?;
        if offset + self.page_size as u64 > MAX_FILE_SIZE {
            return Err(StorageError::SafetyLimit(format!(
                "page {page_id} would extend file past the {MAX_FILE_SIZE}-byte safety cap"
            )));
        }
        Ok(offset)
    }

    /// Read a page: dirty copy if present, else the clean LRU, else disk.
    /// Reading past the logical end of file returns a zeroed page rather
    /// than an error (a page is only real once it has been written).
    pub fn read(&mut self, page_id: PageId) -> Result<Vec<u8>, StorageError> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok((**page).clone());
        }
        if let Some(page) = self.cache.get(&page_id) {
            return Ok((*page).clone());
        }

        let offset = self.offset_of(page_id)?;
        if offset >= self.logical_size {
            return Ok(vec![0u8; self.page_size]);
        }

        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        self.cache.insert(page_id, Arc::new(buf.clone()));
        Ok(buf)
    }

    /// Record a page as dirty, extending the logical file size as needed.
    /// Never touches disk on its own. Dirty pages live in their own map, not
    /// the evictable LRU, so a capacity-bound cache can never lose a write
    /// that hasn't reached disk yet.
    pub fn write(&mut self, page_id: PageId, bytes: Vec<u8>) -> Result<(), StorageError> {
        debug_assert_eq!(bytes.len(), self.page_size);
        let offset = self.offset_of(page_id)?;
        self.logical_size = self.logical_size.max(offset + self.page_size as u64);
        self.cache.invalidate(&page_id);
        self.dirty.insert(page_id, Arc::new(bytes));
        Ok(())
    }

    /// Write every dirty page to disk in ascending id order (sequential
    /// I/O); does not fsync. Flushed pages move into the clean LRU, where
    /// they are subject to ordinary capacity eviction again.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        for (page_id, page) in std::mem::take(&mut self.dirty) {
            let offset = self.offset_of(page_id)?;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&page)?;
            self.cache.insert(page_id, page);
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn exists(&self, page_id: PageId) -> bool {
        match self.offset_of(page_id) {
            Ok(offset) => offset < self.logical_size,
            Err(_) => false,
        }
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    pub fn page_count(&self) -> u32 {
        (self.logical_size / self.page_size as u64) as u32
    }
}
