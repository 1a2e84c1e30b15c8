use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use shard_common::StorageError;

use crate::{entry_size, COMMIT_MARKER};

/// Append-only WAL writer. Each entry is `4 + page_size` bytes: a little-endian
/// page id followed by the page's full body. The sentinel page id
/// `0xFFFFFFFF` marks a commit marker rather than a page image.
pub struct WalWriter {
    writer: BufWriter<File>,
    page_size: usize,
}

impl WalWriter {
    /// Open (or create) a WAL file for appending.
    pub fn open(path: &Path, page_size: usize) -> Result<Self, StorageError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            page_size,
        })
    }

    /// Write one page-image entry. Does not flush or sync.
    pub fn append_page(&mut self, page_id: u32, body: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(body.len(), self.page_size);
        self.writer.write_all(&page_id.to_le_bytes())?;
        self.writer.write_all(body)?;
        Ok(())
    }

    /// Write a batch of page images in one go. Does not flush or sync.
    pub fn append_batch(&mut self, pages: &[(u32, Vec<u8>)]) -> Result<(), StorageError> {
        for (page_id, body) in pages {
            self.append_page(*page_id, body)?;
        }
        Ok(())
    }

    /// Write the commit marker entry (sentinel id, zeroed body). Does not
    /// flush or sync — callers fsync separately per the prepare/finalize
    /// protocol.
    pub fn append_commit_marker(&mut self) -> Result<(), StorageError> {
        self.writer.write_all(&COMMIT_MARKER.to_le_bytes())?;
        let zero = vec![0u8; self.page_size];
        self.writer.write_all(&zero)?;
        Ok(())
    }

    /// Flush buffered writes to the OS without fsyncing.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync the underlying file to ensure durability.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn entry_size(&self) -> usize {
        entry_size(self.page_size)
    }
}
