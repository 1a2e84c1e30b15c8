use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use shard_common::StorageError;

use crate::COMMIT_MARKER;

/// Reads fixed-size `4 + page_size` entries from a WAL file.
pub struct WalReader {
    file: File,
    page_size: usize,
}

/// Outcome of reading one entry at the current file position.
#[derive(Debug)]
pub enum ReadResult {
    /// A page image entry.
    Page { page_id: u32, body: Vec<u8> },
    /// A commit marker entry.
    Marker,
    /// Clean end of file — no partial bytes remained.
    Eof,
    /// A torn trailing write: fewer than one full entry remained.
    Torn { file_offset: u64 },
}

impl WalReader {
    pub fn open(path: &Path, page_size: usize) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        Ok(Self { file, page_size })
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn seek_start(&mut self) -> Result<(), StorageError> {
        self.seek_to(0)
    }

    pub fn stream_position(&mut self) -> Result<u64, StorageError> {
        Ok(self.file.stream_position()?)
    }

    /// Read one entry starting at the current position.
    pub fn read_entry(&mut self) -> Result<ReadResult, StorageError> {
        let file_offset = self.file.stream_position()?;

        let mut id_buf = [0u8; 4];
        match self.file.read_exact(&mut id_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadResult::Eof),
            Err(e) => return Err(e.into()),
        }

        let mut body = vec![0u8; self.page_size];
        match self.file.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(ReadResult::Torn { file_offset });
            }
            Err(e) => return Err(e.into()),
        }

        let page_id = u32::from_le_bytes(id_buf);
        if page_id == COMMIT_MARKER {
            Ok(ReadResult::Marker)
        } else {
            Ok(ReadResult::Page { page_id, body })
        }
    }

    /// Scan the whole file from the start, stopping at EOF or a torn entry.
    /// Returns the decoded entries in file order plus whether the scan was
    /// cut short by a torn write.
    pub fn scan_all(&mut self) -> Result<(Vec<ReadResult>, bool), StorageError> {
        self.seek_start()?;
        let mut entries = Vec::new();
        loop {
            match self.read_entry()? {
                ReadResult::Eof => return Ok((entries, false)),
                ReadResult::Torn { .. } => return Ok((entries, true)),
                other => entries.push(other),
            }
        }
    }
}
