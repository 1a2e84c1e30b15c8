use std::collections::BTreeMap;
use std::path::Path;

use shard_common::{verify_page_crc, StorageError};

use crate::reader::{ReadResult, WalReader};
use crate::MAX_SANE_PAGE_ID;

/// Result of scanning a WAL file for recovery: the page images of every
/// terminated (marker-closed) transaction, later transactions overriding
/// earlier ones on conflicting page ids.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    pub pages: BTreeMap<u32, Vec<u8>>,
    pub transactions_replayed: usize,
}

/// Scan a WAL file and compute the set of pages that should be durably
/// written to the main data file, per spec:
///
/// 1. Scan sequentially in entry-sized steps; a torn trailing entry is
///    discarded.
/// 2. Maintain a pending map per in-flight transaction. Non-marker entries
///    overwrite the pending slot for that page id. A marker promotes every
///    pending entry into the committed map and clears pending.
///    Unterminated trailing pending entries are discarded.
/// 3. Reject committed page ids above the sanity bound; verify CRC and skip
///    with a warning on mismatch.
///
/// This function does not touch the data file or the WAL file itself —
/// callers apply `pages` to the data file, fsync it, and then truncate the
/// WAL (the checkpoint side of the protocol).
pub fn recover(wal_path: &Path, page_size: usize) -> Result<RecoveryResult, StorageError> {
    if !wal_path.exists() {
        return Ok(RecoveryResult::default());
    }

    let mut reader = WalReader::open(wal_path, page_size)?;
    let (entries, torn) = reader.scan_all()?;
    if torn {
        tracing::warn!(path = %wal_path.display(), "WAL recovery: torn trailing entry discarded");
    }

    let mut pending: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut committed: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    let mut transactions_replayed = 0usize;

    for entry in entries {
        match entry {
            ReadResult::Page { page_id, body } => {
                pending.insert(page_id, body);
            }
            ReadResult::Marker => {
                for (page_id, body) in pending.drain() {
                    committed.insert(page_id, body);
                }
                transactions_replayed += 1;
            }
            ReadResult::Eof | ReadResult::Torn { .. } => unreachable!("scan_all stops on these"),
        }
    }
    if !pending.is_empty() {
        tracing::warn!(
            count = pending.len(),
            "WAL recovery: discarding unterminated trailing transaction"
        );
    }

    let mut pages = BTreeMap::new();
    for (page_id, body) in committed {
        if page_id > MAX_SANE_PAGE_ID {
            tracing::warn!(page_id, "WAL recovery: page id exceeds sanity bound, skipping");
            continue;
        }
        if !verify_page_crc(&body) {
            tracing::warn!(page_id, "WAL recovery: CRC mismatch, skipping page");
            continue;
        }
        pages.insert(page_id, body);
    }

    tracing::info!(
        transactions_replayed,
        pages = pages.len(),
        "WAL recovery scan complete"
    );

    Ok(RecoveryResult {
        pages,
        transactions_replayed,
    })
}
