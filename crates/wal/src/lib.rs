pub mod reader;
pub mod recovery;
pub mod writer;

pub use reader::WalReader;
pub use recovery::{recover, RecoveryResult};
pub use writer::WalWriter;

/// Sentinel page id that marks a commit marker entry rather than a page image.
pub const COMMIT_MARKER: u32 = 0xFFFF_FFFF;

/// Page ids above this are never legitimate; recovery treats them as corrupt.
pub const MAX_SANE_PAGE_ID: u32 = 1_000_000;

/// Size in bytes of one WAL entry for a given page size: `4 + page_size`.
pub fn entry_size(page_size: usize) -> usize {
    4 + page_size
}
