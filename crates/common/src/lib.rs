use async_trait::async_trait;
use std::fmt;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Logical page identifier, stable across the lifetime of the data file.
pub type PageId = u32;

/// Sentinel stored on disk for "no page".
pub const NO_PAGE: PageId = 0xFFFF_FFFF;

/// Fixed header every page kind carries at offset 0.
pub const PAGE_HEADER_SIZE: usize = 100;

/// Smallest page size the format allows, and the required alignment.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Magic string stamped into the metadata page.
pub const MAGIC: &[u8] = b"SHARD";

/// Monotonic primary key, a 48-bit counter widened to u64 in memory.
pub type Pk = u64;

/// A 48-bit field occupies this many bytes on disk, low byte first.
pub const FIELD48_SIZE: usize = 6;

pub fn encode_u48(value: u64, out: &mut [u8]) {
    debug_assert!(out.len() >= FIELD48_SIZE);
    let bytes = value.to_le_bytes();
    out[..FIELD48_SIZE].copy_from_slice(&bytes[..FIELD48_SIZE]);
}

pub fn decode_u48(buf: &[u8]) -> u64 {
    debug_assert!(buf.len() >= FIELD48_SIZE);
    let mut bytes = [0u8; 8];
    bytes[..FIELD48_SIZE].copy_from_slice(&buf[..FIELD48_SIZE]);
    u64::from_le_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Page kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageKind {
    Unknown = 0,
    Empty = 1,
    Metadata = 2,
    Bitmap = 3,
    Index = 4,
    Data = 5,
    Overflow = 6,
}

impl PageKind {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => PageKind::Empty,
            2 => PageKind::Metadata,
            3 => PageKind::Bitmap,
            4 => PageKind::Index,
            5 => PageKind::Data,
            6 => PageKind::Overflow,
            _ => PageKind::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Record identifier
// ---------------------------------------------------------------------------

/// `(page_id, slot_index)` physical locator of a row, packed as
/// `slot_index(2) | page_id(4)` on disk and numerically
/// `page_id * 65536 + slot_index` when stored as a B+Tree value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u16,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    pub fn to_u64(self) -> u64 {
        (self.page_id as u64) * 65536 + self.slot as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            page_id: (value / 65536) as PageId,
            slot: (value % 65536) as u16,
        }
    }

    pub fn encode(self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.slot.to_le_bytes());
        out[2..6].copy_from_slice(&self.page_id.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        let slot = u16::from_le_bytes([buf[0], buf[1]]);
        let page_id = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        Self { page_id, slot }
    }
}

// ---------------------------------------------------------------------------
// Shared page header codec
//
// Lives here (rather than in shard-pagestore, which owns the richer typed
// per-kind accessors) so that shard-wal's recovery scan can verify a page's
// CRC without depending on shard-pagestore, which itself depends on
// shard-wal.
// ---------------------------------------------------------------------------

/// The fixed 100-byte header every page carries at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub kind: PageKind,
    pub page_id: PageId,
    pub next_page_id: PageId,
    pub row_count: u32,
    pub remaining_capacity: u32,
    pub crc32: u32,
}

impl PageHeader {
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PAGE_HEADER_SIZE);
        out[0] = self.kind.as_u8();
        out[1..5].copy_from_slice(&self.page_id.to_le_bytes());
        out[5..9].copy_from_slice(&self.next_page_id.to_le_bytes());
        out[9..13].copy_from_slice(&self.row_count.to_le_bytes());
        out[13..17].copy_from_slice(&self.remaining_capacity.to_le_bytes());
        out[17..21].copy_from_slice(&self.crc32.to_le_bytes());
        for b in &mut out[21..PAGE_HEADER_SIZE] {
            *b = 0;
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= PAGE_HEADER_SIZE);
        Self {
            kind: PageKind::from_u8(buf[0]),
            page_id: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
            next_page_id: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            row_count: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
            remaining_capacity: u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
            crc32: u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]),
        }
    }
}

/// CRC32 of a page's body (everything past the 100-byte header).
pub fn compute_body_crc32(page: &[u8]) -> u32 {
    debug_assert!(page.len() > PAGE_HEADER_SIZE);
    crc32fast::hash(&page[PAGE_HEADER_SIZE..])
}

/// Recompute and compare against the checksum stored in the header.
pub fn verify_page_crc(page: &[u8]) -> bool {
    if page.len() <= PAGE_HEADER_SIZE {
        return false;
    }
    let stored = u32::from_le_bytes([page[17], page[18], page[19], page[20]]);
    stored == compute_body_crc32(page)
}

/// Stamp the header's CRC field from the current body contents.
pub fn restamp_crc(page: &mut [u8]) {
    let crc = compute_body_crc32(page);
    page[17..21].copy_from_slice(&crc.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Engine-level metadata snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetadata {
    pub page_size: u32,
    pub page_count: u32,
    pub row_count: u64,
}

impl fmt::Display for EngineMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineMetadata(page_size={}, page_count={}, row_count={})",
            self.page_size, self.page_count, self.row_count
        )
    }
}

// ---------------------------------------------------------------------------
// EngineApi — the façade <-> engine boundary
// ---------------------------------------------------------------------------

/// Opaque handle to an open transaction, as seen by the façade. The engine
/// owns the real transaction state; the façade only ever holds this id.
pub type TxId = u64;

#[async_trait]
pub trait EngineApi: Send + Sync {
    async fn begin_tx(&self) -> Result<TxId, StorageError>;
    async fn commit(&self, tx: TxId) -> Result<(), StorageError>;
    async fn rollback(&self, tx: TxId) -> Result<(), StorageError>;

    async fn insert(&self, bytes: Vec<u8>, tx: Option<TxId>) -> Result<Pk, StorageError>;
    async fn insert_batch(
        &self,
        items: Vec<Vec<u8>>,
        tx: Option<TxId>,
    ) -> Result<Vec<Pk>, StorageError>;
    async fn update(&self, pk: Pk, bytes: Vec<u8>, tx: Option<TxId>) -> Result<(), StorageError>;
    async fn delete(&self, pk: Pk, tx: Option<TxId>) -> Result<(), StorageError>;
    async fn select(&self, pk: Pk, tx: Option<TxId>) -> Result<Option<Vec<u8>>, StorageError>;
    async fn select_many(
        &self,
        pks: Vec<Pk>,
        tx: Option<TxId>,
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError>;
    async fn metadata(&self, tx: Option<TxId>) -> Result<EngineMetadata, StorageError>;
    async fn close(&self) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("safety limit exceeded: {0}")]
    SafetyLimit(String),

    #[error("usage error: {0}")]
    Usage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_roundtrip() {
        let rid = Rid::new(42, 7);
        assert_eq!(rid.to_u64(), 42 * 65536 + 7);
        assert_eq!(Rid::from_u64(rid.to_u64()), rid);

        let mut buf = [0u8; 6];
        rid.encode(&mut buf);
        assert_eq!(Rid::decode(&buf), rid);
    }

    #[test]
    fn u48_roundtrip() {
        let mut buf = [0u8; 8];
        encode_u48(0x0000_BEEF_CAFE, &mut buf);
        assert_eq!(decode_u48(&buf), 0x0000_BEEF_CAFE);
    }

    #[test]
    fn header_roundtrip() {
        let header = PageHeader {
            kind: PageKind::Data,
            page_id: 3,
            next_page_id: NO_PAGE,
            row_count: 5,
            remaining_capacity: 1000,
            crc32: 0,
        };
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        header.encode(&mut buf);
        let decoded = PageHeader::decode(&buf);
        assert_eq!(decoded.kind, header.kind);
        assert_eq!(decoded.page_id, header.page_id);
        assert_eq!(decoded.next_page_id, NO_PAGE);
        assert_eq!(decoded.row_count, 5);
        assert_eq!(decoded.remaining_capacity, 1000);
    }

    #[test]
    fn crc_detects_tamper() {
        let mut page = vec![0u8; MIN_PAGE_SIZE];
        page[PAGE_HEADER_SIZE] = 0xAB;
        restamp_crc(&mut page);
        assert!(verify_page_crc(&page));
        page[PAGE_HEADER_SIZE + 1] = 0xCD;
        assert!(!verify_page_crc(&page));
    }

    #[test]
    fn page_kind_roundtrip() {
        for tag in 0u8..=6 {
            let kind = PageKind::from_u8(tag);
            assert_eq!(kind.as_u8(), tag);
        }
        assert_eq!(PageKind::from_u8(200), PageKind::Unknown);
    }
}
