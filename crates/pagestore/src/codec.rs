//! Typed read/write accessors for the page header shared by every page kind.
//!
//! All multi-byte integers are little-endian. A page's CRC32 covers the body
//! only (everything past the 100-byte header) and is recomputed before every
//! persistence.

use shard_common::{
    compute_body_crc32, restamp_crc, verify_page_crc, PageHeader, PageId, PageKind,
    NO_PAGE, PAGE_HEADER_SIZE,
};

/// An owned page image. Sized to the engine's configured page size.
pub type Page = Vec<u8>;

/// Body capacity (bytes available past the header) for a given page size.
pub fn body_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE
}

pub fn kind_of(page: &Page) -> PageKind {
    PageKind::from_u8(page[0])
}

/// Initialize a freshly allocated page in place: zero the body, stamp the
/// header for `kind`/`id`/`next`, and recompute the CRC. A newly allocated
/// page always has `next = NO_PAGE` and full remaining capacity.
pub fn init(page: &mut Page, kind: PageKind, id: PageId, page_size: usize) {
    page.clear();
    page.resize(page_size, 0);
    let header = PageHeader {
        kind,
        page_id: id,
        next_page_id: NO_PAGE,
        row_count: 0,
        remaining_capacity: body_capacity(page_size) as u32,
        crc32: 0,
    };
    header.encode(page);
    restamp_crc(page);
}

pub fn header(page: &Page) -> PageHeader {
    PageHeader::decode(page)
}

pub fn set_header(page: &mut Page, header: &PageHeader) {
    header.encode(page);
    restamp_crc(page);
}

pub fn set_next_page_id(page: &mut Page, next: PageId) {
    let mut h = header(page);
    h.next_page_id = next;
    set_header(page, &h);
}

pub fn set_row_count(page: &mut Page, row_count: u32) {
    let mut h = header(page);
    h.row_count = row_count;
    set_header(page, &h);
}

pub fn set_remaining_capacity(page: &mut Page, remaining: u32) {
    let mut h = header(page);
    h.remaining_capacity = remaining;
    set_header(page, &h);
}

/// `true` if the stored CRC matches a fresh computation over the body.
pub fn verify(page: &Page) -> bool {
    verify_page_crc(page)
}

/// Recompute and stamp the body CRC. Call after any body mutation.
pub fn restamp(page: &mut Page) {
    restamp_crc(page);
}

pub fn body(page: &Page) -> &[u8] {
    &page[PAGE_HEADER_SIZE..]
}

pub fn body_mut(page: &mut Page) -> &mut [u8] {
    &mut page[PAGE_HEADER_SIZE..]
}

pub fn crc_of_body(page: &Page) -> u32 {
    compute_body_crc32(page)
}
