//! Slotted data page layout: rows are appended from the start of the body
//! forward; a per-slot offset table grows from the end of the body backward,
//! two bytes per slot. A new insert always lands at
//! `slot_index = current inserted row count`.
//!
//! Row layout (packed): `flags(1) | body_size(2) | pk(6) | body(body_size)`.

use shard_common::{decode_u48, encode_u48};

use crate::codec::{body, body_mut, header, restamp, set_remaining_capacity, set_row_count, Page};

pub const ROW_HEADER_SIZE: usize = 1 + 2 + 6;
pub const SLOT_SIZE: usize = 2;

pub const FLAG_DELETED: u8 = 0x01;
pub const FLAG_OVERFLOW: u8 = 0x04;

pub struct RowView<'a> {
    pub flags: u8,
    pub pk: u64,
    pub body: &'a [u8],
}

impl<'a> RowView<'a> {
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    pub fn is_overflow(&self) -> bool {
        self.flags & FLAG_OVERFLOW != 0
    }
}

fn slot_table_bytes(row_count: u32) -> usize {
    row_count as usize * SLOT_SIZE
}

/// Byte offset within the body where the next inserted row would start.
pub fn row_region_end(page: &Page) -> usize {
    let h = header(page);
    let body_len = body(page).len();
    body_len - h.remaining_capacity as usize - slot_table_bytes(h.row_count)
}

/// Bytes a new row of this body length would consume, including its slot
/// table entry.
pub fn required_space(row_body_len: usize) -> usize {
    ROW_HEADER_SIZE + row_body_len + SLOT_SIZE
}

pub fn has_room(page: &Page, row_body_len: usize) -> bool {
    header(page).remaining_capacity as usize >= required_space(row_body_len)
}

/// Insert a row, returning its slot index. Caller must have checked
/// `has_room` first.
pub fn insert_row(page: &mut Page, flags: u8, pk: u64, row_body: &[u8]) -> u16 {
    let h = header(page);
    let region_end = row_region_end(page);
    let row_len = ROW_HEADER_SIZE + row_body.len();
    let slot_index = h.row_count;

    {
        let body = body_mut(page);
        body[region_end] = flags;
        body[region_end + 1..region_end + 3]
            .copy_from_slice(&(row_body.len() as u16).to_le_bytes());
        encode_u48(pk, &mut body[region_end + 3..region_end + 9]);
        body[region_end + 9..region_end + 9 + row_body.len()].copy_from_slice(row_body);

        let new_slot_pos = body.len() - slot_table_bytes(h.row_count) - SLOT_SIZE;
        body[new_slot_pos..new_slot_pos + 2].copy_from_slice(&(region_end as u16).to_le_bytes());
    }

    let new_remaining = h.remaining_capacity as usize - row_len - SLOT_SIZE;
    set_row_count(page, h.row_count + 1);
    set_remaining_capacity(page, new_remaining as u32);
    restamp(page);
    slot_index as u16
}

fn slot_offset(page: &Page, slot_index: u16) -> usize {
    let body = body(page);
    let pos = body.len() - (slot_index as usize + 1) * SLOT_SIZE;
    u16::from_le_bytes([body[pos], body[pos + 1]]) as usize
}

pub fn read_row(page: &Page, slot_index: u16) -> RowView<'_> {
    let off = slot_offset(page, slot_index);
    let body = body(page);
    let flags = body[off];
    let body_size = u16::from_le_bytes([body[off + 1], body[off + 2]]) as usize;
    let pk = decode_u48(&body[off + 3..off + 9]);
    RowView {
        flags,
        pk,
        body: &body[off + 9..off + 9 + body_size],
    }
}

pub fn mark_deleted(page: &mut Page, slot_index: u16) {
    let off = slot_offset(page, slot_index);
    body_mut(page)[off] |= FLAG_DELETED;
    restamp(page);
}

/// Rewrite a row's body in place. The new body must be no larger than the
/// slot's original body capacity (callers relocate rows that grow).
pub fn rewrite_row_in_place(page: &mut Page, slot_index: u16, flags: u8, new_body: &[u8]) {
    let off = slot_offset(page, slot_index);
    let body = body_mut(page);
    body[off] = flags;
    body[off + 1..off + 3].copy_from_slice(&(new_body.len() as u16).to_le_bytes());
    body[off + 9..off + 9 + new_body.len()].copy_from_slice(new_body);
    restamp(page);
}

pub fn existing_body_size(page: &Page, slot_index: u16) -> usize {
    let off = slot_offset(page, slot_index);
    let body = body(page);
    u16::from_le_bytes([body[off + 1], body[off + 2]]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use shard_common::PageKind;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn insert_and_read_back() {
        let mut page = vec![0u8; PAGE_SIZE];
        codec::init(&mut page, PageKind::Data, 1, PAGE_SIZE);

        let slot = insert_row(&mut page, 0, 1, b"hello");
        assert_eq!(slot, 0);
        let row = read_row(&page, slot);
        assert_eq!(row.pk, 1);
        assert_eq!(row.body, b"hello");
        assert!(!row.is_deleted());
        assert!(codec::verify(&page));
    }

    #[test]
    fn multiple_inserts_get_increasing_slots() {
        let mut page = vec![0u8; PAGE_SIZE];
        codec::init(&mut page, PageKind::Data, 1, PAGE_SIZE);

        let s0 = insert_row(&mut page, 0, 1, b"aaa");
        let s1 = insert_row(&mut page, 0, 2, b"bbbb");
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        assert_eq!(read_row(&page, s0).body, b"aaa");
        assert_eq!(read_row(&page, s1).body, b"bbbb");
    }

    #[test]
    fn delete_sets_flag_without_removing_bytes() {
        let mut page = vec![0u8; PAGE_SIZE];
        codec::init(&mut page, PageKind::Data, 1, PAGE_SIZE);
        let slot = insert_row(&mut page, 0, 5, b"x");
        mark_deleted(&mut page, slot);
        assert!(read_row(&page, slot).is_deleted());
    }

    #[test]
    fn shrink_rewrite_preserves_slot() {
        let mut page = vec![0u8; PAGE_SIZE];
        codec::init(&mut page, PageKind::Data, 1, PAGE_SIZE);
        let slot = insert_row(&mut page, 0, 1, b"0123456789");
        rewrite_row_in_place(&mut page, slot, 0, b"abc");
        let row = read_row(&page, slot);
        assert_eq!(row.body, b"abc");
    }

    #[test]
    fn remaining_capacity_shrinks_as_rows_added() {
        let mut page = vec![0u8; PAGE_SIZE];
        codec::init(&mut page, PageKind::Data, 1, PAGE_SIZE);
        let before = codec::header(&page).remaining_capacity;
        insert_row(&mut page, 0, 1, b"12345");
        let after = codec::header(&page).remaining_capacity;
        assert_eq!(before as usize - after as usize, required_space(5));
    }
}
