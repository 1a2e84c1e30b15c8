//! Typed accessors for the metadata page (page id 0).
//!
//! Layout starting at offset 100 (the body start): magic string `"SHARD"`,
//! then page count, page size, row count, root index page id, root index
//! order, last-insert page id, last row PK, bitmap page id, free-page list
//! head.

use shard_common::{decode_u48, encode_u48, PageId, MAGIC, NO_PAGE, PAGE_HEADER_SIZE};

use crate::codec::Page;

const OFF_MAGIC: usize = PAGE_HEADER_SIZE;
const OFF_PAGE_COUNT: usize = OFF_MAGIC + MAGIC.len();
const OFF_PAGE_SIZE: usize = OFF_PAGE_COUNT + 4;
const OFF_ROW_COUNT: usize = OFF_PAGE_SIZE + 4;
const OFF_ROOT_INDEX_PAGE_ID: usize = OFF_ROW_COUNT + 8;
const OFF_ROOT_INDEX_ORDER: usize = OFF_ROOT_INDEX_PAGE_ID + 4;
const OFF_LAST_INSERT_PAGE_ID: usize = OFF_ROOT_INDEX_ORDER + 4;
const OFF_LAST_ROW_PK: usize = OFF_LAST_INSERT_PAGE_ID + 4;
const OFF_BITMAP_PAGE_ID: usize = OFF_LAST_ROW_PK + 6;
const OFF_FREE_PAGE_LIST_HEAD: usize = OFF_BITMAP_PAGE_ID + 4;

/// Total bytes of the metadata layout, for sizing/overlap sanity checks.
pub const METADATA_LAYOUT_SIZE: usize = OFF_FREE_PAGE_LIST_HEAD + 4 - PAGE_HEADER_SIZE;

pub fn check_magic(page: &Page) -> bool {
    &page[OFF_MAGIC..OFF_MAGIC + MAGIC.len()] == MAGIC
}

pub fn write_magic(page: &mut Page) {
    page[OFF_MAGIC..OFF_MAGIC + MAGIC.len()].copy_from_slice(MAGIC);
}

macro_rules! u32_field {
    ($get:ident, $set:ident, $off:expr) => {
        pub fn $get(page: &Page) -> u32 {
            u32::from_le_bytes(page[$off..$off + 4].try_into().unwrap())
        }

        pub fn $set(page: &mut Page, value: u32) {
            page[$off..$off + 4].copy_from_slice(&value.to_le_bytes());
        }
    };
}

macro_rules! u64_field {
    ($get:ident, $set:ident, $off:expr) => {
        pub fn $get(page: &Page) -> u64 {
            u64::from_le_bytes(page[$off..$off + 8].try_into().unwrap())
        }

        pub fn $set(page: &mut Page, value: u64) {
            page[$off..$off + 8].copy_from_slice(&value.to_le_bytes());
        }
    };
}

u32_field!(page_count, set_page_count, OFF_PAGE_COUNT);
u32_field!(page_size, set_page_size, OFF_PAGE_SIZE);
u64_field!(row_count, set_row_count, OFF_ROW_COUNT);
u32_field!(root_index_page_id_raw, set_root_index_page_id_raw, OFF_ROOT_INDEX_PAGE_ID);
u32_field!(root_index_order, set_root_index_order, OFF_ROOT_INDEX_ORDER);
u32_field!(
    last_insert_page_id_raw,
    set_last_insert_page_id_raw,
    OFF_LAST_INSERT_PAGE_ID
);
u32_field!(bitmap_page_id_raw, set_bitmap_page_id_raw, OFF_BITMAP_PAGE_ID);
u32_field!(
    free_page_list_head_raw,
    set_free_page_list_head_raw,
    OFF_FREE_PAGE_LIST_HEAD
);

pub fn last_row_pk(page: &Page) -> u64 {
    decode_u48(&page[OFF_LAST_ROW_PK..OFF_LAST_ROW_PK + 6])
}

pub fn set_last_row_pk(page: &mut Page, pk: u64) {
    encode_u48(pk, &mut page[OFF_LAST_ROW_PK..OFF_LAST_ROW_PK + 6]);
}

/// Sentinel-aware accessors: the on-disk `0xFFFFFFFF` reads back as "no page".
pub fn root_index_page_id(page: &Page) -> Option<PageId> {
    optional(root_index_page_id_raw(page))
}

pub fn set_root_index_page_id(page: &mut Page, id: Option<PageId>) {
    set_root_index_page_id_raw(page, id.unwrap_or(NO_PAGE));
}

pub fn last_insert_page_id(page: &Page) -> Option<PageId> {
    optional(last_insert_page_id_raw(page))
}

pub fn set_last_insert_page_id(page: &mut Page, id: Option<PageId>) {
    set_last_insert_page_id_raw(page, id.unwrap_or(NO_PAGE));
}

pub fn bitmap_page_id(page: &Page) -> Option<PageId> {
    optional(bitmap_page_id_raw(page))
}

pub fn set_bitmap_page_id(page: &mut Page, id: Option<PageId>) {
    set_bitmap_page_id_raw(page, id.unwrap_or(NO_PAGE));
}

pub fn free_page_list_head(page: &Page) -> Option<PageId> {
    optional(free_page_list_head_raw(page))
}

pub fn set_free_page_list_head(page: &mut Page, id: Option<PageId>) {
    set_free_page_list_head_raw(page, id.unwrap_or(NO_PAGE));
}

fn optional(raw: PageId) -> Option<PageId> {
    if raw == NO_PAGE {
        None
    } else {
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use shard_common::PageKind;

    #[test]
    fn magic_and_fields_roundtrip() {
        let mut page = vec![0u8; 4096];
        codec::init(&mut page, PageKind::Metadata, 0, 4096);
        write_magic(&mut page);
        assert!(check_magic(&page));

        set_page_count(&mut page, 7);
        set_page_size(&mut page, 4096);
        set_row_count(&mut page, 123);
        set_root_index_page_id(&mut page, Some(2));
        set_root_index_order(&mut page, 64);
        set_last_insert_page_id(&mut page, None);
        set_last_row_pk(&mut page, 99);
        set_bitmap_page_id(&mut page, Some(1));
        set_free_page_list_head(&mut page, None);

        assert_eq!(page_count(&page), 7);
        assert_eq!(page_size(&page), 4096);
        assert_eq!(row_count(&page), 123);
        assert_eq!(root_index_page_id(&page), Some(2));
        assert_eq!(root_index_order(&page), 64);
        assert_eq!(last_insert_page_id(&page), None);
        assert_eq!(last_row_pk(&page), 99);
        assert_eq!(bitmap_page_id(&page), Some(1));
        assert_eq!(free_page_list_head(&page), None);
    }

    #[test]
    fn layout_fits_in_smallest_page() {
        assert!(METADATA_LAYOUT_SIZE < 4096 - PAGE_HEADER_SIZE);
    }
}
