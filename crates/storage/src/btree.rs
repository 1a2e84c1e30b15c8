//! On-disk B+Tree: keyed (PK → RID) lookup over index pages (spec §3.9, §4.7).
//!
//! Physical nodes are allocated/freed through the page-file system so index
//! storage shares one budget and one WAL/lock discipline with data pages.
//! Only the operations the row/table engine needs are exposed: point
//! insert, point delete, and equality lookup.

use shard_common::{PageId, PageKind, StorageError, PAGE_HEADER_SIZE};
use shard_pagestore::codec::Page;
use shard_pagestore::{index, metadata};

use crate::ctx::Ctx;
use crate::pagefile;

#[derive(Debug, Clone, Copy)]
pub struct IndexHead {
    pub root: Option<PageId>,
    pub order: usize,
}

pub fn read_head(meta: &Page, page_size: usize) -> IndexHead {
    let order = metadata::root_index_order(meta) as usize;
    IndexHead {
        root: metadata::root_index_page_id(meta),
        order: if order == 0 {
            index::order_for(page_size, PAGE_HEADER_SIZE + index::PREAMBLE_SIZE)
        } else {
            order
        },
    }
}

pub fn write_head(meta: &mut Page, head: &IndexHead) {
    metadata::set_root_index_page_id(meta, head.root);
    metadata::set_root_index_order(meta, head.order as u32);
}

fn read_all(page: &Page, order: usize) -> (Vec<u64>, Vec<u64>) {
    let keys = (0..index::keys_count(page))
        .map(|i| index::key_at(page, order, i))
        .collect();
    let values = (0..index::values_count(page))
        .map(|i| index::value_at(page, order, i))
        .collect();
    (keys, values)
}

fn write_all(page: &mut Page, order: usize, keys: &[u64], values: &[u64]) {
    for (i, k) in keys.iter().enumerate() {
        index::set_key_at(page, order, i, *k);
    }
    for (i, v) in values.iter().enumerate() {
        index::set_value_at(page, order, i, *v);
    }
    index::set_keys_count(page, keys.len());
    index::set_values_count(page, values.len());
}

/// Insert a new separator key and right-child pointer into an internal
/// node at `child_index` (the position of the existing left child).
fn insert_separator(page: &mut Page, order: usize, child_index: usize, key: u64, right_child: PageId) {
    let (mut keys, mut values) = read_all(page, order);
    keys.insert(child_index, key);
    values.insert(child_index + 1, right_child as u64);
    write_all(page, order, &keys, &values);
}

fn find_child_index(page: &Page, order: usize, child_id: PageId) -> usize {
    let values_count = index::values_count(page);
    (0..values_count)
        .find(|&i| index::value_at(page, order, i) == child_id as u64)
        .expect("child id must be present among its parent's children")
}

fn new_leaf(ctx: &mut Ctx) -> Result<PageId, StorageError> {
    let id = pagefile::append_new_page(ctx, PageKind::Index)?;
    let mut page = pagefile::get_page(ctx, id)?;
    index::set_leaf(&mut page, true);
    index::set_parent(&mut page, None);
    index::set_next(&mut page, None);
    index::set_prev(&mut page, None);
    pagefile::set_page(ctx, id, page)?;
    Ok(id)
}

fn new_internal(ctx: &mut Ctx) -> Result<PageId, StorageError> {
    let id = pagefile::append_new_page(ctx, PageKind::Index)?;
    let mut page = pagefile::get_page(ctx, id)?;
    index::set_leaf(&mut page, false);
    index::set_parent(&mut page, None);
    pagefile::set_page(ctx, id, page)?;
    Ok(id)
}

fn find_leaf(ctx: &mut Ctx, head: &IndexHead, key: u64) -> Result<PageId, StorageError> {
    let mut cur = head.root.expect("find_leaf requires an initialized tree");
    loop {
        let page = pagefile::get_page(ctx, cur)?;
        if index::is_leaf(&page) {
            return Ok(cur);
        }
        let keys_count = index::keys_count(&page);
        let mut child_idx = keys_count;
        for i in 0..keys_count {
            if key < index::key_at(&page, head.order, i) {
                child_idx = i;
                break;
            }
        }
        cur = index::value_at(&page, head.order, child_idx) as PageId;
    }
}

/// Insert `(key, value)`. Splits overflowing nodes bottom-up, growing the
/// tree's height by one when the root itself splits.
pub fn insert(ctx: &mut Ctx, head: &mut IndexHead, key: u64, value: u64) -> Result<(), StorageError> {
    if head.order == 0 {
        head.order = index::order_for(ctx.page_size, PAGE_HEADER_SIZE + index::PREAMBLE_SIZE);
    }

    let Some(root) = head.root else {
        let leaf_id = new_leaf(ctx)?;
        let mut page = pagefile::get_page(ctx, leaf_id)?;
        index::insert_at(&mut page, head.order, 0, key, value);
        pagefile::set_page(ctx, leaf_id, page)?;
        head.root = Some(leaf_id);
        return Ok(());
    };

    let leaf_id = find_leaf(ctx, head, key)?;
    let mut leaf = pagefile::get_page(ctx, leaf_id)?;
    let idx = (0..index::keys_count(&leaf))
        .find(|&i| key < index::key_at(&leaf, head.order, i))
        .unwrap_or(index::keys_count(&leaf));
    index::insert_at(&mut leaf, head.order, idx, key, value);
    pagefile::set_page(ctx, leaf_id, leaf)?;

    let _ = root;
    rebalance_after_insert(ctx, head, leaf_id)
}

/// If `node_id` now holds more keys than `order`, split it and propagate a
/// separator key up to its parent, recursing until no ancestor overflows.
fn rebalance_after_insert(ctx: &mut Ctx, head: &mut IndexHead, node_id: PageId) -> Result<(), StorageError> {
    let page = pagefile::get_page(ctx, node_id)?;
    if index::keys_count(&page) <= head.order {
        return Ok(());
    }

    let is_leaf = index::is_leaf(&page);
    let order = head.order;
    let (keys, values) = read_all(&page, order);
    let parent_id = index::parent(&page);

    let (separator, right_id) = if is_leaf {
        let mid = keys.len() / 2;
        let right_id = new_leaf(ctx)?;

        let mut left = page;
        write_all(&mut left, order, &keys[..mid], &values[..mid]);
        let old_next = index::next(&left);
        index::set_next(&mut left, Some(right_id));

        let mut right = pagefile::get_page(ctx, right_id)?;
        write_all(&mut right, order, &keys[mid..], &values[mid..]);
        index::set_prev(&mut right, Some(node_id));
        index::set_next(&mut right, old_next);
        index::set_parent(&mut right, parent_id);

        if let Some(after_id) = old_next {
            let mut after = pagefile::get_page(ctx, after_id)?;
            index::set_prev(&mut after, Some(right_id));
            pagefile::set_page(ctx, after_id, after)?;
        }

        pagefile::set_page(ctx, node_id, left)?;
        pagefile::set_page(ctx, right_id, right)?;
        (keys[mid], right_id)
    } else {
        let mid = keys.len() / 2;
        let separator = keys[mid];
        let right_id = new_internal(ctx)?;

        let mut left = page;
        write_all(&mut left, order, &keys[..mid], &values[..mid + 1]);

        let mut right = pagefile::get_page(ctx, right_id)?;
        write_all(&mut right, order, &keys[mid + 1..], &values[mid + 1..]);
        index::set_parent(&mut right, parent_id);

        for &child in &values[mid + 1..] {
            let mut child_page = pagefile::get_page(ctx, child as PageId)?;
            index::set_parent(&mut child_page, Some(right_id));
            pagefile::set_page(ctx, child as PageId, child_page)?;
        }

        pagefile::set_page(ctx, node_id, left)?;
        pagefile::set_page(ctx, right_id, right)?;
        (separator, right_id)
    };

    match parent_id {
        None => {
            let new_root_id = new_internal(ctx)?;
            let mut new_root = pagefile::get_page(ctx, new_root_id)?;
            write_all(&mut new_root, order, &[separator], &[node_id as u64, right_id as u64]);
            pagefile::set_page(ctx, new_root_id, new_root)?;

            let mut left = pagefile::get_page(ctx, node_id)?;
            index::set_parent(&mut left, Some(new_root_id));
            pagefile::set_page(ctx, node_id, left)?;

            let mut right = pagefile::get_page(ctx, right_id)?;
            index::set_parent(&mut right, Some(new_root_id));
            pagefile::set_page(ctx, right_id, right)?;

            head.root = Some(new_root_id);
            Ok(())
        }
        Some(parent_id) => {
            let mut parent = pagefile::get_page(ctx, parent_id)?;
            let child_index = find_child_index(&parent, order, node_id);
            insert_separator(&mut parent, order, child_index, separator, right_id);
            pagefile::set_page(ctx, parent_id, parent)?;
            rebalance_after_insert(ctx, head, parent_id)
        }
    }
}

/// Remove the first entry whose key and value both match. Underflowing
/// nodes are not merged or reclaimed (spec §9 open question 4).
pub fn delete(ctx: &mut Ctx, head: &IndexHead, key: u64, value: u64) -> Result<(), StorageError> {
    let Some(_) = head.root else { return Ok(()) };
    let leaf_id = find_leaf(ctx, head, key)?;
    let mut leaf = pagefile::get_page(ctx, leaf_id)?;
    if let Some(idx) = (0..index::keys_count(&leaf)).find(|&i| {
        index::key_at(&leaf, head.order, i) == key && index::value_at(&leaf, head.order, i) == value
    }) {
        index::remove_at(&mut leaf, head.order, idx);
        pagefile::set_page(ctx, leaf_id, leaf)?;
    }
    Ok(())
}

/// Point lookup: every value stored under `key`.
pub fn keys_equal(ctx: &mut Ctx, head: &IndexHead, key: u64) -> Result<Vec<u64>, StorageError> {
    let Some(_) = head.root else { return Ok(Vec::new()) };
    let leaf_id = find_leaf(ctx, head, key)?;
    let leaf = pagefile::get_page(ctx, leaf_id)?;
    Ok((0..index::keys_count(&leaf))
        .filter(|&i| index::key_at(&leaf, head.order, i) == key)
        .map(|i| index::value_at(&leaf, head.order, i))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::tx::Transaction;
    use shard_pagestore::{metadata as md, BufferCache};
    use shard_common::PageKind as PK;
    use tempfile::tempfile;

    const PAGE_SIZE: usize = 4096;

    fn fresh() -> (BufferCache, LockManager, Transaction) {
        let mut buffer = BufferCache::open(tempfile().unwrap(), PAGE_SIZE, 100).unwrap();
        let mut meta = vec![0u8; PAGE_SIZE];
        shard_pagestore::codec::init(&mut meta, PK::Metadata, 0, PAGE_SIZE);
        md::write_magic(&mut meta);
        md::set_page_count(&mut meta, 1);
        shard_pagestore::codec::restamp(&mut meta);
        buffer.write(0, meta).unwrap();
        (buffer, LockManager::new(), Transaction::new(1))
    }

    #[test]
    fn insert_and_lookup_single_key() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        insert(&mut ctx, &mut head, 42, 4242).unwrap();
        assert_eq!(keys_equal(&mut ctx, &head, 42).unwrap(), vec![4242]);
        assert_eq!(keys_equal(&mut ctx, &head, 1).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn many_inserts_force_splits_and_all_keys_remain_findable() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        for k in 0..500u64 {
            insert(&mut ctx, &mut head, k, k * 10).unwrap();
        }
        for k in 0..500u64 {
            assert_eq!(keys_equal(&mut ctx, &head, k).unwrap(), vec![k * 10]);
        }
    }

    #[test]
    fn delete_removes_matching_entry_only() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        insert(&mut ctx, &mut head, 7, 70).unwrap();
        delete(&mut ctx, &head, 7, 70).unwrap();
        assert_eq!(keys_equal(&mut ctx, &head, 7).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn head_roundtrips_through_metadata() {
        let mut meta = vec![0u8; PAGE_SIZE];
        shard_pagestore::codec::init(&mut meta, PK::Metadata, 0, PAGE_SIZE);
        let head = IndexHead { root: Some(3), order: 170 };
        write_head(&mut meta, &head);
        let read = read_head(&meta, PAGE_SIZE);
        assert_eq!(read.root, Some(3));
        assert_eq!(read.order, 170);
    }
}
