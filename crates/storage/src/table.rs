//! Row/table engine: row-level CRUD on top of the page-file system and the
//! B+Tree index (spec §4.6).

use shard_common::{PageId, PageKind, Pk, Rid, StorageError};
use shard_pagestore::codec::{body_capacity, kind_of};
use shard_pagestore::{metadata, slotted};

use crate::btree::{self, IndexHead};
use crate::ctx::Ctx;
use crate::pagefile;
use crate::tx::PendingIndexUpdate;

/// Insert at the last-insert page if it has room, else append a fresh data
/// page and make that the new target.
fn place_row(
    ctx: &mut Ctx,
    last_insert_id: Option<PageId>,
    flags: u8,
    pk: Pk,
    row_body: &[u8],
) -> Result<Rid, StorageError> {
    if let Some(id) = last_insert_id {
        let mut page = pagefile::get_page(ctx, id)?;
        if slotted::has_room(&page, row_body.len()) {
            let slot = slotted::insert_row(&mut page, flags, pk, row_body);
            pagefile::set_page(ctx, id, page)?;
            return Ok(Rid::new(id, slot));
        }
    }
    let new_id = pagefile::append_new_page(ctx, PageKind::Data)?;
    let mut page = pagefile::get_page(ctx, new_id)?;
    let slot = slotted::insert_row(&mut page, flags, pk, row_body);
    pagefile::set_page(ctx, new_id, page)?;
    Ok(Rid::new(new_id, slot))
}

/// Insert one row's payload, choosing the in-page / new-page / overflow
/// path per spec §4.6, then assign its PK and index it.
fn insert_single_row(
    ctx: &mut Ctx,
    head: &mut IndexHead,
    body: &[u8],
    increment_row_count: bool,
) -> Result<Pk, StorageError> {
    let meta_before = pagefile::get_metadata(ctx)?;
    let last_insert_id = metadata::last_insert_page_id(&meta_before);
    let pk = metadata::last_row_pk(&meta_before) + 1;
    let cap = body_capacity(ctx.page_size);

    let rid = if slotted::required_space(body.len()) <= cap {
        place_row(ctx, last_insert_id, 0, pk, body)?
    } else {
        let overflow_head = pagefile::append_new_page(ctx, PageKind::Overflow)?;
        pagefile::write_page_content(ctx, overflow_head, body, 0)?;
        let pointer = overflow_head.to_le_bytes().to_vec();
        place_row(ctx, last_insert_id, slotted::FLAG_OVERFLOW, pk, &pointer)?
    };

    btree::insert(ctx, head, pk, rid.to_u64())?;

    let mut meta = pagefile::get_metadata(ctx)?;
    metadata::set_last_row_pk(&mut meta, pk);
    metadata::set_last_insert_page_id(&mut meta, Some(rid.page_id));
    if increment_row_count {
        let rc = metadata::row_count(&meta);
        metadata::set_row_count(&mut meta, rc + 1);
    }
    btree::write_head(&mut meta, head);
    pagefile::set_page(ctx, 0, meta)?;

    Ok(pk)
}

pub fn insert(ctx: &mut Ctx, head: &mut IndexHead, body: &[u8]) -> Result<Pk, StorageError> {
    ctx.acquire_write_lock(0)?;
    insert_single_row(ctx, head, body, true)
}

pub fn insert_batch(ctx: &mut Ctx, head: &mut IndexHead, bodies: &[Vec<u8>]) -> Result<Vec<Pk>, StorageError> {
    ctx.acquire_write_lock(0)?;
    bodies
        .iter()
        .map(|body| insert_single_row(ctx, head, body, true))
        .collect()
}

/// Resolve a PK to its current RID: pending (uncommitted, this tx's own)
/// relocations take priority over the committed tree.
fn resolve_rid(
    ctx: &mut Ctx,
    head: &IndexHead,
    pk: Pk,
    pending: &[PendingIndexUpdate],
) -> Result<Option<Rid>, StorageError> {
    if let Some(update) = pending.iter().rev().find(|u| u.pk == pk) {
        return Ok(Some(update.new_rid));
    }
    let values = btree::keys_equal(ctx, head, pk)?;
    Ok(values.first().map(|&v| Rid::from_u64(v)))
}

fn read_row_body(ctx: &mut Ctx, rid: Rid) -> Result<Option<Vec<u8>>, StorageError> {
    let page = pagefile::get_page(ctx, rid.page_id)?;
    if kind_of(&page) != PageKind::Data {
        return Err(StorageError::Corruption(format!(
            "rid {rid:?} does not point at a data page"
        )));
    }
    let row = slotted::read_row(&page, rid.slot);
    if row.is_deleted() {
        return Ok(None);
    }
    if row.is_overflow() {
        let overflow_head = u32::from_le_bytes(row.body[0..4].try_into().unwrap());
        let bytes = pagefile::get_body(ctx, overflow_head, true)?;
        return Ok(Some(bytes));
    }
    Ok(Some(row.body.to_vec()))
}

pub fn select(
    ctx: &mut Ctx,
    head: &IndexHead,
    pk: Pk,
    pending: &[PendingIndexUpdate],
) -> Result<Option<Vec<u8>>, StorageError> {
    match resolve_rid(ctx, head, pk, pending)? {
        Some(rid) => read_row_body(ctx, rid),
        None => Ok(None),
    }
}

pub fn select_many(
    ctx: &mut Ctx,
    head: &IndexHead,
    pks: &[Pk],
    pending: &[PendingIndexUpdate],
) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
    pks.iter().map(|&pk| select(ctx, head, pk, pending)).collect()
}

/// `true` if `pk` existed and was updated; `false` is a no-op (missing PK is
/// not an error).
pub fn update(ctx: &mut Ctx, head: &IndexHead, pk: Pk, new_body: &[u8]) -> Result<bool, StorageError> {
    let pending = ctx.tx.pending_index_updates.clone();
    let Some(old_rid) = resolve_rid(ctx, head, pk, &pending)? else {
        return Ok(false);
    };

    let (is_overflow, overflow_head, old_size) = {
        let page = pagefile::get_page(ctx, old_rid.page_id)?;
        if kind_of(&page) != PageKind::Data {
            return Err(StorageError::Corruption(format!(
                "rid {old_rid:?} does not point at a data page"
            )));
        }
        let row = slotted::read_row(&page, old_rid.slot);
        if row.is_overflow() {
            let head_id = u32::from_le_bytes(row.body[0..4].try_into().unwrap());
            (true, head_id, 0usize)
        } else {
            (false, 0u32, row.body.len())
        }
    };

    if is_overflow {
        pagefile::write_page_content(ctx, overflow_head, new_body, 0)?;
        return Ok(true);
    }

    if new_body.len() <= old_size {
        let mut page = pagefile::get_page(ctx, old_rid.page_id)?;
        slotted::rewrite_row_in_place(&mut page, old_rid.slot, 0, new_body);
        pagefile::set_page(ctx, old_rid.page_id, page)?;
        return Ok(true);
    }

    // Grows past the slot's original capacity: relocate and defer the
    // index update to commit (spec §4.6, §9).
    ctx.acquire_write_lock(0)?;
    let meta = pagefile::get_metadata(ctx)?;
    let last_insert_id = metadata::last_insert_page_id(&meta);
    let cap = body_capacity(ctx.page_size);

    let new_rid = if slotted::required_space(new_body.len()) <= cap {
        place_row(ctx, last_insert_id, 0, pk, new_body)?
    } else {
        let overflow_head = pagefile::append_new_page(ctx, PageKind::Overflow)?;
        pagefile::write_page_content(ctx, overflow_head, new_body, 0)?;
        let pointer = overflow_head.to_le_bytes().to_vec();
        place_row(ctx, last_insert_id, slotted::FLAG_OVERFLOW, pk, &pointer)?
    };

    let mut meta = pagefile::get_metadata(ctx)?;
    metadata::set_last_insert_page_id(&mut meta, Some(new_rid.page_id));
    pagefile::set_page(ctx, 0, meta)?;

    let mut old_page = pagefile::get_page(ctx, old_rid.page_id)?;
    slotted::mark_deleted(&mut old_page, old_rid.slot);
    pagefile::set_page(ctx, old_rid.page_id, old_page)?;

    ctx.tx.queue_index_update(pk, old_rid, new_rid);
    Ok(true)
}

/// `true` if `pk` existed and was deleted. The row is tombstoned in place;
/// the B+Tree entry is left untouched and the page is never reclaimed
/// (spec §4.6, §9 open question 1).
pub fn delete(ctx: &mut Ctx, head: &IndexHead, pk: Pk) -> Result<bool, StorageError> {
    let pending = ctx.tx.pending_index_updates.clone();
    let Some(rid) = resolve_rid(ctx, head, pk, &pending)? else {
        return Ok(false);
    };

    let mut page = pagefile::get_page(ctx, rid.page_id)?;
    if kind_of(&page) != PageKind::Data {
        return Err(StorageError::Corruption(format!(
            "rid {rid:?} does not point at a data page"
        )));
    }
    slotted::mark_deleted(&mut page, rid.slot);
    pagefile::set_page(ctx, rid.page_id, page)?;

    ctx.acquire_write_lock(0)?;
    let mut meta = pagefile::get_metadata(ctx)?;
    let rc = metadata::row_count(&meta);
    metadata::set_row_count(&mut meta, rc.saturating_sub(1));
    pagefile::set_page(ctx, 0, meta)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::tx::Transaction;
    use shard_pagestore::{metadata as md, BufferCache};
    use tempfile::tempfile;

    const PAGE_SIZE: usize = 4096;

    fn fresh() -> (BufferCache, LockManager, Transaction) {
        let mut buffer = BufferCache::open(tempfile().unwrap(), PAGE_SIZE, 100).unwrap();
        let mut meta = vec![0u8; PAGE_SIZE];
        shard_pagestore::codec::init(&mut meta, PageKind::Metadata, 0, PAGE_SIZE);
        md::write_magic(&mut meta);
        md::set_page_count(&mut meta, 1);
        shard_pagestore::codec::restamp(&mut meta);
        buffer.write(0, meta).unwrap();
        (buffer, LockManager::new(), Transaction::new(1))
    }

    #[test]
    fn insert_then_select_roundtrips() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        let pk = insert(&mut ctx, &mut head, b"hello").unwrap();
        let pending = ctx.tx.pending_index_updates.clone();
        assert_eq!(select(&mut ctx, &head, pk, &pending).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn select_missing_pk_is_null() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let head = IndexHead { root: None, order: 0 };
        assert_eq!(select(&mut ctx, &head, 999, &[]).unwrap(), None);
    }

    #[test]
    fn overflow_row_roundtrips_large_payload() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        let big = vec![0x7Au8; 10_000];
        let pk = insert(&mut ctx, &mut head, &big).unwrap();
        let pending = ctx.tx.pending_index_updates.clone();
        assert_eq!(select(&mut ctx, &head, pk, &pending).unwrap(), Some(big));
    }

    #[test]
    fn shrink_update_keeps_rid_grow_update_relocates() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        let pk = insert(&mut ctx, &mut head, b"0123456789").unwrap();

        assert!(update(&mut ctx, &head, pk, b"abc").unwrap());
        assert!(ctx.tx.pending_index_updates.is_empty(), "shrink must not relocate");

        let huge = vec![0x11u8; 9000];
        assert!(update(&mut ctx, &head, pk, &huge).unwrap());
        assert_eq!(ctx.tx.pending_index_updates.len(), 1);
    }

    #[test]
    fn delete_tombstones_row() {
        let (mut buffer, mut locks, mut tx) = fresh();
        let mut ctx = Ctx { buffer: &mut buffer, locks: &mut locks, tx: &mut tx, page_size: PAGE_SIZE };
        let mut head = IndexHead { root: None, order: 0 };
        let pk = insert(&mut ctx, &mut head, b"gone").unwrap();
        assert!(delete(&mut ctx, &head, pk).unwrap());
        assert_eq!(select(&mut ctx, &head, pk, &[]).unwrap(), None);
        assert!(!delete(&mut ctx, &head, pk).unwrap());
    }
}
