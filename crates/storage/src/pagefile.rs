//! Page-file system: allocation, the bitmap free/used chain, the free-list
//! stack, and recursive page-chain content writes (spec §4.5).

use shard_common::{PageId, PageKind, StorageError, NO_PAGE};
use shard_pagestore::codec::{
    body, body_mut, body_capacity, header, init, kind_of, restamp, set_next_page_id,
    set_remaining_capacity, Page,
};
use shard_pagestore::{bitmap, metadata};

use crate::ctx::Ctx;

pub fn get_metadata(ctx: &mut Ctx) -> Result<Page, StorageError> {
    ctx.read_page(0)
}

pub fn get_page(ctx: &mut Ctx, id: PageId) -> Result<Page, StorageError> {
    ctx.read_page(id)
}

/// Persist `bytes` as page `id`, restamping the body CRC first (spec §4.5).
/// Every body mutation in this crate — metadata field writes, index-page
/// accessors, bitmap bit flips — lands here, so this is the one place that
/// has to restamp rather than trusting each caller to.
pub fn set_page(ctx: &mut Ctx, id: PageId, mut bytes: Page) -> Result<(), StorageError> {
    restamp(&mut bytes);
    ctx.write_page(id, bytes)
}

/// Walk the bitmap chain to the page/residual index that tracks `target_id`,
/// extending the chain with a fresh bitmap page if it runs off the end.
/// `meta` is the caller's in-flight metadata image; the caller persists it.
fn mark_bit(ctx: &mut Ctx, meta: &mut Page, target_id: PageId, used: bool) -> Result<(), StorageError> {
    let cap = bitmap::capacity_per_page(ctx.page_size) as u32;
    let mut bitmap_id = metadata::bitmap_page_id(meta)
        .ok_or_else(|| StorageError::Corruption("metadata has no bitmap chain".into()))?;
    let mut residual = target_id;

    loop {
        if residual < cap {
            let mut page = get_page(ctx, bitmap_id)?;
            if used {
                bitmap::set_used(&mut page, residual as usize);
            } else {
                bitmap::set_free(&mut page, residual as usize);
            }
            return set_page(ctx, bitmap_id, page);
        }

        residual -= cap;
        let page = get_page(ctx, bitmap_id)?;
        let next = header(&page).next_page_id;
        if next != NO_PAGE {
            bitmap_id = next;
            continue;
        }

        // Extend the chain. Allocated directly via page-count append rather
        // than through `append_new_page`, to avoid recursing back into
        // bitmap addressing for the new bitmap page's own id.
        let new_id = metadata::page_count(meta);
        metadata::set_page_count(meta, new_id + 1);
        let mut fresh = vec![0u8; ctx.page_size];
        init(&mut fresh, PageKind::Bitmap, new_id, ctx.page_size);
        set_page(ctx, new_id, fresh)?;

        let mut prev = get_page(ctx, bitmap_id)?;
        set_next_page_id(&mut prev, new_id);
        set_page(ctx, bitmap_id, prev)?;

        bitmap_id = new_id;
    }
}

/// Allocate a page of `kind`: reuse the free-list head if one exists,
/// otherwise append at the end of the file.
pub fn append_new_page(ctx: &mut Ctx, kind: PageKind) -> Result<PageId, StorageError> {
    ctx.acquire_write_lock(0)?;
    let mut meta = get_metadata(ctx)?;

    let new_id = if let Some(head) = metadata::free_page_list_head(&meta) {
        let reused = get_page(ctx, head)?;
        let next = header(&reused).next_page_id;
        metadata::set_free_page_list_head(&mut meta, if next == NO_PAGE { None } else { Some(next) });

        let mut reinit = reused;
        init(&mut reinit, kind, head, ctx.page_size);
        set_page(ctx, head, reinit)?;
        head
    } else {
        let id = metadata::page_count(&meta);
        metadata::set_page_count(&mut meta, id + 1);
        let mut fresh = vec![0u8; ctx.page_size];
        init(&mut fresh, kind, id, ctx.page_size);
        set_page(ctx, id, fresh)?;
        id
    };

    mark_bit(ctx, &mut meta, new_id, true)?;
    set_page(ctx, 0, meta)?;
    tracing::debug!(page_id = new_id, ?kind, "allocated page");
    Ok(new_id)
}

/// Push a page onto the free-list head (LIFO) and mark its bitmap bit free.
/// Locking order: metadata first, then the page being freed, then bitmap
/// pages along the chain (spec §9).
pub fn set_free_page(ctx: &mut Ctx, id: PageId) -> Result<(), StorageError> {
    ctx.acquire_write_lock(0)?;
    ctx.acquire_write_lock(id)?;

    let mut meta = get_metadata(ctx)?;
    let current_head = metadata::free_page_list_head(&meta);

    let mut page = get_page(ctx, id)?;
    init(&mut page, PageKind::Empty, id, ctx.page_size);
    set_next_page_id(&mut page, current_head.unwrap_or(NO_PAGE));
    set_page(ctx, id, page)?;

    mark_bit(ctx, &mut meta, id, false)?;
    metadata::set_free_page_list_head(&mut meta, Some(id));
    set_page(ctx, 0, meta)?;
    tracing::debug!(page_id = id, "freed page, pushed onto free list");
    Ok(())
}

fn free_chain(ctx: &mut Ctx, start: PageId) -> Result<(), StorageError> {
    let mut cur = Some(start);
    while let Some(id) = cur {
        let page = get_page(ctx, id)?;
        let next = header(&page).next_page_id;
        set_free_page(ctx, id)?;
        cur = if next == NO_PAGE { None } else { Some(next) };
    }
    Ok(())
}

/// Write `data` starting at `offset` within `start_page_id`'s body,
/// following (or allocating) `next_page_id` links as the stream crosses page
/// boundaries. If the rewrite is shorter than the existing chain, the
/// leftover linked pages are freed and the terminating page's `next` is set
/// to "none".
pub fn write_page_content(
    ctx: &mut Ctx,
    start_page_id: PageId,
    data: &[u8],
    offset: usize,
) -> Result<(), StorageError> {
    let cap = body_capacity(ctx.page_size);
    let mut remaining = data;
    let mut cur_id = start_page_id;
    let mut cur_offset = offset;

    loop {
        let mut page = get_page(ctx, cur_id)?;
        let space = cap - cur_offset;
        let take = remaining.len().min(space);
        body_mut(&mut page)[cur_offset..cur_offset + take].copy_from_slice(&remaining[..take]);
        remaining = &remaining[take..];
        let used_so_far = cur_offset + take;

        if remaining.is_empty() {
            let next = header(&page).next_page_id;
            set_next_page_id(&mut page, NO_PAGE);
            set_remaining_capacity(&mut page, (cap - used_so_far) as u32);
            set_page(ctx, cur_id, page)?;
            if next != NO_PAGE {
                free_chain(ctx, next)?;
            }
            return Ok(());
        }

        set_remaining_capacity(&mut page, 0);
        let next = header(&page).next_page_id;
        let next_id = if next != NO_PAGE {
            next
        } else {
            let kind = kind_of(&page);
            let new_id = append_new_page(ctx, kind)?;
            set_next_page_id(&mut page, new_id);
            new_id
        };
        set_page(ctx, cur_id, page)?;
        cur_id = next_id;
        cur_offset = 0;
    }
}

/// Read the used-prefix of a page's body, optionally following `next` links
/// and concatenating their used prefixes too.
pub fn get_body(ctx: &mut Ctx, id: PageId, recursive: bool) -> Result<Vec<u8>, StorageError> {
    let page = get_page(ctx, id)?;
    let h = header(&page);
    let cap = body_capacity(ctx.page_size);
    let used = cap - h.remaining_capacity as usize;
    let mut out = body(&page)[..used].to_vec();
    if recursive && h.next_page_id != NO_PAGE {
        out.extend(get_body(ctx, h.next_page_id, true)?);
    }
    Ok(out)
}
