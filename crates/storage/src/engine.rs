//! The `Engine`: ties the transaction manager, page-file system, row/table
//! engine, and B+Tree index together into the façade-facing surface
//! described in spec §6.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use shard_common::{EngineMetadata, PageKind, Pk, StorageError, TxId, MIN_PAGE_SIZE};
use shard_pagestore::buffer::MIN_CACHE_CAPACITY;
use shard_pagestore::{codec, metadata, BufferCache};
use shard_wal::WalWriter;

use crate::btree::{self, IndexHead};
use crate::config::EngineOptions;
use crate::ctx::Ctx;
use crate::lock::LockManager;
use crate::pagefile;
use crate::table;
use crate::tx::Transaction;

pub struct Engine {
    inner: Mutex<Inner>,
}

struct Inner {
    data: BufferCache,
    wal_path: Option<std::path::PathBuf>,
    wal_checkpoint_threshold: usize,
    wal_pages_since_checkpoint: usize,
    locks: LockManager,
    transactions: HashMap<TxId, Transaction>,
    next_tx_id: TxId,
    page_size: usize,
}

impl Engine {
    /// Open or create the data file at `path`. Recovers from `opts.wal_path`
    /// if set and present. Fails leaving no new files behind on a bad magic
    /// or invalid option (spec §6, §7).
    pub fn open(path: &Path, opts: &EngineOptions) -> Result<Self, StorageError> {
        if (opts.page_size as usize) < MIN_PAGE_SIZE {
            return Err(StorageError::Usage("page size too small".into()));
        }
        if !opts.page_size.is_power_of_two() {
            return Err(StorageError::Usage("page size must be a power of two".into()));
        }
        if opts.page_cache_capacity < MIN_CACHE_CAPACITY {
            return Err(StorageError::Usage("cache capacity must be at least 100".into()));
        }

        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let existing_len = file.metadata()?.len();

        let page_size = if existing_len == 0 {
            opts.page_size as usize
        } else {
            let mut probe = vec![0u8; MIN_PAGE_SIZE];
            let mut probe_file = file.try_clone()?;
            probe_file.seek(SeekFrom::Start(0))?;
            probe_file.read_exact(&mut probe)?;
            if !metadata::check_magic(&probe) {
                return Err(StorageError::InvalidFormat("missing SHARD magic".into()));
            }
            metadata::page_size(&probe) as usize
        };

        let mut data = BufferCache::open(file, page_size, opts.page_cache_capacity)?;

        if existing_len == 0 {
            let mut meta = vec![0u8; page_size];
            codec::init(&mut meta, PageKind::Metadata, 0, page_size);
            metadata::write_magic(&mut meta);
            metadata::set_page_count(&mut meta, 2);
            metadata::set_page_size(&mut meta, page_size as u32);
            metadata::set_row_count(&mut meta, 0);
            metadata::set_root_index_page_id(&mut meta, None);
            metadata::set_root_index_order(&mut meta, 0);
            metadata::set_last_insert_page_id(&mut meta, None);
            metadata::set_last_row_pk(&mut meta, 0);
            metadata::set_bitmap_page_id(&mut meta, Some(1));
            metadata::set_free_page_list_head(&mut meta, None);
            codec::restamp(&mut meta);
            data.write(0, meta)?;

            let mut bitmap = vec![0u8; page_size];
            codec::init(&mut bitmap, PageKind::Bitmap, 1, page_size);
            data.write(1, bitmap)?;

            data.flush()?;
            data.sync()?;
        }

        let mut wal_pages_since_checkpoint = 0usize;
        if let Some(wal_path) = &opts.wal_path {
            let result = shard_wal::recover(wal_path, page_size)?;
            let transactions_replayed = result.transactions_replayed;
            for (page_id, bytes) in result.pages {
                data.write(page_id, bytes)?;
            }
            data.flush()?;
            data.sync()?;
            if wal_path.exists() {
                std::fs::File::create(wal_path)?;
            }
            tracing::info!(transactions_replayed, "WAL recovery applied at open");
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                data,
                wal_path: opts.wal_path.clone(),
                wal_checkpoint_threshold: opts.wal_checkpoint_threshold,
                wal_pages_since_checkpoint,
                locks: LockManager::new(),
                transactions: HashMap::new(),
                next_tx_id: 1,
                page_size,
            }),
        })
    }

    pub fn begin_tx(&self) -> TxId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_tx_id;
        inner.next_tx_id += 1;
        inner.transactions.insert(id, Transaction::new(id));
        id
    }

    pub fn commit(&self, tx_id: TxId) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let tx = inner
            .transactions
            .remove(&tx_id)
            .ok_or_else(|| StorageError::Usage(format!("unknown transaction {tx_id}")))?;
        commit_sequence(inner, tx)
    }

    pub fn rollback(&self, tx_id: TxId) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let tx = inner
            .transactions
            .remove(&tx_id)
            .ok_or_else(|| StorageError::Usage(format!("unknown transaction {tx_id}")))?;
        rollback_sequence(inner, tx);
        Ok(())
    }

    pub fn insert(&self, bytes: Vec<u8>, tx: Option<TxId>) -> Result<Pk, StorageError> {
        self.with_ctx(tx, |ctx, head| table::insert(ctx, head, &bytes))
    }

    pub fn insert_batch(&self, items: Vec<Vec<u8>>, tx: Option<TxId>) -> Result<Vec<Pk>, StorageError> {
        self.with_ctx(tx, |ctx, head| table::insert_batch(ctx, head, &items))
    }

    pub fn update(&self, pk: Pk, bytes: Vec<u8>, tx: Option<TxId>) -> Result<(), StorageError> {
        self.with_ctx(tx, |ctx, head| {
            table::update(ctx, head, pk, &bytes)?;
            Ok(())
        })
    }

    pub fn delete(&self, pk: Pk, tx: Option<TxId>) -> Result<(), StorageError> {
        self.with_ctx(tx, |ctx, head| {
            table::delete(ctx, head, pk)?;
            Ok(())
        })
    }

    pub fn select(&self, pk: Pk, tx: Option<TxId>) -> Result<Option<Vec<u8>>, StorageError> {
        self.with_ctx(tx, |ctx, head| {
            let pending = ctx.tx.pending_index_updates.clone();
            table::select(ctx, head, pk, &pending)
        })
    }

    pub fn select_many(&self, pks: Vec<Pk>, tx: Option<TxId>) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        self.with_ctx(tx, |ctx, head| {
            let pending = ctx.tx.pending_index_updates.clone();
            table::select_many(ctx, head, &pks, &pending)
        })
    }

    pub fn metadata(&self, tx: Option<TxId>) -> Result<EngineMetadata, StorageError> {
        self.with_ctx(tx, |ctx, _head| {
            let meta = pagefile::get_metadata(ctx)?;
            Ok(EngineMetadata {
                page_size: ctx.page_size as u32,
                page_count: metadata::page_count(&meta),
                row_count: metadata::row_count(&meta),
            })
        })
    }

    /// Flushes and fsyncs the data file. Refuses while any transaction is
    /// still open (spec §6: callers must commit or roll back first).
    pub fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transactions.is_empty() {
            return Err(StorageError::Usage("cannot close engine with open transactions".into()));
        }
        inner.data.flush()?;
        inner.data.sync()
    }

    /// Run `op` against either an existing transaction (left open for the
    /// caller to commit/rollback later) or a fresh implicit one (committed
    /// on success, rolled back on error, per spec §2: "implicit single-op
    /// transactions are created if none is supplied").
    fn with_ctx<T>(
        &self,
        tx_id: Option<TxId>,
        op: impl FnOnce(&mut Ctx, &mut IndexHead) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let page_size = inner.page_size;

        match tx_id {
            Some(id) => {
                let tx = inner
                    .transactions
                    .get_mut(&id)
                    .ok_or_else(|| StorageError::Usage(format!("unknown transaction {id}")))?;
                let mut ctx = Ctx { buffer: &mut inner.data, locks: &mut inner.locks, tx, page_size };
                let meta = pagefile::get_metadata(&mut ctx)?;
                let mut head = btree::read_head(&meta, page_size);
                op(&mut ctx, &mut head)
            }
            None => {
                let mut tx = Transaction::new(0);
                let result = {
                    let mut ctx =
                        Ctx { buffer: &mut inner.data, locks: &mut inner.locks, tx: &mut tx, page_size };
                    let meta = pagefile::get_metadata(&mut ctx)?;
                    let mut head = btree::read_head(&meta, page_size);
                    op(&mut ctx, &mut head)
                };
                match result {
                    Ok(value) => {
                        commit_sequence(inner, tx)?;
                        Ok(value)
                    }
                    Err(err) => {
                        rollback_sequence(inner, tx);
                        Err(err)
                    }
                }
            }
        }
    }
}

/// Apply deferred row-relocation index updates (spec §4.6, §9) before the
/// rest of the commit pipeline runs.
fn apply_pending_index_updates(ctx: &mut Ctx) -> Result<(), StorageError> {
    let pending = std::mem::take(&mut ctx.tx.pending_index_updates);
    if pending.is_empty() {
        return Ok(());
    }

    let meta = pagefile::get_metadata(ctx)?;
    let mut head = btree::read_head(&meta, ctx.page_size);
    for update in &pending {
        btree::delete(ctx, &head, update.pk, update.old_rid.to_u64())?;
        btree::insert(ctx, &mut head, update.pk, update.new_rid.to_u64())?;
    }

    let mut meta = pagefile::get_metadata(ctx)?;
    btree::write_head(&mut meta, &head);
    pagefile::set_page(ctx, 0, meta)?;
    Ok(())
}

/// §4.4 commit: hooks, WAL prepare+finalize, write-through, checkpoint,
/// clear dirty/undo, release every lock exactly once.
fn commit_sequence(inner: &mut Inner, mut tx: Transaction) -> Result<(), StorageError> {
    {
        let page_size = inner.page_size;
        let mut ctx = Ctx { buffer: &mut inner.data, locks: &mut inner.locks, tx: &mut tx, page_size };
        apply_pending_index_updates(&mut ctx)?;
    }

    if !tx.dirty.is_empty() {
        if let Some(wal_path) = inner.wal_path.clone() {
            let mut writer = WalWriter::open(&wal_path, inner.page_size)?;
            let pages: Vec<(u32, Vec<u8>)> =
                tx.dirty.iter().map(|(id, bytes)| (*id, bytes.clone())).collect();
            writer.append_batch(&pages)?;
            writer.sync()?;
            writer.append_commit_marker()?;
            writer.sync()?;
            inner.wal_pages_since_checkpoint += pages.len();
        }

        for (page_id, bytes) in std::mem::take(&mut tx.dirty) {
            inner.data.write(page_id, bytes)?;
        }
        inner.data.flush()?;
        inner.data.sync()?;

        if let Some(wal_path) = inner.wal_path.clone() {
            if inner.wal_pages_since_checkpoint >= inner.wal_checkpoint_threshold {
                std::fs::File::create(&wal_path)?;
                inner.wal_pages_since_checkpoint = 0;
            }
        }
    }

    tx.undo.clear();
    let tx_id = tx.id;
    let released = inner.locks.release_all(tx_id);
    tx.mark_terminated();
    tracing::debug!(tx = tx_id, locks_released = released, "transaction committed");
    Ok(())
}

/// §4.4 rollback: discard dirty/undo, release locks, no disk writes at all.
fn rollback_sequence(inner: &mut Inner, mut tx: Transaction) {
    tx.dirty.clear();
    tx.undo.clear();
    tx.pending_index_updates.clear();
    let tx_id = tx.id;
    let released = inner.locks.release_all(tx_id);
    tx.mark_terminated();
    tracing::debug!(tx = tx_id, locks_released = released, "transaction rolled back");
}
