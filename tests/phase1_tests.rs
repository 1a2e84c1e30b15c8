//! Core engine scenarios and boundary behaviors, driven directly against
//! the synchronous `shard_storage::Engine`.

use shard_common::StorageError;
use shard_pagestore::codec::body_capacity;
use shard_pagestore::slotted::required_space;
use shard_storage::{Engine, EngineOptions};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Engine {
    Engine::open(&dir.path().join("data.shard"), &EngineOptions::default()).unwrap()
}

// Scenario 1: open a fresh file, insert, select, check row_count.
#[test]
fn scenario_fresh_open_insert_select() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let pk = engine.insert(vec![1, 2, 3], None).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(engine.metadata(None).unwrap().row_count, 1);
}

// Scenario 2: rollback discards both inserts, file size is unaffected.
#[test]
fn scenario_rollback_discards_inserts_and_file_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.shard");
    let engine = Engine::open(&path, &EngineOptions::default()).unwrap();

    let size_before = std::fs::metadata(&path).unwrap().len();

    let tx = engine.begin_tx();
    let pk_a = engine.insert(b"A".to_vec(), Some(tx)).unwrap();
    let pk_b = engine.insert(b"B".to_vec(), Some(tx)).unwrap();
    engine.rollback(tx).unwrap();

    assert_eq!(engine.select(pk_a, None).unwrap(), None);
    assert_eq!(engine.select(pk_b, None).unwrap(), None);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), size_before);
}

// Scenario 4: a large batch in one transaction, all rows round-trip.
#[test]
fn scenario_ten_thousand_row_batch() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let rows: Vec<Vec<u8>> = (0..10_000u32).map(|i| i.to_le_bytes().to_vec()).collect();
    let pks = engine.insert_batch(rows.clone(), None).unwrap();
    assert_eq!(pks.len(), 10_000);

    for (pk, row) in pks.iter().zip(rows.iter()) {
        assert_eq!(engine.select(*pk, None).unwrap(), Some(row.clone()));
    }
    assert_eq!(engine.metadata(None).unwrap().row_count, 10_000);
}

// Scenario 5: a row larger than one page overflows into a chain; the
// full body reads back intact regardless of the in-page pointer layout.
#[test]
fn scenario_overflow_row_pointer_and_body() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let body = vec![0x42u8; 10_000];
    let pk = engine.insert(body.clone(), None).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), Some(body));
}

// Scenario 6: update to a longer value inside tx2, then roll tx2 back.
// The committed value and page-file bookkeeping are untouched.
#[test]
fn scenario_grow_update_rollback_preserves_original() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let pk = engine.insert(b"short".to_vec(), None).unwrap();
    let meta_before = engine.metadata(None).unwrap();

    let tx2 = engine.begin_tx();
    engine.update(pk, vec![0x99; 8000], Some(tx2)).unwrap();
    engine.rollback(tx2).unwrap();

    assert_eq!(engine.select(pk, None).unwrap(), Some(b"short".to_vec()));
    let meta_after = engine.metadata(None).unwrap();
    assert_eq!(meta_before.page_count, meta_after.page_count);
    assert_eq!(meta_before.row_count, meta_after.row_count);
}

// Boundary: a body exactly at the in-page capacity fits without overflow;
// one byte more forces the overflow path, which must allocate at least one
// extra page.
#[test]
fn boundary_max_in_page_body_vs_one_byte_over() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let cap = body_capacity(EngineOptions::default().page_size as usize);

    let fits = cap - required_space(0);
    let body_fits = vec![0xAA; fits];
    let pk1 = engine.insert(body_fits.clone(), None).unwrap();
    assert_eq!(engine.select(pk1, None).unwrap(), Some(body_fits));
    let pages_after_fit = engine.metadata(None).unwrap().page_count;

    let body_overflows = vec![0xBB; fits + 1];
    let pk2 = engine.insert(body_overflows.clone(), None).unwrap();
    assert_eq!(engine.select(pk2, None).unwrap(), Some(body_overflows));
    let pages_after_overflow = engine.metadata(None).unwrap().page_count;

    assert!(
        pages_after_overflow > pages_after_fit,
        "one byte over the in-page capacity must allocate an overflow page"
    );
}

// Boundary: update to a shorter body keeps the same RID (no relocation, no
// deferred index update); update to a longer body relocates and both read
// back with the new content.
#[test]
fn boundary_shrink_vs_grow_update_relocation() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let pk = engine.insert(b"0123456789".to_vec(), None).unwrap();
    engine.update(pk, b"abc".to_vec(), None).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), Some(b"abc".to_vec()));

    engine.update(pk, vec![0x11; 7000], None).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), Some(vec![0x11; 7000]));
}

#[test]
fn rejects_invalid_engine_options() {
    let dir = TempDir::new().unwrap();
    let mut opts = EngineOptions::default();
    opts.page_size = 2048;
    let err = Engine::open(&dir.path().join("data.shard"), &opts).unwrap_err();
    assert!(matches!(err, StorageError::Usage(_)));
}

#[test]
fn close_refuses_with_open_transaction() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);
    let tx = engine.begin_tx();
    let err = engine.close().unwrap_err();
    assert!(matches!(err, StorageError::Usage(_)));
    engine.rollback(tx).unwrap();
    engine.close().unwrap();
}

// Delete then select returns null; a second delete on the same pk fails.
#[test]
fn delete_then_select_is_null() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let pk = engine.insert(b"gone-soon".to_vec(), None).unwrap();
    engine.delete(pk, None).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), None);
    assert!(engine.delete(pk, None).is_err());
}

// An explicit transaction's writes are invisible to a concurrent implicit
// read until commit.
#[test]
fn uncommitted_write_is_invisible_outside_its_transaction() {
    let dir = TempDir::new().unwrap();
    let engine = open(&dir);

    let pk = engine.insert(b"v1".to_vec(), None).unwrap();
    let tx = engine.begin_tx();
    engine.update(pk, b"v2".to_vec(), Some(tx)).unwrap();

    assert_eq!(engine.select(pk, None).unwrap(), Some(b"v1".to_vec()));
    engine.commit(tx).unwrap();
    assert_eq!(engine.select(pk, None).unwrap(), Some(b"v2".to_vec()));
}
