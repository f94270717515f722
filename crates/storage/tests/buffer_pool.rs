//! Crate-level integration tests for the buffer pool, in the style of the teacher's
//! `crates/db/tests/*.rs` (a fresh `tempfile` backing file per test, reopening across a dropped
//! handle to exercise persistence rather than mocking the file layer).

use pagekv::{BufferPool, PageType, StorageError};
use tempfile::NamedTempFile;

#[test]
fn pinning_past_capacity_reports_full() {
    let tmp = NamedTempFile::new().unwrap();
    let pool = BufferPool::open(tmp.path(), 3).unwrap();

    let a = pool.allocate_page(PageType::Tuple).unwrap();
    let b = pool.allocate_page(PageType::Tuple).unwrap();
    let c = pool.allocate_page(PageType::Tuple).unwrap();

    let err = pool.allocate_page(PageType::Tuple).unwrap_err();
    assert!(matches!(err, StorageError::Full));

    drop(a);
    drop(b);
    drop(c);
}

#[test]
fn writes_survive_a_process_restart() {
    let tmp = NamedTempFile::new().unwrap();
    let page_id = {
        let pool = BufferPool::open(tmp.path(), 8).unwrap();
        let frame = pool.allocate_page(PageType::Tuple).unwrap();
        let id = frame.page_id();
        frame.write()[42] = 0x7A;
        drop(frame);
        pool.flush_all().unwrap();
        id
    };

    let pool = BufferPool::open(tmp.path(), 8).unwrap();
    let frame = pool.pin(page_id, Some(PageType::Tuple)).unwrap();
    assert_eq!(frame.read()[42], 0x7A);
}

#[test]
fn concurrent_allocation_never_hands_out_the_same_page_id_twice() {
    use std::sync::Arc;
    use std::thread;

    let tmp = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPool::open(tmp.path(), 32).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..20 {
                    let frame = pool.allocate_page(PageType::Tuple).unwrap();
                    ids.push(frame.page_id());
                }
                ids
            })
        })
        .collect();

    let mut all_ids: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let total = all_ids.len();
    all_ids.sort_unstable();
    all_ids.dedup();
    assert_eq!(all_ids.len(), total, "no page id may be allocated to two callers");
}
