//! Crate-level integration tests for the extendible-hash multimap, in the style of the teacher's
//! `crates/db/tests/persistence_test.rs` — a real file under a `TempDir`, reopened across a
//! dropped pool handle, plus a genuine multi-threaded exercise of the structural and bucket
//! latches rather than a single-threaded unit test.

use std::thread;

use pagekv::{BufferPool, HashTable, PageType};
use tempfile::TempDir;

const DIR_PAGE_ID: u32 = 1;

#[test]
fn a_multimap_survives_a_reopen_with_every_value_intact() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("table.db");

    {
        let pool = BufferPool::open(&db_path, 32).unwrap();
        let ht = HashTable::<u32, u32>::create(&pool).unwrap();
        for key in 0..300u32 {
            ht.put(key, key).unwrap();
            ht.put(key, key + 1).unwrap();
        }
        pool.flush_all().unwrap();
    }

    let pool = BufferPool::open(&db_path, 32).unwrap();
    let ht = HashTable::<u32, u32>::open(&pool, DIR_PAGE_ID).unwrap();
    for key in 0..300u32 {
        assert_eq!(ht.get(&key).unwrap(), vec![key, key + 1], "key {key} lost across reopen");
    }
}

#[test]
fn concurrent_puts_and_gets_across_many_keys_never_lose_a_value() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("table.db");

    let pool = BufferPool::open(&db_path, 64).unwrap();
    let ht = HashTable::<u32, u32>::create(&pool).unwrap();

    // A single shared table, not one reattached instance per thread: `L_ht` only serializes
    // structural changes (splits, directory doublings) across callers sharing one `HashTable`
    // value, so every writer here holds a reference into the same instance.
    thread::scope(|scope| {
        for worker in 0..8u32 {
            let ht = &ht;
            scope.spawn(move || {
                for i in 0..100u32 {
                    let key = worker * 100 + i;
                    ht.put(key, key).unwrap();
                }
            });
        }
    });

    for worker in 0..8u32 {
        for i in 0..100u32 {
            let key = worker * 100 + i;
            assert_eq!(ht.get(&key).unwrap(), vec![key], "key {key} missing after concurrent puts");
        }
    }
}

#[test]
fn destroying_a_table_lets_its_pages_be_reclaimed_by_something_else() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("table.db");
    let pool = BufferPool::open(&db_path, 64).unwrap();

    let ht = HashTable::<u32, u32>::create(&pool).unwrap();
    for key in 0..500u32 {
        ht.put(key, key).unwrap();
    }
    ht.destroy().unwrap();

    let reused = pool.allocate_page(PageType::Tuple).unwrap();
    assert_eq!(reused.page_id(), DIR_PAGE_ID);
}
