//! L3: `HashTable<K, V>`, the persistent extendible-hash multimap over [`BufferPool`] frames.
//!
//! One directory page (header + `global_depth` + per-slot `(local_depth, bucket_page_id)`
//! pairs) addresses `2^global_depth` directory slots, each pointing at a bucket page; several
//! slots may share a bucket when that bucket's own local depth is lower than the directory's
//! global depth (§3 invariant 6). `put` grows the structure on overflow by splitting the
//! offending bucket and, if needed, doubling the directory (§4.3); `get`/`remove` never
//! restructure anything.
//!
//! `L_ht`, the index-level structural latch that sits above any single bucket latch in the
//! locking hierarchy (§5), is a `parking_lot::RwLock<()>` taken for writing by `put`/`destroy`
//! (which touch the directory) and for reading by `get`/`remove` (which touch at most one
//! bucket each) — grounded on `MohamedAbdeen21-niwid-db/src/latch/mod.rs`'s use of
//! `parking_lot` for a coarser, non-per-page lock alongside the per-page spin latch.
//!
//! Structurally grounded on `kl4mm-dbstorage/src/hash_table/extendible.rs`'s
//! `ExtendibleHashTable::{insert,remove,get}`, with that file's async `PageCache` calls replaced
//! by this crate's synchronous `BufferPool::{pin,allocate_page,free_page}` and its directory
//! doubling loop corrected per §9's flagged `(last << 1) + 1` parenthesization bug.

use std::collections::HashSet;
use std::marker::PhantomData;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StorageError, StorageResult};
use crate::hash::bucket_page::{HashBucketLayout, HashBucketPage};
use crate::hash::directory_page::{HashDirectoryPage, MAX_GLOBAL_DEPTH};
use crate::hash::layout::{hash_key, FixedLayout};
use crate::page::{PageId, PageType};
use crate::pool::{BufferPool, PinnedFrame};

/// `L_ht`, the structural latch sitting above any single bucket-page latch in the locking
/// hierarchy (§5): `put`/`destroy` take it exclusively because they rewrite the directory page
/// and reassign bucket ids; `get`/`remove` take it shared since they only ever touch one bucket
/// each and never restructure anything. Unlike [`crate::latch::Latch`], which spins because it
/// protects a single page for a handful of instructions, this wraps `parking_lot::RwLock<()>`
/// directly — it can be held across the multi-page work a split does.
struct StructuralLatch {
    lock: RwLock<()>,
}

impl StructuralLatch {
    fn new() -> Self {
        StructuralLatch { lock: RwLock::new(()) }
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

pub struct HashTable<'a, K, V> {
    pool: &'a BufferPool,
    dir_page_id: PageId,
    bucket_layout: HashBucketLayout,
    structural: StructuralLatch,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: FixedLayout, V: FixedLayout> HashTable<'a, K, V> {
    /// Allocates a fresh hash directory page and two initial bucket pages (§3 lifecycle), with
    /// global depth `1` so both slots start out distinct — matching the lifecycle note that
    /// `new` allocates exactly two bucket pages rather than one.
    pub fn create(pool: &'a BufferPool) -> StorageResult<Self> {
        let bucket_layout = HashBucketLayout::for_types::<K, V>();

        // Allocated first so a hash table created on a fresh file always lands its directory
        // page at id 1 (the page directory's first-ever allocation) — a convention the CLI
        // relies on to reattach to an existing file without persisting the id anywhere else.
        let dir_frame = pool.allocate_page(PageType::HashDirectory)?;
        let dir_page_id = dir_frame.page_id();

        let bucket0 = pool.allocate_page(PageType::HashBucket)?;
        let bucket1 = pool.allocate_page(PageType::HashBucket)?;
        {
            let mut buf = bucket0.write();
            HashBucketPage::init(&mut buf[..], &bucket_layout);
        }
        {
            let mut buf = bucket1.write();
            HashBucketPage::init(&mut buf[..], &bucket_layout);
        }
        let id0 = bucket0.page_id();
        let id1 = bucket1.page_id();
        drop(bucket0);
        drop(bucket1);

        {
            let mut buf = dir_frame.write();
            HashDirectoryPage::init(&mut buf[..]);
            HashDirectoryPage::set_global_depth(&mut buf[..], 1);
            HashDirectoryPage::set_local_depth(&mut buf[..], 0, 1);
            HashDirectoryPage::set_bucket_page_id(&mut buf[..], 0, id0);
            HashDirectoryPage::set_local_depth(&mut buf[..], 1, 1);
            HashDirectoryPage::set_bucket_page_id(&mut buf[..], 1, id1);
        }

        Ok(HashTable {
            pool,
            dir_page_id,
            bucket_layout,
            structural: StructuralLatch::new(),
            _marker: PhantomData,
        })
    }

    /// Reattaches to a hash table whose directory page is already `dir_page_id`, e.g. after a
    /// clean process restart. Fails with [`StorageError::Invalid`] if that page isn't actually a
    /// formatted hash-directory page.
    pub fn open(pool: &'a BufferPool, dir_page_id: PageId) -> StorageResult<Self> {
        let frame = pool.pin(dir_page_id, Some(PageType::HashDirectory))?;
        let is_directory = frame.page_type() == PageType::HashDirectory;
        drop(frame);
        if !is_directory {
            return Err(StorageError::Invalid { page_id: dir_page_id });
        }

        Ok(HashTable {
            pool,
            dir_page_id,
            bucket_layout: HashBucketLayout::for_types::<K, V>(),
            structural: StructuralLatch::new(),
            _marker: PhantomData,
        })
    }

    pub fn dir_page_id(&self) -> PageId {
        self.dir_page_id
    }

    pub fn global_depth(&self) -> StorageResult<u32> {
        let _guard = self.structural.shared();
        let dir_frame = self.pool.pin(self.dir_page_id, Some(PageType::HashDirectory))?;
        let buf = dir_frame.read();
        Ok(HashDirectoryPage::global_depth(&buf[..]))
    }

    /// Inserts `(key, val)`, splitting (and, if needed, doubling the directory) until the target
    /// bucket has room. Always returns `true` for a multimap — there is no "key already
    /// present" rejection (§4.3 `put`).
    pub fn put(&self, key: K, val: V) -> StorageResult<bool> {
        let _guard = self.structural.exclusive();
        let hash = hash_key(&key);

        loop {
            let dir_frame = self.pool.pin(self.dir_page_id, Some(PageType::HashDirectory))?;
            let (global_depth, bucket_page_id) = {
                let buf = dir_frame.read();
                let idx = HashDirectoryPage::index_for_hash(&buf[..], hash);
                (
                    HashDirectoryPage::global_depth(&buf[..]),
                    HashDirectoryPage::bucket_page_id(&buf[..], idx),
                )
            };
            let start = probe_start(hash, global_depth, self.bucket_layout.max_entries);

            let inserted = {
                let bucket_frame = self.pool.pin(bucket_page_id, Some(PageType::HashBucket))?;
                let mut buf = bucket_frame.write();
                HashBucketPage::insert(&mut buf[..], &self.bucket_layout, start, &key, &val)
            };
            if inserted {
                return Ok(true);
            }

            self.split(&dir_frame, hash, bucket_page_id)?;
            // The directory frame is dropped and re-pinned fresh on the next loop iteration, so
            // the retry always sees the post-split state.
        }
    }

    /// Splits the bucket at `old_bucket_id`, doubling the directory first if the bucket's local
    /// depth has caught up with the global depth (§4.3 `put`, steps 2-6).
    fn split(&self, dir_frame: &PinnedFrame<'_>, hash: u64, old_bucket_id: PageId) -> StorageResult<()> {
        let idx = {
            let buf = dir_frame.read();
            HashDirectoryPage::index_for_hash(&buf[..], hash)
        };
        let old_local_depth = {
            let buf = dir_frame.read();
            HashDirectoryPage::local_depth(&buf[..], idx) as u32
        };
        let new_local_depth = old_local_depth + 1;
        assert!(
            new_local_depth <= MAX_GLOBAL_DEPTH,
            "hash directory cannot split past its maximum global depth"
        );

        let mut global_depth = {
            let buf = dir_frame.read();
            HashDirectoryPage::global_depth(&buf[..])
        };

        if new_local_depth > global_depth {
            tracing::debug!(
                old_bucket_id,
                from_depth = global_depth,
                to_depth = global_depth + 1,
                "doubling hash directory"
            );
            let mut buf = dir_frame.write();
            let old_size = 1usize << global_depth;
            // Walk downward so every (bucket_page_id, local_depth) pair is read before either of
            // its two destination slots is overwritten.
            for k in (0..old_size).rev() {
                let bucket_page_id = HashDirectoryPage::bucket_page_id(&buf[..], k);
                let local_depth = HashDirectoryPage::local_depth(&buf[..], k);
                let lo = 2 * k;
                let hi = 2 * k + 1; // (last << 1) + 1, per §9's parenthesization correction.
                HashDirectoryPage::set_bucket_page_id(&mut buf[..], lo, bucket_page_id);
                HashDirectoryPage::set_local_depth(&mut buf[..], lo, local_depth);
                HashDirectoryPage::set_bucket_page_id(&mut buf[..], hi, bucket_page_id);
                HashDirectoryPage::set_local_depth(&mut buf[..], hi, local_depth);
            }
            global_depth += 1;
            HashDirectoryPage::set_global_depth(&mut buf[..], global_depth);
        }

        // Recompute idx under the (possibly now larger) global depth: the low `old_local_depth`
        // bits are unchanged by doubling, so they still identify the group that pointed at
        // `old_bucket_id`.
        let idx = {
            let buf = dir_frame.read();
            HashDirectoryPage::index_for_hash(&buf[..], hash)
        };
        let base_pattern = idx & ((1usize << old_local_depth) - 1);
        let mirror_pattern = base_pattern + (1usize << old_local_depth);
        let step = 1usize << new_local_depth;
        let dir_size = 1usize << global_depth;

        tracing::debug!(old_bucket_id, new_local_depth, "splitting full bucket");
        let replacement = self.pool.allocate_page(PageType::HashBucket)?;
        let mirror = self.pool.allocate_page(PageType::HashBucket)?;
        {
            let mut buf = replacement.write();
            HashBucketPage::init(&mut buf[..], &self.bucket_layout);
        }
        {
            let mut buf = mirror.write();
            HashBucketPage::init(&mut buf[..], &self.bucket_layout);
        }
        let replacement_id = replacement.page_id();
        let mirror_id = mirror.page_id();

        {
            let mut buf = dir_frame.write();
            let mut slot = base_pattern;
            while slot < dir_size {
                HashDirectoryPage::set_bucket_page_id(&mut buf[..], slot, replacement_id);
                HashDirectoryPage::set_local_depth(&mut buf[..], slot, new_local_depth as u8);
                slot += step;
            }
            let mut slot = mirror_pattern;
            while slot < dir_size {
                HashDirectoryPage::set_bucket_page_id(&mut buf[..], slot, mirror_id);
                HashDirectoryPage::set_local_depth(&mut buf[..], slot, new_local_depth as u8);
                slot += step;
            }
        }

        let old_entries: Vec<(K, V)> = {
            let old_frame = self.pool.pin(old_bucket_id, Some(PageType::HashBucket))?;
            let buf = old_frame.read();
            HashBucketPage::readable_entries(&buf[..], &self.bucket_layout)
        };

        for (k, v) in old_entries {
            let h = hash_key(&k);
            let goes_to_mirror = (h >> old_local_depth) & 1 == 1;
            let target = if goes_to_mirror { &mirror } else { &replacement };
            let start = probe_start(h, global_depth, self.bucket_layout.max_entries);
            let mut buf = target.write();
            let ok = HashBucketPage::insert(&mut buf[..], &self.bucket_layout, start, &k, &v);
            assert!(
                ok,
                "re-inserting an existing entry into a freshly split bucket must not fail"
            );
        }

        drop(replacement);
        drop(mirror);
        self.pool.free_page(old_bucket_id)?;
        Ok(())
    }

    /// Every value stored under `key`, in probe order (§4.3 `get`).
    pub fn get(&self, key: &K) -> StorageResult<Vec<V>> {
        let _guard = self.structural.shared();
        let hash = hash_key(key);

        let (global_depth, bucket_page_id) = {
            let dir_frame = self.pool.pin(self.dir_page_id, Some(PageType::HashDirectory))?;
            let buf = dir_frame.read();
            let idx = HashDirectoryPage::index_for_hash(&buf[..], hash);
            (
                HashDirectoryPage::global_depth(&buf[..]),
                HashDirectoryPage::bucket_page_id(&buf[..], idx),
            )
        };
        let start = probe_start(hash, global_depth, self.bucket_layout.max_entries);

        let bucket_frame = self.pool.pin(bucket_page_id, Some(PageType::HashBucket))?;
        let buf = bucket_frame.read();
        let mut out = Vec::new();
        HashBucketPage::find::<K, V>(&buf[..], &self.bucket_layout, start, key, &mut out);
        Ok(out)
    }

    /// Clears the first occupied-and-readable slot matching `(key, val)` exactly. Never merges
    /// buckets (§4.3 `remove`'s "no merging is performed" clause; page-load counters stay
    /// unused).
    pub fn remove(&self, key: &K, val: &V) -> StorageResult<bool> {
        let _guard = self.structural.shared();
        let hash = hash_key(key);

        let (global_depth, bucket_page_id) = {
            let dir_frame = self.pool.pin(self.dir_page_id, Some(PageType::HashDirectory))?;
            let buf = dir_frame.read();
            let idx = HashDirectoryPage::index_for_hash(&buf[..], hash);
            (
                HashDirectoryPage::global_depth(&buf[..]),
                HashDirectoryPage::bucket_page_id(&buf[..], idx),
            )
        };
        let start = probe_start(hash, global_depth, self.bucket_layout.max_entries);

        let bucket_frame = self.pool.pin(bucket_page_id, Some(PageType::HashBucket))?;
        let mut buf = bucket_frame.write();
        Ok(HashBucketPage::remove(&mut buf[..], &self.bucket_layout, start, key, val))
    }

    /// Frees every uniquely-referenced bucket page plus the directory page itself (§3 lifecycle
    /// "destroy").
    pub fn destroy(self) -> StorageResult<()> {
        let _guard = self.structural.exclusive();

        let (global_depth, bucket_ids): (u32, Vec<PageId>) = {
            let dir_frame = self.pool.pin(self.dir_page_id, Some(PageType::HashDirectory))?;
            let buf = dir_frame.read();
            let global_depth = HashDirectoryPage::global_depth(&buf[..]);
            let ids = (0..(1usize << global_depth))
                .map(|i| HashDirectoryPage::bucket_page_id(&buf[..], i))
                .collect();
            (global_depth, ids)
        };
        let _ = global_depth;

        let mut freed = HashSet::new();
        for id in bucket_ids {
            if freed.insert(id) {
                self.pool.free_page(id)?;
            }
        }
        self.pool.free_page(self.dir_page_id)?;
        Ok(())
    }
}

/// The in-bucket probe start index for `hash` at the given `global_depth`: the high bits of the
/// hash, past the `global_depth` low bits the directory already consumed, reduced mod the
/// bucket's capacity (§4.3 hashing).
fn probe_start(hash: u64, global_depth: u32, max_entries: usize) -> usize {
    ((hash >> global_depth) as usize) % max_entries
}
