//! The extendible-hash bucket page: an open-addressed array of `(key, value)` pairs with a
//! monotonic `occupied` bitset and a `readable` bitset for tombstoning (§3 invariant 8).
//!
//! `MAX_ENTRIES` isn't a compile-time constant here — it depends on `K::SIZE + V::SIZE`, which
//! varies per `HashTable<K, V>` instantiation — so [`HashBucketLayout`] computes it once (the
//! largest entry count whose two bitsets plus data array still fit in one page) and every
//! free function in this module takes that layout alongside the buffer, the same division of
//! responsibility `crate::directory` uses between a page's bytes and the constants that
//! describe them.
//!
//! Grounded on `kl4mm-dbstorage/src/hash_table/bucket_page.rs`'s `Bucket<K, V, BIT_SIZE>`
//! (occupied/readable bitmaps plus a `Pair<K, V>` array, `insert`/`remove`/`find`/`is_full`),
//! re-expressed as free functions over a raw page buffer instead of a struct borrowing
//! `&PageBuf`, matching this crate's page-kind convention.

use crate::hash::layout::FixedLayout;
use crate::page::{HEADER_SIZE, PAGE_SIZE};

/// The portion of a bucket page's layout that depends only on `K::SIZE + V::SIZE`, not on any
/// particular instance's contents.
#[derive(Debug, Clone, Copy)]
pub struct HashBucketLayout {
    pub entry_size: usize,
    pub max_entries: usize,
    bitset_bytes: usize,
    occupied_offset: usize,
    readable_offset: usize,
    data_offset: usize,
}

impl HashBucketLayout {
    pub fn for_types<K: FixedLayout, V: FixedLayout>() -> Self {
        Self::for_entry_size(K::SIZE + V::SIZE)
    }

    /// Grows `max_entries` one at a time until the bucket (header + two bitsets + data array)
    /// would no longer fit in a page. `entry_size` is always small relative to `PAGE_SIZE`, so a
    /// handful of thousand iterations at construction time is cheap relative to the I/O this
    /// layout then amortizes over.
    pub fn for_entry_size(entry_size: usize) -> Self {
        assert!(entry_size > 0, "a hash entry must occupy at least one byte");
        let available = PAGE_SIZE - HEADER_SIZE;
        let mut max_entries = 0usize;
        loop {
            let candidate = max_entries + 1;
            let bitset_bytes = candidate.div_ceil(8);
            let needed = 2 * bitset_bytes + candidate * entry_size;
            if needed > available {
                break;
            }
            max_entries = candidate;
        }
        assert!(
            max_entries > 0,
            "entry size {entry_size} is too large for a {PAGE_SIZE}-byte page"
        );

        let bitset_bytes = max_entries.div_ceil(8);
        HashBucketLayout {
            entry_size,
            max_entries,
            bitset_bytes,
            occupied_offset: HEADER_SIZE,
            readable_offset: HEADER_SIZE + bitset_bytes,
            data_offset: HEADER_SIZE + 2 * bitset_bytes,
        }
    }

    fn entry_offset(&self, index: usize) -> usize {
        self.data_offset + index * self.entry_size
    }
}

pub struct HashBucketPage;

impl HashBucketPage {
    pub fn init(buf: &mut [u8], layout: &HashBucketLayout) {
        buf[layout.occupied_offset..layout.occupied_offset + layout.bitset_bytes].fill(0);
        buf[layout.readable_offset..layout.readable_offset + layout.bitset_bytes].fill(0);
    }

    pub fn is_occupied(buf: &[u8], layout: &HashBucketLayout, index: usize) -> bool {
        bit_at(buf, layout.occupied_offset, index)
    }

    pub fn is_readable(buf: &[u8], layout: &HashBucketLayout, index: usize) -> bool {
        bit_at(buf, layout.readable_offset, index)
    }

    pub fn set_occupied(buf: &mut [u8], layout: &HashBucketLayout, index: usize, value: bool) {
        set_bit_at(buf, layout.occupied_offset, index, value);
    }

    pub fn set_readable(buf: &mut [u8], layout: &HashBucketLayout, index: usize, value: bool) {
        set_bit_at(buf, layout.readable_offset, index, value);
    }

    pub fn read_entry<K: FixedLayout, V: FixedLayout>(
        buf: &[u8],
        layout: &HashBucketLayout,
        index: usize,
    ) -> (K, V) {
        let at = layout.entry_offset(index);
        let key = K::read_from(&buf[at..at + K::SIZE]);
        let val = V::read_from(&buf[at + K::SIZE..at + layout.entry_size]);
        (key, val)
    }

    pub fn write_entry<K: FixedLayout, V: FixedLayout>(
        buf: &mut [u8],
        layout: &HashBucketLayout,
        index: usize,
        key: &K,
        val: &V,
    ) {
        let at = layout.entry_offset(index);
        key.write_to(&mut buf[at..at + K::SIZE]);
        val.write_to(&mut buf[at + K::SIZE..at + layout.entry_size]);
    }

    /// Every slot in the bucket is occupied: no vacant or tombstoned slot remains to insert
    /// into.
    pub fn is_full(buf: &[u8], layout: &HashBucketLayout) -> bool {
        (0..layout.max_entries).all(|i| Self::is_occupied(buf, layout, i))
    }

    /// Inserts `(key, val)` starting the probe at `start`, wrapping once around the bucket.
    /// Occupies the first slot that isn't readable yet (a vacant slot or a tombstone), so a
    /// tombstoned slot's storage is reused rather than leaked. Returns `false` if the bucket has
    /// no such slot.
    pub fn insert<K: FixedLayout, V: FixedLayout>(
        buf: &mut [u8],
        layout: &HashBucketLayout,
        start: usize,
        key: &K,
        val: &V,
    ) -> bool {
        let n = layout.max_entries;
        for step in 0..n {
            let index = (start + step) % n;
            if !Self::is_readable(buf, layout, index) {
                Self::write_entry(buf, layout, index, key, val);
                Self::set_occupied(buf, layout, index, true);
                Self::set_readable(buf, layout, index, true);
                return true;
            }
        }
        false
    }

    /// Collects every value stored under `key`, probing forward from `start` while slots remain
    /// `occupied` (§9: `occupied` must never be cleared by `remove`, only `readable`, or probing
    /// stops early and live values are lost past a tombstone).
    pub fn find<K: FixedLayout, V: FixedLayout>(
        buf: &[u8],
        layout: &HashBucketLayout,
        start: usize,
        key: &K,
        out: &mut Vec<V>,
    ) {
        let n = layout.max_entries;
        for step in 0..n {
            let index = (start + step) % n;
            if !Self::is_occupied(buf, layout, index) {
                break;
            }
            if Self::is_readable(buf, layout, index) {
                let (k, v) = Self::read_entry::<K, V>(buf, layout, index);
                if k == *key {
                    out.push(v);
                }
            }
        }
    }

    /// Clears `readable` on the first occupied slot matching `(key, val)` exactly, probing
    /// forward from `start`. Returns whether a match was found.
    pub fn remove<K: FixedLayout, V: FixedLayout>(
        buf: &mut [u8],
        layout: &HashBucketLayout,
        start: usize,
        key: &K,
        val: &V,
    ) -> bool {
        let n = layout.max_entries;
        for step in 0..n {
            let index = (start + step) % n;
            if !Self::is_occupied(buf, layout, index) {
                break;
            }
            if Self::is_readable(buf, layout, index) {
                let (k, v) = Self::read_entry::<K, V>(buf, layout, index);
                if k == *key && v == *val {
                    Self::set_readable(buf, layout, index, false);
                    return true;
                }
            }
        }
        false
    }

    /// Every readable `(key, value)` pair in the bucket, in slot order. Used when splitting a
    /// full bucket: the old bucket's live entries are re-hashed into the two replacement
    /// buckets.
    pub fn readable_entries<K: FixedLayout, V: FixedLayout>(
        buf: &[u8],
        layout: &HashBucketLayout,
    ) -> Vec<(K, V)> {
        (0..layout.max_entries)
            .filter(|&i| Self::is_readable(buf, layout, i))
            .map(|i| Self::read_entry(buf, layout, i))
            .collect()
    }
}

fn bit_at(buf: &[u8], base: usize, index: usize) -> bool {
    let byte = base + index / 8;
    let bit = index % 8;
    (buf[byte] >> bit) & 1 == 1
}

fn set_bit_at(buf: &mut [u8], base: usize, index: usize, value: bool) {
    let byte = base + index / 8;
    let bit = index % 8;
    if value {
        buf[byte] |= 1 << bit;
    } else {
        buf[byte] &= !(1 << bit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(layout: &HashBucketLayout) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        HashBucketPage::init(&mut buf, layout);
        buf
    }

    #[test]
    fn layout_fits_in_one_page() {
        let layout = HashBucketLayout::for_types::<u16, u16>();
        assert!(layout.max_entries > 0);
        assert!(layout.data_offset + layout.max_entries * layout.entry_size <= PAGE_SIZE);
    }

    #[test]
    fn insert_then_find_round_trips() {
        let layout = HashBucketLayout::for_types::<u16, u16>();
        let mut buf = fresh(&layout);
        assert!(HashBucketPage::insert(&mut buf, &layout, 0, &7u16, &1u16));
        assert!(HashBucketPage::insert(&mut buf, &layout, 0, &7u16, &2u16));

        let mut out = Vec::new();
        HashBucketPage::find(&buf, &layout, 0, &7u16, &mut out);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn remove_leaves_a_tombstone_that_does_not_stop_probing() {
        let layout = HashBucketLayout::for_types::<u16, u16>();
        let mut buf = fresh(&layout);
        HashBucketPage::insert(&mut buf, &layout, 0, &7u16, &1u16);
        HashBucketPage::insert(&mut buf, &layout, 0, &7u16, &2u16);

        assert!(HashBucketPage::remove(&mut buf, &layout, 0, &7u16, &1u16));

        let mut out = Vec::new();
        HashBucketPage::find(&buf, &layout, 0, &7u16, &mut out);
        assert_eq!(out, vec![2]);

        // occupied must stay set on the tombstoned slot so later probes don't stop short.
        assert!(HashBucketPage::is_occupied(&buf, &layout, 0));
        assert!(!HashBucketPage::is_readable(&buf, &layout, 0));
    }

    #[test]
    fn insert_reuses_a_tombstoned_slot() {
        let layout = HashBucketLayout::for_types::<u16, u16>();
        let mut buf = fresh(&layout);
        HashBucketPage::insert(&mut buf, &layout, 0, &1u16, &1u16);
        HashBucketPage::remove(&mut buf, &layout, 0, &1u16, &1u16);
        assert!(HashBucketPage::insert(&mut buf, &layout, 0, &2u16, &9u16));
        assert!(HashBucketPage::is_readable(&buf, &layout, 0));
    }

    #[test]
    fn is_full_once_every_slot_is_occupied() {
        let layout = HashBucketLayout::for_entry_size(2);
        let mut buf = fresh(&layout);
        for i in 0..layout.max_entries {
            assert!(HashBucketPage::insert(&mut buf, &layout, 0, &(i as u8), &0u8));
        }
        assert!(HashBucketPage::is_full(&buf, &layout));
    }

    #[test]
    fn readable_entries_skips_tombstones() {
        let layout = HashBucketLayout::for_types::<u16, u16>();
        let mut buf = fresh(&layout);
        HashBucketPage::insert(&mut buf, &layout, 0, &1u16, &10u16);
        HashBucketPage::insert(&mut buf, &layout, 0, &2u16, &20u16);
        HashBucketPage::remove(&mut buf, &layout, 0, &1u16, &10u16);

        let entries: Vec<(u16, u16)> = HashBucketPage::readable_entries(&buf, &layout);
        assert_eq!(entries, vec![(2u16, 20u16)]);
    }
}
