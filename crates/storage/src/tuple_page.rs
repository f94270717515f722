//! L2b: a slotted page for variable-length records.
//!
//! Layout after the common header: a 2-byte slot count, a 2-byte free-space pointer, then a
//! slot directory (`{offset: u16, length: u16}` per slot, growing forward from the header) and
//! record bytes growing backward from the end of the page. A slot whose `length` is
//! [`TOMBSTONE`] has been deleted; its directory entry is kept (so later slot indices stay
//! stable) but its bytes are considered gone.
//!
//! Free functions over a raw page buffer, in the same style as [`crate::directory`] — the
//! buffer pool is the only thing that owns the bytes, as a pinned frame.

use crate::error::{StorageError, StorageResult};
use crate::page::{PageId, HEADER_SIZE, PAGE_SIZE};

const NUM_SLOTS_OFFSET: usize = HEADER_SIZE;
const FREE_PTR_OFFSET: usize = HEADER_SIZE + 2;
const SLOT_DIR_OFFSET: usize = HEADER_SIZE + 4;
const SLOT_SIZE: usize = 4;

/// Sentinel `length` marking a slot whose record has been deleted.
const TOMBSTONE: u16 = u16::MAX;

/// Locates a single record: the page it lives on and its slot within that page's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    pub page_id: PageId,
    pub slot: u16,
}

/// A thin, stateless handle for operating on a tuple page's bytes. Holds no data itself —
/// every method takes the buffer explicitly, matching [`crate::directory`]'s free-function
/// style, but grouped under a type so callers can write `TuplePage::put(&mut buf, ...)`.
pub struct TuplePage;

impl TuplePage {
    pub fn init(buf: &mut [u8]) {
        set_num_slots(buf, 0);
        set_free_ptr(buf, PAGE_SIZE as u16);
    }

    pub fn num_slots(buf: &[u8]) -> u16 {
        num_slots(buf)
    }

    pub fn slots_in_use(buf: &[u8]) -> usize {
        (0..num_slots(buf))
            .filter(|&slot| slot_length(buf, slot) != TOMBSTONE)
            .count()
    }

    /// Bytes available for a new record, accounting for the slot directory entry it would
    /// need.
    pub fn remaining_space(buf: &[u8]) -> usize {
        let dir_end = SLOT_DIR_OFFSET + num_slots(buf) as usize * SLOT_SIZE;
        let free_ptr = free_ptr(buf) as usize;
        free_ptr.saturating_sub(dir_end)
    }

    /// Inserts `data`, returning the slot it was assigned.
    pub fn put(buf: &mut [u8], page_id: PageId, data: &[u8]) -> StorageResult<u16> {
        let needed = data.len() + SLOT_SIZE;
        if Self::remaining_space(buf) < needed {
            return Err(StorageError::OutOfSpace {
                page_id,
                needed: data.len(),
            });
        }
        let new_free_ptr = free_ptr(buf) as usize - data.len();
        buf[new_free_ptr..new_free_ptr + data.len()].copy_from_slice(data);

        let slot = num_slots(buf);
        write_slot(buf, slot, new_free_ptr as u16, data.len() as u16);
        set_num_slots(buf, slot + 1);
        set_free_ptr(buf, new_free_ptr as u16);
        Ok(slot)
    }

    pub fn get<'a>(buf: &'a [u8], page_id: PageId, slot: u16) -> StorageResult<&'a [u8]> {
        if slot >= num_slots(buf) {
            return Err(StorageError::RecordDoesntExist { page_id, slot });
        }
        let length = slot_length(buf, slot);
        if length == TOMBSTONE {
            return Err(StorageError::RecordDeleted { page_id, slot });
        }
        let offset = slot_offset(buf, slot) as usize;
        Ok(&buf[offset..offset + length as usize])
    }

    pub fn delete(buf: &mut [u8], page_id: PageId, slot: u16) -> StorageResult<()> {
        if slot >= num_slots(buf) {
            return Err(StorageError::RecordDoesntExist { page_id, slot });
        }
        if slot_length(buf, slot) == TOMBSTONE {
            return Err(StorageError::RecordDeleted { page_id, slot });
        }
        write_slot(buf, slot, slot_offset(buf, slot), TOMBSTONE);
        Ok(())
    }
}

fn num_slots(buf: &[u8]) -> u16 {
    u16::from_le_bytes(buf[NUM_SLOTS_OFFSET..NUM_SLOTS_OFFSET + 2].try_into().unwrap())
}

fn set_num_slots(buf: &mut [u8], n: u16) {
    buf[NUM_SLOTS_OFFSET..NUM_SLOTS_OFFSET + 2].copy_from_slice(&n.to_le_bytes());
}

fn free_ptr(buf: &[u8]) -> u16 {
    u16::from_le_bytes(buf[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2].try_into().unwrap())
}

fn set_free_ptr(buf: &mut [u8], ptr: u16) {
    buf[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2].copy_from_slice(&ptr.to_le_bytes());
}

fn slot_at(slot: u16) -> usize {
    SLOT_DIR_OFFSET + slot as usize * SLOT_SIZE
}

fn slot_offset(buf: &[u8], slot: u16) -> u16 {
    let at = slot_at(slot);
    u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())
}

fn slot_length(buf: &[u8], slot: u16) -> u16 {
    let at = slot_at(slot);
    u16::from_le_bytes(buf[at + 2..at + 4].try_into().unwrap())
}

fn write_slot(buf: &mut [u8], slot: u16, offset: u16, length: u16) {
    let at = slot_at(slot);
    buf[at..at + 2].copy_from_slice(&offset.to_le_bytes());
    buf[at + 2..at + 4].copy_from_slice(&length.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        TuplePage::init(&mut buf);
        buf
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut buf = fresh_page();
        let slot = TuplePage::put(&mut buf, 1, b"hello world").unwrap();
        assert_eq!(TuplePage::get(&buf, 1, slot).unwrap(), b"hello world");
        assert_eq!(TuplePage::slots_in_use(&buf), 1);
    }

    #[test]
    fn delete_leaves_a_tombstone() {
        let mut buf = fresh_page();
        let slot = TuplePage::put(&mut buf, 1, b"gone soon").unwrap();
        TuplePage::delete(&mut buf, 1, slot).unwrap();
        assert!(matches!(
            TuplePage::get(&buf, 1, slot),
            Err(StorageError::RecordDeleted { .. })
        ));
        assert_eq!(TuplePage::slots_in_use(&buf), 0);
        assert_eq!(TuplePage::num_slots(&buf), 1, "slot directory entries are never compacted");
    }

    #[test]
    fn double_delete_fails() {
        let mut buf = fresh_page();
        let slot = TuplePage::put(&mut buf, 1, b"x").unwrap();
        TuplePage::delete(&mut buf, 1, slot).unwrap();
        assert!(matches!(
            TuplePage::delete(&mut buf, 1, slot),
            Err(StorageError::RecordDeleted { .. })
        ));
    }

    #[test]
    fn out_of_space_is_reported_without_corrupting_the_page() {
        let mut buf = fresh_page();
        let big = vec![0xABu8; PAGE_SIZE];
        let err = TuplePage::put(&mut buf, 9, &big).unwrap_err();
        assert!(matches!(err, StorageError::OutOfSpace { .. }));
        assert_eq!(TuplePage::num_slots(&buf), 0);
    }

    #[test]
    fn multiple_records_keep_independent_slots() {
        let mut buf = fresh_page();
        let a = TuplePage::put(&mut buf, 1, b"aaa").unwrap();
        let b = TuplePage::put(&mut buf, 1, b"bbbbb").unwrap();
        let c = TuplePage::put(&mut buf, 1, b"c").unwrap();
        assert_eq!(TuplePage::get(&buf, 1, a).unwrap(), b"aaa");
        assert_eq!(TuplePage::get(&buf, 1, b).unwrap(), b"bbbbb");
        assert_eq!(TuplePage::get(&buf, 1, c).unwrap(), b"c");
        assert_eq!(TuplePage::slots_in_use(&buf), 3);
    }

    #[test]
    fn nonexistent_slot_errors() {
        let buf = fresh_page();
        assert!(matches!(
            TuplePage::get(&buf, 1, 0),
            Err(StorageError::RecordDoesntExist { .. })
        ));
    }
}
