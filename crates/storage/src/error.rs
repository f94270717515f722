//! Crate-wide error taxonomy.
//!
//! Grounded on the teacher workspace's per-crate `thiserror` enums (`storage::BufferPoolError`,
//! `wal::WalError`): one flat enum per crate boundary rather than a tree of nested error
//! types, with `#[from] std::io::Error` for the file-accessor layer.

use crate::page::{PageId, PageType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file page size mismatch: expected {expected}, found {found}")]
    InvalidPageSize { expected: u16, found: u16 },

    #[error("buffer pool exhausted: every frame is pinned")]
    Full,

    #[error("page {page_id} expected type {expected:?}, found {found:?}")]
    PageTypeMismatch {
        page_id: PageId,
        expected: PageType,
        found: PageType,
    },

    #[error("page {page_id} failed to load: id mismatch or corrupt header")]
    Invalid { page_id: PageId },

    #[error("page {page_id} is not mapped by any page-directory page")]
    PageNotFound { page_id: PageId },

    #[error("page-directory page {page_id} is corrupt")]
    CorruptDirectoryPage { page_id: PageId },

    #[error("cannot free page {page_id}: {pins} residual pin(s)")]
    CannotFree { page_id: PageId, pins: u64 },

    #[error("tuple page {page_id} has no room for a record of {needed} bytes")]
    OutOfSpace { page_id: PageId, needed: usize },

    #[error("record at slot {slot} on page {page_id} was deleted")]
    RecordDeleted { page_id: PageId, slot: u16 },

    #[error("record at slot {slot} on page {page_id} does not exist")]
    RecordDoesntExist { page_id: PageId, slot: u16 },

    #[error("checksum mismatch on page {page_id}")]
    ChecksumMismatch { page_id: PageId },
}

pub type StorageResult<T> = Result<T, StorageError>;
