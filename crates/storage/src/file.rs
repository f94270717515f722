//! L0: the thinnest IO shim over a single backing file.
//!
//! Grounded on `reinhardbuyabo-rdbms/crates/storage/src/disk.rs`'s `DiskManager`: positioned
//! reads/writes via `FileExt::{read_at, write_at}`, a small fixed-size header at the front of
//! the file. Unlike that `DiskManager`, this accessor does not hand out page ids itself —
//! that's the page directory's job (§4.4) — it only knows how to seek to `page_id * PAGE_SIZE`
//! and move bytes.

use std::fs::{File, OpenOptions};
use std::io::{Error, ErrorKind};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{StorageError, StorageResult};
use crate::page::{PageId, PAGE_SIZE};

/// `{ version: u16, page_size: u16 }`, occupying the first [`FILE_HEADER_SIZE`] bytes of the
/// backing file. Page `k` begins at byte offset `FILE_HEADER_SIZE + k * PAGE_SIZE`.
pub const FILE_HEADER_SIZE: usize = 4;
const FILE_HEADER_VERSION: u16 = 1;

pub struct FileAccessor {
    file: File,
}

impl FileAccessor {
    /// Opens (creating if absent) the backing file, reading or writing the file header and
    /// failing with [`StorageError::InvalidPageSize`] if an existing header disagrees with
    /// [`PAGE_SIZE`].
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut accessor = FileAccessor { file };
        accessor.load_or_init_header()?;
        Ok(accessor)
    }

    fn load_or_init_header(&mut self) -> StorageResult<()> {
        let len = self.file.metadata()?.len();
        if len < FILE_HEADER_SIZE as u64 {
            let mut buf = [0u8; FILE_HEADER_SIZE];
            buf[0..2].copy_from_slice(&FILE_HEADER_VERSION.to_le_bytes());
            buf[2..4].copy_from_slice(&(PAGE_SIZE as u16).to_le_bytes());
            self.file.write_at(&buf, 0)?;
            return Ok(());
        }
        let mut buf = [0u8; FILE_HEADER_SIZE];
        self.file.read_at(&mut buf, 0)?;
        let found = u16::from_le_bytes(buf[2..4].try_into().unwrap());
        if found as usize != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE as u16,
                found,
            });
        }
        Ok(())
    }

    fn offset(page_id: PageId) -> u64 {
        FILE_HEADER_SIZE as u64 + page_id as u64 * PAGE_SIZE as u64
    }

    /// Reads exactly one page into `buf`, zero-filling if the page lies past the current end
    /// of the file (a page that was allocated but never written).
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::Io(Error::new(
                ErrorKind::InvalidInput,
                "page buffer must be exactly PAGE_SIZE bytes",
            )));
        }
        let offset = Self::offset(page_id);
        let len = self.file.metadata()?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }
        match self.file.read_at(buf, offset) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                buf[n..].fill(0);
                Ok(())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::Io(Error::new(
                ErrorKind::InvalidInput,
                "page buffer must be exactly PAGE_SIZE bytes",
            )));
        }
        self.file.write_at(buf, Self::offset(page_id))?;
        Ok(())
    }

    pub fn size(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn extend(&self, new_len: u64) -> StorageResult<()> {
        self.file.set_len(new_len)?;
        Ok(())
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
