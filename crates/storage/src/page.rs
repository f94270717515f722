//! Fixed on-disk page layout shared by every page kind in this crate.
//!
//! A page is always exactly [`PAGE_SIZE`] bytes. The first [`HEADER_SIZE`] bytes are the
//! common header (magic, checksum, id, lsn, type); everything after that is owned by the
//! page kind (directory bitmap, hash directory/bucket arrays, tuple slots, ...).

/// Size of a page, including its header, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel written into a page's `magic` field once it has been formatted.
pub const MAGIC: u32 = 0xD3AD_B33F;

/// Bytes occupied by [`PageHeader`] at the front of every page. Padded past the field sum
/// (17 bytes) to a round, 8-byte-aligned size so page kinds laying out arrays after it don't
/// have to think about byte-level field alignment.
pub const HEADER_SIZE: usize = 24;

pub type PageId = u32;

/// The kind of payload a formatted page carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Free = 0,
    Directory = 1,
    HashDirectory = 2,
    HashBucket = 3,
    Tuple = 4,
}

impl PageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PageType::Free),
            1 => Some(PageType::Directory),
            2 => Some(PageType::HashDirectory),
            3 => Some(PageType::HashBucket),
            4 => Some(PageType::Tuple),
            _ => None,
        }
    }
}

/// The fixed header every formatted page begins with.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub magic: u32,
    pub crc32: u32,
    pub page_id: PageId,
    /// Reserved for write-ahead logging; always zero in this crate.
    pub lsn: u32,
    pub page_type: PageType,
}

impl PageHeader {
    /// Reads the header out of a page buffer. Returns `None` if `magic` is absent, i.e. the
    /// page has never been formatted.
    pub fn parse(buf: &[u8]) -> Option<PageHeader> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return None;
        }
        let crc32 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let page_id = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let lsn = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let page_type = PageType::from_byte(buf[16])?;
        Some(PageHeader {
            magic,
            crc32,
            page_id,
            lsn,
            page_type,
        })
    }

    /// Stamps a freshly allocated page's header in place and refreshes the checksum.
    pub fn format(buf: &mut [u8], page_id: PageId, page_type: PageType) {
        debug_assert!(buf.len() >= PAGE_SIZE);
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&page_id.to_le_bytes());
        buf[12..16].copy_from_slice(&0u32.to_le_bytes());
        buf[16] = page_type as u8;
        buf[17..HEADER_SIZE].fill(0);
        Self::refresh_checksum(buf);
    }

    /// Recomputes and rewrites the `crc32` field from the current page body. Verification
    /// against this value is optional (§7: mismatches are surfaced via
    /// [`PageHeader::verify_checksum`], never asserted implicitly on every read).
    pub fn refresh_checksum(buf: &mut [u8]) {
        let crc = crc32fast::hash(&buf[HEADER_SIZE..PAGE_SIZE]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
    }

    pub fn verify_checksum(buf: &[u8]) -> bool {
        let stored = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        crc32fast::hash(&buf[HEADER_SIZE..PAGE_SIZE]) == stored
    }

    pub fn write_page_type(buf: &mut [u8], page_type: PageType) {
        buf[16] = page_type as u8;
    }
}
