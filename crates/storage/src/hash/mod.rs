//! L3: the extendible-hash multimap built on top of the buffer pool and page directory.
//!
//! Structurally grounded on `kl4mm-dbstorage/src/hash_table/extendible.rs`'s
//! `ExtendibleHashTable` (directory doubling, bucket splitting on the high bit), re-expressed
//! over this crate's synchronous, pinned-frame buffer pool instead of that crate's async
//! `nix::pread`/`pwrite` disk layer.

mod bucket_page;
mod directory_page;
mod layout;
mod table;

pub use layout::FixedLayout;
pub use table::HashTable;
