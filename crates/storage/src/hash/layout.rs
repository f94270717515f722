//! Fixed-size, bitwise-hashable keys and values.
//!
//! A hash bucket page stores entries as raw bytes at a runtime-computed stride
//! (`K::SIZE + V::SIZE`); it never needs to know anything about `K`/`V` beyond how to move them
//! in and out of a byte slice. Grounded on `kl4mm-dbstorage/src/pair.rs`'s `Pair<A, B>`, which
//! plays the same "two fixed things side by side on a page" role for that crate's hash table.

/// A type that can be hashed and stored as a fixed number of bytes.
pub trait FixedLayout: Copy + PartialEq {
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_layout_int {
    ($t:ty) => {
        impl FixedLayout for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn write_to(&self, buf: &mut [u8]) {
                buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            fn read_from(buf: &[u8]) -> Self {
                <$t>::from_le_bytes(buf[..Self::SIZE].try_into().unwrap())
            }
        }
    };
}

impl_fixed_layout_int!(u8);
impl_fixed_layout_int!(u16);
impl_fixed_layout_int!(u32);
impl_fixed_layout_int!(u64);
impl_fixed_layout_int!(i8);
impl_fixed_layout_int!(i16);
impl_fixed_layout_int!(i32);
impl_fixed_layout_int!(i64);

impl<const N: usize> FixedLayout for [u8; N] {
    const SIZE: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self[..]);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[..N]);
        out
    }
}

/// Seeded `XxHash64` over a key's bytewise layout (§ hash table, "hashed via `XxHash64`, seed
/// `0`"). Allocates a scratch buffer sized to `K::SIZE` rather than a compile-time-sized array,
/// since `K::SIZE` is a generic associated const and stable Rust can't size a local array from
/// it directly.
pub fn hash_key<K: FixedLayout>(key: &K) -> u64 {
    use std::hash::Hasher;
    use twox_hash::XxHash64;

    let mut buf = vec![0u8; K::SIZE];
    key.write_to(&mut buf);
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&buf);
    hasher.finish()
}
