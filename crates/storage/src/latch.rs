//! The per-frame shared/exclusive spin latch (§5).
//!
//! Shaped like `MohamedAbdeen21-niwid-db/src/latch/mod.rs`'s `Latch` wrapper type (a thin
//! struct exposing guard-returning acquire methods that a frame embeds next to its data), but
//! implemented as the spec's own single-word compare-and-swap primitive rather than delegating
//! to `parking_lot::RwLock`: `holds` is one `AtomicU64`, `MAX` is the exclusively-held
//! sentinel, and every acquire is a bare CAS retry loop. The index-level structural latch
//! (`L_ht`, guarding a whole `HashTable` rather than one page) is a different, coarser
//! primitive built on `parking_lot::RwLock<()>` — see `hash::table::StructuralLatch`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel value of `holds` meaning "held exclusively".
const MAX: u64 = u64::MAX;

/// A non-reentrant shared/exclusive latch over a single 64-bit word.
#[derive(Debug, Default)]
pub struct Latch {
    holds: AtomicU64,
}

impl Latch {
    pub const fn new() -> Self {
        Latch {
            holds: AtomicU64::new(0),
        }
    }

    /// Number of current holders: `0` (free), `1..MAX` (that many shared holders), or `MAX`
    /// (held exclusively). Exposed for tests only — callers coordinate via the guards.
    #[cfg(test)]
    pub fn holds(&self) -> u64 {
        self.holds.load(Ordering::Acquire)
    }

    /// Blocks until a shared hold can be taken and returns a guard that releases it on drop.
    pub fn shared(&self) -> SharedGuard<'_> {
        loop {
            let current = self.holds.load(Ordering::Acquire);
            if current < MAX - 1 {
                if self
                    .holds
                    .compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return SharedGuard { latch: self };
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Blocks until the latch is free and returns an exclusive guard that releases it on drop.
    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        loop {
            if self
                .holds
                .compare_exchange_weak(0, MAX, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return ExclusiveGuard { latch: self };
            }
            std::hint::spin_loop();
        }
    }

    /// Non-blocking variant of [`Latch::exclusive`].
    pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        self.holds
            .compare_exchange(0, MAX, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| ExclusiveGuard { latch: self })
    }

    pub fn is_locked(&self) -> bool {
        self.holds.load(Ordering::Acquire) != 0
    }
}

/// RAII guard for a shared hold. The `1` it subtracts on drop is a pure value, not a pointer
/// into the frame it guards (§9, "Self-referential frame table").
pub struct SharedGuard<'a> {
    latch: &'a Latch,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.latch.holds.fetch_sub(1, Ordering::Release);
    }
}

/// RAII guard for the exclusive hold.
pub struct ExclusiveGuard<'a> {
    latch: &'a Latch,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.latch.holds.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn n_shared_holders_then_release() {
        let latch = Latch::new();
        let guards: Vec<_> = (0..5).map(|_| latch.shared()).collect();
        assert_eq!(latch.holds(), 5);
        drop(guards);
        assert_eq!(latch.holds(), 0);
    }

    #[test]
    fn exclusive_sets_and_clears_max() {
        let latch = Latch::new();
        let guard = latch.exclusive();
        assert_eq!(latch.holds(), MAX);
        drop(guard);
        assert_eq!(latch.holds(), 0);
    }

    #[test]
    fn exclusive_excludes_concurrent_shared() {
        let latch = Arc::new(Latch::new());
        let writer_has_lock = Arc::new(AtomicBool::new(false));
        let reader_observed_conflict = Arc::new(AtomicBool::new(false));

        let guard = latch.exclusive();
        writer_has_lock.store(true, Ordering::SeqCst);

        let latch2 = latch.clone();
        let writer_has_lock2 = writer_has_lock.clone();
        let reader_observed_conflict2 = reader_observed_conflict.clone();
        let reader = thread::spawn(move || {
            while writer_has_lock2.load(Ordering::SeqCst) {
                if latch2.try_exclusive().is_none() && latch2.holds() == MAX {
                    reader_observed_conflict2.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(50));
            }
            let _shared = latch2.shared();
        });

        thread::sleep(Duration::from_millis(10));
        writer_has_lock.store(false, Ordering::SeqCst);
        drop(guard);
        reader.join().unwrap();
        assert!(reader_observed_conflict.load(Ordering::SeqCst));
    }
}
