//! L-3: a small, CLI-facing configuration surface.
//!
//! `EngineConfig` holds exactly what [`crate::pool::BufferPool::open`] needs and nothing it
//! derives on its own (`PAGE_SIZE` is a compile-time constant, not configurable — it's carried
//! here only so the CLI can report it). Grounded on
//! `reinhardbuyabo-rdbms/crates/db/src/bin/rdbms.rs`'s `Args` struct: a `PathBuf` with a
//! sensible default, kept separate from `clap::Parser` itself so the storage crate doesn't pull
//! in a CLI dependency.

use std::path::PathBuf;

use crate::page::PAGE_SIZE;

/// Default number of buffer pool frames when a caller doesn't specify one.
pub const DEFAULT_NUM_FRAMES: usize = 64;

/// Everything [`crate::pool::BufferPool::open`] needs to bring up an engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub num_frames: usize,
}

impl EngineConfig {
    pub fn new(db_path: impl Into<PathBuf>, num_frames: usize) -> Self {
        EngineConfig { db_path: db_path.into(), num_frames }
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { db_path: PathBuf::from("pagekv.db"), num_frames: DEFAULT_NUM_FRAMES }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_positive_frame_count() {
        let config = EngineConfig::default();
        assert!(config.num_frames > 0);
        assert_eq!(config.page_size(), PAGE_SIZE);
    }
}
