use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pagekv::config::{EngineConfig, DEFAULT_NUM_FRAMES};
use pagekv::{BufferPool, HashTable, StorageError};

/// The directory page a fresh table always lands on (§ the page-directory allocator hands out
/// page 1 as its very first managed page) — lets `open` reattach without a separate catalog.
const DIR_PAGE_ID: u32 = 1;

#[derive(Parser, Debug)]
#[command(name = "pagekv", about = "Inspect and exercise a pagekv hash table file")]
struct Args {
    #[arg(long, value_name = "PATH", default_value = "pagekv.db")]
    db: PathBuf,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_NUM_FRAMES)]
    frames: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert a key/value pair (multimap: repeated keys accumulate values).
    Put { key: u64, value: u64 },
    /// Print every value stored under a key, one per line.
    Get { key: u64 },
    /// Remove a single matching key/value occurrence.
    Remove { key: u64, value: u64 },
    /// Report the hash table's directory page id and current global depth.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = EngineConfig::new(args.db.clone(), args.frames);
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("create db directory")?;
    }

    let pool = BufferPool::open(&config.db_path, config.num_frames)
        .with_context(|| format!("open {}", config.db_path.display()))?;
    let ht = open_or_create(&pool)?;

    match args.command {
        Command::Put { key, value } => {
            ht.put(key, value).context("put")?;
            println!("ok");
        }
        Command::Get { key } => {
            let values = ht.get(&key).context("get")?;
            if values.is_empty() {
                println!("(no values)");
            }
            for v in values {
                println!("{v}");
            }
        }
        Command::Remove { key, value } => {
            let removed = ht.remove(&key, &value).context("remove")?;
            println!("{}", if removed { "removed" } else { "not found" });
        }
        Command::Stats => {
            println!("db: {}", config.db_path.display());
            println!("page size: {} bytes", config.page_size());
            println!("directory page: {}", ht.dir_page_id());
            println!("global depth: {}", ht.global_depth().context("global_depth")?);
        }
    }

    pool.flush_all().context("flush")?;
    Ok(())
}

/// Opens the hash table at the well-known directory page id, creating it if this is a fresh
/// file (a page that was never formatted as a hash directory fails `open` with
/// [`StorageError::Invalid`]).
fn open_or_create(pool: &BufferPool) -> Result<HashTable<'_, u64, u64>> {
    match HashTable::<u64, u64>::open(pool, DIR_PAGE_ID) {
        Ok(ht) => Ok(ht),
        Err(StorageError::Invalid { .. }) => {
            let ht = HashTable::<u64, u64>::create(pool).context("create hash table")?;
            if ht.dir_page_id() != DIR_PAGE_ID {
                anyhow::bail!(
                    "hash table directory landed on page {} instead of the expected {DIR_PAGE_ID}",
                    ht.dir_page_id()
                );
            }
            Ok(ht)
        }
        Err(e) => Err(e).context("open hash table"),
    }
}
