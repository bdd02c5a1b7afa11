//! Multi-dimensional point index over an ordered key-value store.
//!
//! zedbase linearizes 2D points with non-negative 32-bit integer coordinates
//! into 8-byte Z-codes (Morton codes) and stores them as rows of an ordered,
//! byte-keyed wide-column store. A companion index table partitions the
//! Z-code space into prefix-named buckets that split in half, one bit at a
//! time, as they fill up. On top of that partition the client offers point
//! insertion, equality lookup, rectangular range queries, and incremental
//! k-nearest-neighbor search.
//!
//! The store itself is abstracted behind the [`Store`] trait; any ordered
//! key-value store with floor lookups, atomic counters, and interval scans
//! can back an index. [`MemoryStore`] is the bundled in-process
//! implementation.
//!
//! Only one logical writer may operate on a given index at a time. Readers
//! can run concurrently with the writer and may observe an in-flight
//! insertion or miss it, but never a torn index.
//!
//! ```rust
//! use zedbase::{Client, IndexConfig, MemoryStore, Point, Range};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut client = Client::open(store, IndexConfig::new("demo"))?;
//!
//! client.insert(&Point::new(1, 10, 20))?;
//! client.insert(&Point::new(2, 300, 400))?;
//!
//! let hits = client.range_query(&Range::new(0, 50)?, &Range::new(0, 50)?)?;
//! assert_eq!(hits.len(), 1);
//!
//! let nearest = client.nearest_neighbors(&Point::new(-1, 0, 0), 1)?;
//! assert_eq!(nearest[0].id, 1);
//! # Ok::<(), zedbase::ZedbaseError>(())
//! ```

pub mod bucket;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod storage;
pub mod types;

pub use bucket::Bucket;
pub use client::Client;
pub use codec::ZCode;
pub use config::IndexConfig;
pub use error::{Result, ZedbaseError};
pub use filter::{FilterDecision, RangeFilter, ScanFilter};
pub use index::{BucketEntry, BucketKey, Index};
pub use storage::{MemoryStore, PutOp, RowCells, ScanIter, Store};
pub use types::{Point, Range};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{Client, IndexConfig, MemoryStore, Point, Range, Result, ZedbaseError};
}
