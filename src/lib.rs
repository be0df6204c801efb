//! SBITS: Sequential Bitmap Indexing for Time Series.
//!
//! An append-only, page-structured key-value store for monotonically
//! increasing keys on flash-like block devices. Three circular logs over
//! fixed-size pages — a data stream, an optional index stream of per-page
//! bitmap summaries, and an optional variable-length blob stream — plus a
//! bounded-error learned index (a monotone spline, optionally
//! radix-accelerated) over the data stream's minimum keys.
//!
//! Based on Ramon Lawrence's SBITS/EmbedDB embedded database research.

pub mod buffer_pool;
pub mod circular_log;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod page;
pub mod radix;
pub mod record_ops;
pub mod spline;
pub mod stats;
pub mod var_log;

// Re-exports for convenience
pub use buffer_pool::{BufferPool, SlotRole};
pub use circular_log::CircularLog;
pub use config::{ParamFlags, StorageConfig};
pub use device::{BlockDevice, FileBlockDevice, MemoryBlockDevice};
pub use engine::Engine;
pub use error::{Error, Result};
pub use iterator::{RangeFilter, RangeIter};
pub use manifest::Manifest;
pub use radix::{LearnedIndex, RadixTable};
pub use record_ops::{FixedIntOps, RecordOps};
pub use spline::Spline;
pub use stats::Stats;
pub use var_log::VarLog;
