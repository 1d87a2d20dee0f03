//! # mapped-region: offset-addressable memory-mapped files
//!
//! This crate presents a file as a large byte-addressable buffer with
//! page-aligned sizing, explicit durability control and advisory locking,
//! hiding the POSIX and Windows mapping APIs behind one interface.
//!
//! ## Features
//!
//! - **Bounds-checked access**: `read_at`/`write_at`, little-endian `u64` codecs and text reads
//! - **Thread-safe**: one reader/writer lock per region; clones share the mapping
//! - **Flush elision**: `flush()` skips the native sync when nothing was written
//! - **Advisory locking**: shared, non-blocking `flock` on Unix
//! - **Cross-platform**: `mmap`/`msync` on Unix, file-mapping views on Windows
//!
//! ## Quick Start
//!
//! ```no_run
//! use mapped_region::{create_region, flush};
//!
//! // Requesting 1 byte maps one full page
//! let region = create_region("data.bin", 1)?;
//!
//! region.write_at(b"Hello, mmap!", 100)?;
//! flush(&region)?;
//! region.close()?;
//! # Ok::<(), mapped_region::MmapError>(())
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: Error types for all region operations
//! - [`utils`]: Page size, alignment and bounds helpers
//! - [`protection`]: Requested access capabilities
//! - [`sys`]: Platform backends
//! - [`options`]: Open flags and the region builder
//! - [`flush`]: Automatic flush policies
//! - [`region`]: Core `MappedRegion` implementation
//! - [`manager`]: High-level convenience functions
//!
//! ## Feature Flags
//!
//! - `async`: Enables Tokio-based async helpers

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]

pub mod errors;
pub mod flush;
pub mod manager;
pub mod options;
pub mod protection;
pub mod region;
pub mod sys;
pub mod utils;

pub use errors::{MmapError, Result};
pub use flush::FlushPolicy;
pub use manager::{create_region, flush, load_region, write_region};
pub use options::{OpenFlags, RegionOptions};
pub use protection::Protection;
pub use region::MappedRegion;
pub use utils::{page_aligned_offset, page_size, round_up_to_page_size};

#[cfg(feature = "async")]
pub use manager::r#async::{create_region_async, flush_async};
