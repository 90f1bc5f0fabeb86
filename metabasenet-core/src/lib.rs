//! MetabaseNet Core - Node Kernel and Time-Series Storage
//!
//! The kernel a MetabaseNet node is assembled around:
//!
//! - **CTSDB**: a time-bucketed, content-addressed store mapping
//!   `(timestamp, digest)` to records, backed by immutable compressed
//!   chunk files with an in-memory write buffer
//! - **Docker**: the module container that owns every long-lived service
//!   and drives its `Initialize/Run/Halt/Deinitialize` lifecycle
//! - **Bus / capabilities**: topic publish-subscribe and typed lookup so
//!   modules cooperate without holding references to each other

pub mod codec;
pub mod ctsdb;
pub mod docker;
pub mod util;

mod error;
mod types;

pub use error::{MetabaseError, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Width of a time bucket in seconds
    pub const BUCKET_WIDTH_SECONDS: u64 = 3600;

    /// Minimum free disk space required to start a node (100MB)
    pub const MINIMUM_DISK_AVAILABLE: u64 = 100 * 1024 * 1024;

    /// Log file size cap range, in megabytes
    pub const LOG_FILE_SIZE_RANGE: (u64, u64) = (1, 2048);

    /// Log history count range
    pub const LOG_HISTORY_RANGE: (u64, u64) = (2, 0x7FFF_FFFF);
}
