//! Part planning and byte-range reads for multipart archive uploads.
//!
//! An archive is uploaded as `part_count` contiguous parts of `part_size`
//! bytes (the last one may be shorter). Part sizes are always 1 MiB times a
//! power of two so that part boundaries fall on tree-hash chunk boundaries.

mod plan;
mod reader;
mod types;

pub use plan::{PlanLimits, is_valid_part_size, plan_parts};
pub use reader::{FileSource, LocalFileSource, read_part, tree_hash_file};
pub use types::{ByteRange, FileHandle, PartDescriptor, UploadPlan};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Default preferred part size: 4 MiB.
pub const DEFAULT_PART_SIZE: u64 = 4 * MIB;

/// Maximum number of parts the archive service accepts in one upload.
pub const MAX_PARTS: u64 = 10_000;

/// Largest part size the archive service accepts: 4 GiB.
pub const MAX_PART_SIZE: u64 = 4096 * MIB;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("archive of {size} bytes exceeds the maximum archive size of {max} bytes")]
    Oversize { size: u64, max: u64 },

    #[error("invalid part size {0}: must be 1 MiB times a power of two, at most 4 GiB")]
    InvalidPartSize(u64),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    Truncated {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid byte range: {0}")]
    InvalidRange(String),
}
