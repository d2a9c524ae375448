//! Upload error types.

use icepack_transfer::TransferError;
use icepack_vault::VaultError;

/// Terminal failure of an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid upload configuration: {0}")]
    InvalidConfig(String),

    #[error("archive of {size} bytes exceeds the maximum archive size of {max} bytes")]
    Oversize { size: u64, max: u64 },

    #[error("cannot open source file: {0}")]
    Source(#[source] TransferError),

    #[error("failed to read part {part_index}: {source}")]
    PartRead {
        part_index: usize,
        #[source]
        source: TransferError,
    },

    #[error("part {part_index} failed after {attempts} attempt(s): {last_error}")]
    PartUploadFailed {
        part_index: usize,
        attempts: u32,
        #[source]
        last_error: VaultError,
    },

    #[error("vault {operation} call failed: {source}")]
    RemoteProtocol {
        operation: &'static str,
        #[source]
        source: VaultError,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("worker error: {0}")]
    Worker(String),
}

impl UploadError {
    /// Index of the part that caused the failure, if a single part did.
    pub fn part_index(&self) -> Option<usize> {
        match self {
            UploadError::PartRead { part_index, .. }
            | UploadError::PartUploadFailed { part_index, .. } => Some(*part_index),
            _ => None,
        }
    }

    /// Maps a planning failure.
    pub(crate) fn from_plan(err: TransferError) -> Self {
        match err {
            TransferError::Oversize { size, max } => UploadError::Oversize { size, max },
            TransferError::InvalidPartSize(size) => {
                UploadError::InvalidConfig(format!("invalid part size: {size}"))
            }
            other => UploadError::Source(other),
        }
    }
}
