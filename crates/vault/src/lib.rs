//! Archive vault capability consumed by the uploader.
//!
//! A vault accepts an archive as a multipart upload: the uploader opens a
//! session, sends every part with its byte range and tree-hash checksum,
//! and then either completes the session with the archive size and
//! whole-archive checksum, or aborts it. Remote services implement
//! [`Vault`]; [`LocalVault`] stores archives in a local directory.

pub mod local;

use std::future::Future;
use std::pin::Pin;

pub use icepack_transfer::ByteRange;
pub use local::{ArchiveMetadata, LocalVault};

/// Boxed future returned by [`Vault`] methods.
pub type VaultFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VaultError>> + Send + 'a>>;

/// Errors reported by a vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("transient vault error: {0}")]
    Transient(String),

    #[error("vault protocol error: {0}")]
    Protocol(String),

    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] icepack_transfer::TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// Returns `true` if repeating the same call may succeed.
    ///
    /// A checksum mismatch on a part means the body was damaged on the way,
    /// so it is retried like a network failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::Transient(_) | VaultError::ChecksumMismatch { .. } | VaultError::Io(_)
        )
    }
}

/// Handle of an open multipart upload.
///
/// Created by [`Vault::initiate_upload`] and closed exactly once, by either
/// [`Vault::complete_upload`] or [`Vault::abort_upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    upload_id: String,
}

impl UploadSession {
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// Multipart upload API of an archive vault.
///
/// `upload_part` is called concurrently for different parts of the same
/// session, so implementations must not keep per-call mutable state on the
/// session handle.
pub trait Vault: Send + Sync {
    /// Opens a multipart upload whose parts are `part_size` bytes long.
    fn initiate_upload<'a>(
        &'a self,
        description: &'a str,
        part_size: u64,
    ) -> VaultFuture<'a, UploadSession>;

    /// Uploads one part. `checksum` is the lowercase hex tree hash of `body`.
    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        range: ByteRange,
        checksum: &'a str,
        body: &'a [u8],
    ) -> VaultFuture<'a, ()>;

    /// Assembles the uploaded parts into an archive and returns its id.
    fn complete_upload<'a>(
        &'a self,
        session: &'a UploadSession,
        archive_size: u64,
        checksum: &'a str,
    ) -> VaultFuture<'a, String>;

    /// Discards the upload and every part sent so far.
    fn abort_upload<'a>(&'a self, session: &'a UploadSession) -> VaultFuture<'a, ()>;

    /// Human-readable vault name for logs.
    fn name(&self) -> &str;
}
