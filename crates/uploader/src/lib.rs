//! Concurrent multipart archive uploads.
//!
//! [`ArchiveUploader`] moves one local file into a [`Vault`](icepack_vault::Vault)
//! as a multipart upload.
//!
//! # Pipeline
//!
//! 1. **Plan**: derive part size and part count from the file size
//! 2. **Open**: initiate the remote upload session
//! 3. **Upload**: a bounded pool of workers reads, tree-hashes and uploads
//!    parts, retrying transient failures with backoff
//! 4. **Complete**: reduce the per-part tree hashes in part order into the
//!    archive checksum and complete the session
//!
//! Any terminal part failure stops the remaining workers and aborts the
//! session exactly once; there is no partial success.

pub mod config;
pub mod error;
mod part;
mod table;
pub mod types;
pub mod upload;

pub use config::{RetryPolicy, UploadConfig};
pub use error::UploadError;
pub use types::{UploadEvent, UploadReceipt, UploadState};
pub use upload::ArchiveUploader;
