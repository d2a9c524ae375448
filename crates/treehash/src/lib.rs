//! SHA-256 tree hashes for multipart archive uploads.
//!
//! The archive service verifies every upload with a tree hash: the payload
//! is cut into 1 MiB chunks, each chunk is hashed with SHA-256, and adjacent
//! digests are then combined pairwise, left to right, until one remains.
//! The same reduction is applied a second time over the per-part tree hashes
//! to produce the checksum of the whole archive.

mod hasher;
mod tree;

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

pub use hasher::TreeHasher;
pub use tree::{checksum, chunk_hashes, tree_hash};

/// Base chunk size hashed as one leaf: 1 MiB.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Errors produced when decoding a hex checksum.
#[derive(Debug, thiserror::Error)]
pub enum TreeHashError {
    #[error("invalid hex checksum: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("checksum must be {DIGEST_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// A single 32-byte SHA-256 digest: a chunk hash, a part tree hash or an
/// archive tree hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeHash([u8; DIGEST_LEN]);

impl TreeHash {
    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Plain SHA-256 of `data` (one leaf of the tree).
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex, the wire form of a checksum (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 64-character hex checksum.
    pub fn from_hex(s: &str) -> Result<Self, TreeHashError> {
        let bytes = hex::decode(s)?;
        let digest: [u8; DIGEST_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TreeHashError::InvalidLength(bytes.len()))?;
        Ok(Self(digest))
    }

    /// `SHA-256(left ++ right)`.
    pub(crate) fn combine(left: &TreeHash, right: &TreeHash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", self.to_hex())
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for TreeHash {
    type Err = TreeHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; DIGEST_LEN]> for TreeHash {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}
