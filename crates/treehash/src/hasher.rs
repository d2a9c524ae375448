use std::io;

use sha2::{Digest, Sha256};

use crate::{CHUNK_SIZE, TreeHash, tree_hash};

/// Incremental tree hasher.
///
/// Bytes may be fed in arbitrarily sized pieces; leaves are cut at fixed
/// chunk boundaries, so the result equals the one-shot
/// `tree_hash(&chunk_hashes(data, chunk_size))`. Only one chunk's worth of
/// hash state and the leaf digests are kept in memory.
pub struct TreeHasher {
    chunk_size: usize,
    current: Sha256,
    filled: usize,
    leaves: Vec<TreeHash>,
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeHasher {
    /// Creates a hasher with 1 MiB leaves.
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Creates a hasher with a custom leaf size (0 means [`CHUNK_SIZE`]).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            chunk_size,
            current: Sha256::new(),
            filled: 0,
            leaves: Vec::new(),
        }
    }

    /// Feeds more bytes into the hasher.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (self.chunk_size - self.filled).min(data.len());
            self.current.update(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == self.chunk_size {
                self.leaves.push(TreeHash::from_bytes(
                    self.current.finalize_reset().into(),
                ));
                self.filled = 0;
            }
        }
    }

    /// Number of complete leaves hashed so far.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Consumes the hasher and returns the tree hash.
    pub fn finalize(mut self) -> TreeHash {
        // A partial trailing chunk, or no input at all, is still one leaf.
        if self.filled > 0 || self.leaves.is_empty() {
            self.leaves
                .push(TreeHash::from_bytes(self.current.finalize().into()));
        }
        tree_hash(&self.leaves)
    }
}

impl io::Write for TreeHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
