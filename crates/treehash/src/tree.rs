use crate::{CHUNK_SIZE, TreeHash};

/// Hashes `data` in consecutive `chunk_size` slices (the last one may be
/// shorter) and returns the digests in offset order.
///
/// An empty buffer still yields one digest, the hash of the empty input.
/// A `chunk_size` of 0 falls back to [`CHUNK_SIZE`].
pub fn chunk_hashes(data: &[u8], chunk_size: usize) -> Vec<TreeHash> {
    let chunk_size = if chunk_size == 0 {
        CHUNK_SIZE
    } else {
        chunk_size
    };
    if data.is_empty() {
        return vec![TreeHash::of(&[])];
    }
    data.chunks(chunk_size).map(TreeHash::of).collect()
}

/// Reduces a digest sequence to one tree hash.
///
/// Each pass pairs digests strictly left to right and replaces every pair
/// with `SHA-256(first ++ second)`; an odd digest at the end of a pass is
/// carried up unchanged. The archive service recomputes this exact pairing,
/// so the order must not change.
///
/// A single digest is returned as is. An empty sequence reduces to the hash
/// of the empty input, matching `chunk_hashes(&[])`.
pub fn tree_hash(hashes: &[TreeHash]) -> TreeHash {
    if hashes.is_empty() {
        return TreeHash::of(&[]);
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [first, second] => TreeHash::combine(first, second),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

/// Tree hash of an in-memory buffer using 1 MiB leaves.
pub fn checksum(data: &[u8]) -> TreeHash {
    tree_hash(&chunk_hashes(data, CHUNK_SIZE))
}
