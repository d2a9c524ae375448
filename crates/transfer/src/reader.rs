use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use icepack_treehash::{TreeHash, TreeHasher};

use crate::TransferError;
use crate::types::{FileHandle, PartDescriptor};

/// Read-only access to the bytes of a source file.
///
/// Every call opens the file on its own, so concurrent part reads never
/// share a cursor.
pub trait FileSource: Send + Sync {
    /// Size of the file in bytes.
    fn size(&self, path: &Path) -> Result<u64, TransferError>;

    /// Reads up to `max_len` bytes starting at `offset`. Fewer bytes are
    /// returned only at end of file.
    fn read_range(&self, path: &Path, offset: u64, max_len: u64)
    -> Result<Vec<u8>, TransferError>;
}

/// [`FileSource`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

impl FileSource for LocalFileSource {
    fn size(&self, path: &Path) -> Result<u64, TransferError> {
        let meta = std::fs::metadata(path).map_err(|e| open_error(path, e))?;
        Ok(meta.len())
    }

    fn read_range(
        &self,
        path: &Path,
        offset: u64,
        max_len: u64,
    ) -> Result<Vec<u8>, TransferError> {
        let mut file = File::open(path).map_err(|e| open_error(path, e))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(max_len as usize);
        file.take(max_len).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

fn open_error(path: &Path, err: io::Error) -> TransferError {
    if err.kind() == io::ErrorKind::NotFound {
        TransferError::NotFound(path.display().to_string())
    } else {
        TransferError::Io(err)
    }
}

/// Reads the bytes of one part.
///
/// Part sizes come from the file size captured in `file`, so a short read
/// means the file shrank after planning and is reported as
/// [`TransferError::Truncated`].
pub fn read_part(
    source: &dyn FileSource,
    file: &FileHandle,
    part: &PartDescriptor,
) -> Result<Vec<u8>, TransferError> {
    let data = source.read_range(file.path(), part.offset, part.size)?;
    let actual = data.len() as u64;
    if actual != part.size {
        return Err(TransferError::Truncated {
            offset: part.offset,
            expected: part.size,
            actual,
        });
    }
    Ok(data)
}

/// Computes the tree hash of an entire file without loading it into memory.
pub fn tree_hash_file(path: &Path) -> Result<TreeHash, TransferError> {
    let mut file = File::open(path).map_err(|e| open_error(path, e))?;
    let mut hasher = TreeHasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}
