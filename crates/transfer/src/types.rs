use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::{FileSource, TransferError};

/// Source file of an upload and its size, captured once before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
    size: u64,
}

impl FileHandle {
    /// Stats `path` through `source`.
    pub fn open(source: &dyn FileSource, path: &Path) -> Result<Self, TransferError> {
        let size = source.size(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Part size and part count for one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub part_count: usize,
}

impl UploadPlan {
    /// Builds a plan for an already validated part size.
    ///
    /// An empty archive still has one (empty) part.
    pub(crate) fn new(total_size: u64, part_size: u64) -> Self {
        let part_count = if total_size == 0 {
            1
        } else {
            total_size.div_ceil(part_size) as usize
        };
        Self {
            total_size,
            part_size,
            part_count,
        }
    }

    /// Returns the descriptor for part `index`, or `None` past the last part.
    pub fn part(&self, index: usize) -> Option<PartDescriptor> {
        if index >= self.part_count {
            return None;
        }
        let offset = index as u64 * self.part_size;
        let size = self.part_size.min(self.total_size - offset);
        Some(PartDescriptor {
            index,
            offset,
            size,
        })
    }

    /// All parts in index order.
    pub fn parts(&self) -> impl Iterator<Item = PartDescriptor> + '_ {
        (0..self.part_count).filter_map(|index| self.part(index))
    }
}

/// One unit of upload work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    pub index: usize,
    /// Byte offset of the part within the archive.
    pub offset: u64,
    /// Part length in bytes; only the last part may be shorter than the plan's part size.
    pub size: u64,
}

impl PartDescriptor {
    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.size)
    }
}

/// Byte range of a part as sent to the archive service.
///
/// Rendered inclusively as `bytes {first}-{last}/*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    offset: u64,
    len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first_byte(&self) -> u64 {
        self.offset
    }

    /// Inclusive last byte. A zero-length range collapses onto its offset.
    pub fn last_byte(&self) -> u64 {
        self.offset.saturating_add(self.len.saturating_sub(1))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/*", self.first_byte(), self.last_byte())
    }
}

/// Parses `bytes {first}-{last}/*`.
///
/// The wire form is inclusive, so it cannot express an empty range:
/// `bytes 0-0/*` always parses as the single byte at offset 0, even when it
/// was rendered from a zero-length range.
impl FromStr for ByteRange {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransferError::InvalidRange(s.to_string());

        let span = s
            .strip_prefix("bytes ")
            .and_then(|rest| rest.strip_suffix("/*"))
            .ok_or_else(invalid)?;
        let (first, last) = span.split_once('-').ok_or_else(invalid)?;
        let first: u64 = first.parse().map_err(|_| invalid())?;
        let last: u64 = last.parse().map_err(|_| invalid())?;
        let len = last
            .checked_sub(first)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(invalid)?;
        Ok(Self::new(first, len))
    }
}
