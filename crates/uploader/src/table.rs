use icepack_treehash::TreeHash;

use crate::UploadError;

/// Per-part tree hashes, indexed by part number.
///
/// Every slot is written once while parts finish in any order, and the
/// table is read once, in index order, after all workers have been joined.
pub(crate) struct ResultTable {
    slots: Vec<Option<TreeHash>>,
}

impl ResultTable {
    pub(crate) fn new(part_count: usize) -> Self {
        Self {
            slots: vec![None; part_count],
        }
    }

    /// Stores the tree hash of part `index`.
    pub(crate) fn fill(&mut self, index: usize, hash: TreeHash) -> Result<(), UploadError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| UploadError::Worker(format!("part {index} out of range (0..{len})")))?;
        if slot.is_some() {
            return Err(UploadError::Worker(format!("part {index} reported twice")));
        }
        *slot = Some(hash);
        Ok(())
    }

    pub(crate) fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns the hashes in part order; fails if any part is missing.
    pub(crate) fn into_ordered(self) -> Result<Vec<TreeHash>, UploadError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| UploadError::Worker(format!("part {index} never completed")))
            })
            .collect()
    }
}
