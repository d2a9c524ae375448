use serde::{Deserialize, Serialize};

use crate::types::UploadPlan;
use crate::{MAX_PART_SIZE, MAX_PARTS, MIB, TransferError};

/// Part-count and part-size ceilings imposed by the archive service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_parts: u64,
    pub max_part_size: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_parts: MAX_PARTS,
            max_part_size: MAX_PART_SIZE,
        }
    }
}

impl PlanLimits {
    /// Largest archive that can be uploaded within these limits.
    pub fn max_archive_size(&self) -> u64 {
        self.max_part_size.saturating_mul(self.max_parts)
    }
}

/// Returns `true` if `size` is 1 MiB times a power of two and within
/// `max_part_size`.
pub fn is_valid_part_size(size: u64, limits: &PlanLimits) -> bool {
    size >= MIB && size <= limits.max_part_size && size % MIB == 0 && (size / MIB).is_power_of_two()
}

/// Derives the part size and part count for an archive of `total_size` bytes.
///
/// `preferred_part_size` is used as is when `max_parts` parts of that size
/// cover the archive. Otherwise the smallest part size that does is rounded
/// up to the next power-of-two multiple of 1 MiB; rounding down could exceed
/// the part limit.
pub fn plan_parts(
    total_size: u64,
    preferred_part_size: u64,
    limits: &PlanLimits,
) -> Result<UploadPlan, TransferError> {
    if !is_valid_part_size(preferred_part_size, limits) {
        return Err(TransferError::InvalidPartSize(preferred_part_size));
    }

    let max = limits.max_archive_size();
    if total_size > max {
        return Err(TransferError::Oversize {
            size: total_size,
            max,
        });
    }

    let max_parts = limits.max_parts.max(1);
    let part_size = if preferred_part_size.saturating_mul(max_parts) >= total_size {
        preferred_part_size
    } else {
        minimum_part_size(total_size, max_parts)
    };

    Ok(UploadPlan::new(total_size, part_size))
}

/// Smallest `1 MiB * 2^k` such that `max_parts` parts cover `total_size`.
fn minimum_part_size(total_size: u64, max_parts: u64) -> u64 {
    let min = total_size.div_ceil(max_parts);
    let mut part_size = MIB;
    while part_size < min {
        part_size *= 2;
    }
    part_size
}
