use serde::Serialize;

use crate::error::{Result, UploadError};

const MEGABYTE: u64 = 1024 * 1024; // 1MB
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 5 * MEGABYTE;
pub const MAX_CHUNK_SIZE_BYTES: u64 = 100 * MEGABYTE;
pub const MAX_PARTS_COUNT: u64 = 10000;

const SIZE_500MB: u64 = 500 * MEGABYTE;
const SIZE_10GB: u64 = 10 * 1024 * MEGABYTE;
const SIZE_50GB: u64 = 50 * 1024 * MEGABYTE;

/// A contiguous `[start, end)` byte range uploaded as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartRange {
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The layout of an upload. Ranges are computed on demand, so a plan costs
/// the same whatever its part count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartPlan {
    file_size: u64,
    chunk_size: u64,
    total_parts: u32,
}

impl PartPlan {
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Every range in order. Allocates one entry per part; prefer [`iter`]
    /// for large plans.
    ///
    /// [`iter`]: PartPlan::iter
    pub fn parts(&self) -> Vec<PartRange> {
        self.iter().collect()
    }

    pub fn get(&self, part_number: u32) -> Option<PartRange> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }
        let start = u64::from(part_number - 1) * self.chunk_size;
        Some(PartRange {
            part_number,
            start,
            end: start.saturating_add(self.chunk_size).min(self.file_size),
        })
    }

    pub fn iter(&self) -> Parts {
        Parts {
            plan: *self,
            next: 1,
        }
    }
}

/// Iterator over the ranges of a [`PartPlan`].
#[derive(Debug, Clone)]
pub struct Parts {
    plan: PartPlan,
    next: u32,
}

impl Iterator for Parts {
    type Item = PartRange;

    fn next(&mut self) -> Option<PartRange> {
        let range = self.plan.get(self.next)?;
        self.next += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (u64::from(self.plan.total_parts) + 1).saturating_sub(u64::from(self.next));
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Parts {}

impl IntoIterator for PartPlan {
    type Item = PartRange;
    type IntoIter = Parts;

    fn into_iter(self) -> Parts {
        self.iter()
    }
}

impl IntoIterator for &PartPlan {
    type Item = PartRange;
    type IntoIter = Parts;

    fn into_iter(self) -> Parts {
        self.iter()
    }
}

/// Splits `[0, file_size)` into `chunk_size` parts, the last one possibly shorter.
///
/// An empty file still yields a single zero-length part so the server-side
/// session can be completed the same way as any other upload.
pub fn plan(file_size: u64, chunk_size: u64) -> Result<PartPlan> {
    if chunk_size == 0 {
        return Err(UploadError::validation("chunk size must be greater than zero"));
    }

    let total_parts = file_size.div_ceil(chunk_size).max(1);
    let total_parts = u32::try_from(total_parts).map_err(|_| {
        UploadError::validation(format!(
            "File size ({} bytes) needs {} parts of {} bytes, more than a part number can address",
            file_size, total_parts, chunk_size
        ))
    })?;

    Ok(PartPlan {
        file_size,
        chunk_size,
        total_parts,
    })
}

/// Picks a part size that grows with the file so the part count stays
/// within `MAX_PARTS_COUNT`.
pub fn auto_chunk_size(file_size: u64) -> Result<u64> {
    let chunk_size = if file_size < SIZE_500MB {
        5 * MEGABYTE
    } else if file_size < SIZE_10GB {
        10 * MEGABYTE
    } else if file_size < SIZE_50GB {
        50 * MEGABYTE
    } else {
        100 * MEGABYTE
    };

    if file_size.div_ceil(chunk_size) <= MAX_PARTS_COUNT {
        return Ok(chunk_size);
    }

    let chunk_size = file_size.div_ceil(MAX_PARTS_COUNT);
    if chunk_size > MAX_CHUNK_SIZE_BYTES {
        let max_file_size = MAX_CHUNK_SIZE_BYTES * MAX_PARTS_COUNT;
        return Err(UploadError::validation(format!(
            "File size ({} bytes) exceeds maximum uploadable size ({} bytes = {} parts * {} bytes)",
            file_size, max_file_size, MAX_PARTS_COUNT, MAX_CHUNK_SIZE_BYTES
        )));
    }

    Ok(chunk_size)
}
