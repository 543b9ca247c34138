use crate::error::ArenaError;
use crate::memory::{checked_range, MemoryBlock, UploadTarget};

/// A byte span written since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirtyRange {
    pub offset_b: u32,
    pub size_b: u32,
}

impl DirtyRange {
    pub fn end_b(&self) -> u32 {
        self.offset_b + self.size_b
    }

    /// Widen to `alignment` boundaries without passing `limit_b`.
    fn aligned(self, alignment: u32, limit_b: u32) -> Self {
        let start = self.offset_b - self.offset_b % alignment;
        let end = self.end_b().div_ceil(alignment).saturating_mul(alignment).min(limit_b);
        Self {
            offset_b: start,
            size_b: end - start,
        }
    }
}

/// What one flush cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub full_upload: bool,
    pub range_uploads: u32,
    pub bytes: u64,
}

impl FlushStats {
    pub fn upload_calls(&self) -> u32 {
        self.range_uploads + u32::from(self.full_upload)
    }

    pub fn accumulate(&mut self, other: FlushStats) {
        self.full_upload |= other.full_upload;
        self.range_uploads += other.range_uploads;
        self.bytes += other.bytes;
    }
}

/// CPU-mirrored buffer that records written ranges and uploads them lazily.
///
/// Writes only touch the mirror. [`flush`](Self::flush) pushes changes to the
/// [`UploadTarget`]: one full upload if the buffer was resized since the last
/// flush or the target's size disagrees with the mirror, otherwise one partial upload per disjoint run of dirty bytes, after
/// overlapping and adjacent ranges are merged.
pub struct DirtyRangeBuffer<U> {
    mirror: Vec<u8>,
    dirty: Vec<DirtyRange>,
    resized: bool,
    target: U,
}

impl<U: UploadTarget> DirtyRangeBuffer<U> {
    pub fn new(size_b: u32, target: U) -> Self {
        Self {
            mirror: vec![0; size_b as usize],
            dirty: Vec::new(),
            resized: false,
            target,
        }
    }

    pub fn flush(&mut self) -> FlushStats {
        let size_b = self.size();
        if self.resized || self.target.size() != size_b {
            tracing::trace!(size_b, resized = self.resized, "full upload");
            self.target.upload_full(&self.mirror);
            self.dirty.clear();
            self.resized = false;
            return FlushStats {
                full_upload: true,
                range_uploads: 0,
                bytes: size_b as u64,
            };
        }
        if self.dirty.is_empty() {
            return FlushStats::default();
        }

        let alignment = self.target.copy_alignment().max(1);
        let mut ranges = std::mem::take(&mut self.dirty);
        for range in &mut ranges {
            *range = range.aligned(alignment, size_b);
        }
        ranges.sort_unstable();

        let mut stats = FlushStats::default();
        let mut current = ranges[0];
        for next in &ranges[1..] {
            if next.offset_b <= current.end_b() {
                current.size_b = current.end_b().max(next.end_b()) - current.offset_b;
            } else {
                self.upload(current, &mut stats);
                current = *next;
            }
        }
        self.upload(current, &mut stats);

        tracing::trace!(
            writes = ranges.len(),
            uploads = stats.range_uploads,
            bytes = stats.bytes,
            "flushed dirty ranges"
        );
        ranges.clear();
        self.dirty = ranges;
        stats
    }

    fn upload(&mut self, range: DirtyRange, stats: &mut FlushStats) {
        let bytes = &self.mirror[range.offset_b as usize..range.end_b() as usize];
        self.target.upload_range(range.offset_b, bytes);
        stats.range_uploads += 1;
        stats.bytes += range.size_b as u64;
    }

    /// Ranges written since the last flush, in write order.
    pub fn dirty_ranges(&self) -> &[DirtyRange] {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.resized || !self.dirty.is_empty() || self.target.size() != self.size()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mirror
    }

    pub fn target(&self) -> &U {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut U {
        &mut self.target
    }
}

impl<U: UploadTarget> MemoryBlock for DirtyRangeBuffer<U> {
    fn resize(&mut self, size_b: u32) -> Result<(), ArenaError> {
        let additional = (size_b as usize).saturating_sub(self.mirror.len());
        self.mirror
            .try_reserve_exact(additional)
            .map_err(|_| ArenaError::ResizeFailed {
                requested_b: size_b as u64,
                limit_b: self.mirror.capacity() as u64,
            })?;
        if size_b as usize == self.mirror.len() {
            return Ok(());
        }
        self.mirror.resize(size_b as usize, 0);
        self.resized = true;
        // Ranges past a shrink no longer exist in the mirror.
        self.dirty.retain_mut(|range| {
            range.size_b = range.end_b().min(size_b).saturating_sub(range.offset_b);
            range.size_b > 0
        });
        Ok(())
    }

    fn write(&mut self, offset_b: u32, data: &[u8]) -> Result<(), ArenaError> {
        let range = checked_range(offset_b, data.len(), self.size())?;
        if data.is_empty() {
            return Ok(());
        }
        self.mirror[range].copy_from_slice(data);
        self.dirty.push(DirtyRange {
            offset_b,
            size_b: data.len() as u32,
        });
        Ok(())
    }

    fn read(&self, offset_b: u32, dst: &mut [u8]) -> Result<(), ArenaError> {
        let range = checked_range(offset_b, dst.len(), self.size())?;
        dst.copy_from_slice(&self.mirror[range]);
        Ok(())
    }

    fn size(&self) -> u32 {
        self.mirror.len() as u32
    }
}
