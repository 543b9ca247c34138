use std::ops::Range;

use crate::error::ArenaError;

/// A resizable byte buffer with bounds-checked access.
///
/// This is the seam to whatever actually stores the bytes: a host vector, a
/// CPU mirror of a GPU buffer, or a mapped region. Resizing keeps the common
/// prefix and zero-fills any growth. Offsets derived before a resize must be
/// re-derived afterwards.
pub trait MemoryBlock {
    /// Resize to exactly `size_b` bytes.
    fn resize(&mut self, size_b: u32) -> Result<(), ArenaError>;

    /// Copy `data` into the block at `offset_b`.
    fn write(&mut self, offset_b: u32, data: &[u8]) -> Result<(), ArenaError>;

    /// Copy `dst.len()` bytes starting at `offset_b` into `dst`.
    fn read(&self, offset_b: u32, dst: &mut [u8]) -> Result<(), ArenaError>;

    /// Current size in bytes.
    fn size(&self) -> u32;
}

/// Validate `offset_b..offset_b + len` against a block of `capacity_b` bytes.
pub(crate) fn checked_range(
    offset_b: u32,
    len: usize,
    capacity_b: u32,
) -> Result<Range<usize>, ArenaError> {
    let end = offset_b as u64 + len as u64;
    if end > capacity_b as u64 {
        return Err(ArenaError::OutOfBounds {
            offset_b: offset_b as u64,
            size_b: len as u64,
            capacity_b,
        });
    }
    Ok(offset_b as usize..end as usize)
}

/// Host-memory block backed by a `Vec<u8>`.
///
/// An optional byte limit makes resize failures reproducible.
#[derive(Debug, Clone, Default)]
pub struct HostMemoryBlock {
    bytes: Vec<u8>,
    limit_b: Option<u32>,
}

impl HostMemoryBlock {
    pub fn new(size_b: u32) -> Self {
        Self {
            bytes: vec![0; size_b as usize],
            limit_b: None,
        }
    }

    /// A block that refuses to grow past `limit_b` bytes.
    pub fn with_limit(size_b: u32, limit_b: u32) -> Self {
        Self {
            bytes: vec![0; size_b.min(limit_b) as usize],
            limit_b: Some(limit_b),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl MemoryBlock for HostMemoryBlock {
    fn resize(&mut self, size_b: u32) -> Result<(), ArenaError> {
        if let Some(limit_b) = self.limit_b {
            if size_b > limit_b {
                return Err(ArenaError::ResizeFailed {
                    requested_b: size_b as u64,
                    limit_b: limit_b as u64,
                });
            }
        }
        self.bytes.resize(size_b as usize, 0);
        Ok(())
    }

    fn write(&mut self, offset_b: u32, data: &[u8]) -> Result<(), ArenaError> {
        let range = checked_range(offset_b, data.len(), self.size())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset_b: u32, dst: &mut [u8]) -> Result<(), ArenaError> {
        let range = checked_range(offset_b, dst.len(), self.size())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }
}

/// The GPU-visible side of a mirrored buffer.
///
/// `upload_full` replaces the whole buffer (reallocating it to the new size);
/// `upload_range` patches bytes in place and never changes the size.
pub trait UploadTarget {
    /// Size of the buffer as last uploaded.
    fn size(&self) -> u32;

    fn upload_full(&mut self, data: &[u8]);

    fn upload_range(&mut self, offset_b: u32, data: &[u8]);

    /// Partial uploads must start and end on multiples of this.
    fn copy_alignment(&self) -> u32 {
        1
    }
}

/// One call made against a [`HostUploadTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCall {
    Full { size_b: u32 },
    Range { offset_b: u32, size_b: u32 },
}

/// Upload target that applies uploads to host memory and logs every call.
///
/// Used for headless runs and to observe how many transactions a flush costs.
#[derive(Debug, Clone, Default)]
pub struct HostUploadTarget {
    bytes: Vec<u8>,
    calls: Vec<UploadCall>,
    bytes_uploaded: u64,
}

impl HostUploadTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn calls(&self) -> &[UploadCall] {
        &self.calls
    }

    /// Drain the call log. Byte totals are kept.
    pub fn take_calls(&mut self) -> Vec<UploadCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }
}

impl UploadTarget for HostUploadTarget {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn upload_full(&mut self, data: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(data);
        self.bytes_uploaded += data.len() as u64;
        self.calls.push(UploadCall::Full {
            size_b: data.len() as u32,
        });
    }

    fn upload_range(&mut self, offset_b: u32, data: &[u8]) {
        let start = offset_b as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        self.bytes_uploaded += data.len() as u64;
        self.calls.push(UploadCall::Range {
            offset_b,
            size_b: data.len() as u32,
        });
    }
}
