//! Segments: contiguous runs of samples, the unit of allocation and locking
//!
//! A segment's samples are only reachable through a [`LockedSegment`], so any
//! access to the buffer implies that the caller holds the segment's lock.
//! The length is mirrored into an atomic whenever it changes, which lets a
//! channel compute sample positions without waiting for segment locks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use sg_core::{Sample, SgError, SgResult};

/// Unique segment identifier, also the global lock order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

// Global ID counter, ids are never reused within a process
static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> SegmentId {
    SegmentId(NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed))
}

// ═══════════════════════════════════════════════════════════════════════════
// BUFFER
// ═══════════════════════════════════════════════════════════════════════════

/// Sample storage of one segment
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    samples: Vec<Sample>,
}

impl SegmentBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    fn reserve(&mut self, additional: usize) -> SgResult<()> {
        self.samples
            .try_reserve(additional)
            .map_err(|_| SgError::OutOfMemory {
                requested: additional,
            })
    }

    /// Grow (zero filled) or shrink. Shrinking simply truncates.
    pub fn resize(&mut self, new_length: usize) -> SgResult<()> {
        if new_length > self.samples.len() {
            self.reserve(new_length - self.samples.len())?;
        }
        self.samples.resize(new_length, 0);
        Ok(())
    }

    /// Append a block. On allocation failure the buffer is left untouched.
    pub fn append(&mut self, samples: &[Sample]) -> SgResult<()> {
        self.reserve(samples.len())?;
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    /// Bounds checked read access
    pub fn read(&self, offset: usize, length: usize) -> SgResult<&[Sample]> {
        let end = offset.checked_add(length).filter(|&end| end <= self.samples.len());
        match end {
            Some(end) => Ok(&self.samples[offset..end]),
            None => Err(SgError::OutOfRange {
                offset,
                length,
                available: self.samples.len(),
            }),
        }
    }

    /// Overwrite starting at `offset`; the part beyond the end grows the buffer.
    pub fn write(&mut self, offset: usize, samples: &[Sample]) -> SgResult<()> {
        let len = self.samples.len();
        if offset > len {
            return Err(SgError::OutOfRange {
                offset,
                length: samples.len(),
                available: len,
            });
        }

        let inside = samples.len().min(len - offset);
        let (head, tail) = samples.split_at(inside);
        self.reserve(tail.len())?;
        self.samples[offset..offset + inside].copy_from_slice(head);
        self.samples.extend_from_slice(tail);
        Ok(())
    }

    /// Move everything from `offset` on into a new buffer
    pub fn split_off(&mut self, offset: usize) -> SgResult<Vec<Sample>> {
        let len = self.samples.len();
        if offset > len {
            return Err(SgError::OutOfRange {
                offset,
                length: 0,
                available: len,
            });
        }

        let mut tail = Vec::new();
        tail.try_reserve_exact(len - offset)
            .map_err(|_| SgError::OutOfMemory {
                requested: len - offset,
            })?;
        tail.extend_from_slice(&self.samples[offset..]);
        self.samples.truncate(offset);
        Ok(tail)
    }

    /// Remove `length` samples at `offset`, closing the gap
    pub fn remove(&mut self, offset: usize, length: usize) -> SgResult<()> {
        self.read(offset, length)?;
        self.samples.drain(offset..offset + length);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEGMENT
// ═══════════════════════════════════════════════════════════════════════════

/// A contiguous, individually lockable run of samples within one channel
pub struct Segment {
    id: SegmentId,
    /// Mirror of the buffer length, written only while the lock is held
    len: AtomicUsize,
    buffer: Arc<Mutex<SegmentBuffer>>,
}

impl Segment {
    /// Create a zero filled segment
    pub(crate) fn new(length: usize) -> SgResult<Arc<Self>> {
        let mut buffer = SegmentBuffer::default();
        buffer.resize(length)?;
        Ok(Self::from_buffer(buffer))
    }

    pub(crate) fn from_samples(samples: Vec<Sample>) -> Arc<Self> {
        Self::from_buffer(SegmentBuffer { samples })
    }

    fn from_buffer(buffer: SegmentBuffer) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            len: AtomicUsize::new(buffer.len()),
            buffer: Arc::new(Mutex::new(buffer)),
        })
    }

    /// Create an empty segment that is locked before anybody else can see it
    pub(crate) fn new_locked() -> LockedSegment {
        let segment = Self::from_buffer(SegmentBuffer::default());
        segment.lock()
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Length as of the last change made under the lock
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the segment's lock is available
    pub fn lock(self: &Arc<Self>) -> LockedSegment {
        let guard = self.buffer.lock_arc();
        LockedSegment {
            segment: Arc::clone(self),
            guard,
        }
    }

    #[cfg(test)]
    pub(crate) fn try_lock(self: &Arc<Self>) -> Option<LockedSegment> {
        self.buffer.try_lock_arc().map(|guard| LockedSegment {
            segment: Arc::clone(self),
            guard,
        })
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCKED SEGMENT
// ═══════════════════════════════════════════════════════════════════════════

/// A segment together with its held lock. Dropping it releases the lock.
pub struct LockedSegment {
    segment: Arc<Segment>,
    guard: ArcMutexGuard<RawMutex, SegmentBuffer>,
}

impl LockedSegment {
    #[inline]
    pub fn id(&self) -> SegmentId {
        self.segment.id
    }

    #[inline]
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        self.guard.as_slice()
    }

    pub fn read(&self, offset: usize, length: usize) -> SgResult<&[Sample]> {
        self.guard.read(offset, length)
    }

    pub fn reserve(&mut self, additional: usize) -> SgResult<()> {
        self.guard.reserve(additional)
    }

    pub fn resize(&mut self, new_length: usize) -> SgResult<()> {
        let result = self.guard.resize(new_length);
        self.sync_len();
        result
    }

    pub fn append(&mut self, samples: &[Sample]) -> SgResult<()> {
        let result = self.guard.append(samples);
        self.sync_len();
        result
    }

    pub fn write(&mut self, offset: usize, samples: &[Sample]) -> SgResult<()> {
        let result = self.guard.write(offset, samples);
        self.sync_len();
        result
    }

    pub fn split_off(&mut self, offset: usize) -> SgResult<Vec<Sample>> {
        let result = self.guard.split_off(offset);
        self.sync_len();
        result
    }

    pub fn remove(&mut self, offset: usize, length: usize) -> SgResult<()> {
        let result = self.guard.remove(offset, length);
        self.sync_len();
        result
    }

    /// Move all samples of `other` to the end of this segment
    pub(crate) fn absorb(&mut self, other: &mut LockedSegment) -> SgResult<()> {
        self.guard.append(other.guard.as_slice())?;
        other.guard.samples.clear();
        self.sync_len();
        other.sync_len();
        Ok(())
    }

    #[inline]
    fn sync_len(&self) {
        self.segment.len.store(self.guard.len(), Ordering::Release);
    }
}

impl fmt::Debug for LockedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedSegment")
            .field("id", &self.segment.id)
            .field("len", &self.guard.len())
            .finish()
    }
}
