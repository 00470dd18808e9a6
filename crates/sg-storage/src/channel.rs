//! Channel: one logical sample sequence backed by a list of segments
//!
//! The structural lock only guards the order of the segment list. Segment
//! contents are guarded by each segment's own lock.
//!
//! Lock order:
//! - segment locks are taken through a [`LockSet`] (ascending ids)
//! - the structural lock may be taken while segment locks are held
//! - nobody blocks on a segment lock while holding the structural lock
//!
//! Ranges are located first, then locked, then re-validated. If a located
//! segment changed in between, the lock set is dropped and the range is
//! located again.
//!
//! Segments created by a channel never hold more than `max_segment_length`
//! samples, which bounds the copy an insert split has to make.

use std::sync::Arc;

use parking_lot::RwLock;
use sg_core::{DEFAULT_MAX_SEGMENT_LENGTH, DEFAULT_WRITER_BLOCK_SIZE, InsertMode, Sample, SgError, SgResult};

use crate::lock_set::LockSet;
use crate::reader::ChannelReader;
use crate::segment::{LockedSegment, Segment, SegmentId};
use crate::writer::ChannelWriter;

/// Part of a located range that lies within one segment
#[derive(Debug, Clone)]
pub(crate) struct Span {
    pub(crate) segment: Arc<Segment>,
    /// Offset of the range within the segment
    pub(crate) offset: usize,
    /// Number of range samples within the segment
    pub(crate) length: usize,
    /// Segment length when it was located
    pub(crate) segment_len: usize,
}

/// Where an absolute sample index falls in the segment list
enum Position {
    /// Right before the segment at this list index (or at the very end)
    Boundary(usize),
    /// Inside the segment at this list index, at the given offset
    Inside(usize, usize),
}

/// One audio channel
#[derive(Debug)]
pub struct Channel {
    segments: RwLock<Vec<Arc<Segment>>>,
    writer_block_size: usize,
    max_segment_length: usize,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Create an empty channel without segments
    pub fn new() -> Self {
        Self {
            segments: RwLock::new(Vec::new()),
            writer_block_size: DEFAULT_WRITER_BLOCK_SIZE,
            max_segment_length: DEFAULT_MAX_SEGMENT_LENGTH,
        }
    }

    /// Create a zero filled channel
    pub fn with_length(length: usize) -> SgResult<Self> {
        let channel = Self::new();
        channel.extend_zeros(length)?;
        Ok(channel)
    }

    /// Create a channel holding the given samples
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let channel = Self::new();
        channel.extend_from(samples);
        channel
    }

    /// Block size used by writers for single-sample pushes
    pub fn with_writer_block_size(mut self, block_size: usize) -> Self {
        self.writer_block_size = block_size.max(1);
        self
    }

    /// Upper bound for the length of segments this channel creates.
    /// Only affects segments created afterwards.
    pub fn with_max_segment_length(mut self, length: usize) -> Self {
        self.max_segment_length = length.max(1);
        self
    }

    #[inline]
    pub fn writer_block_size(&self) -> usize {
        self.writer_block_size
    }

    #[inline]
    pub fn max_segment_length(&self) -> usize {
        self.max_segment_length
    }

    /// Add `length` zero samples at the end, in segments of bounded length
    pub fn extend_zeros(&self, length: usize) -> SgResult<()> {
        let mut remaining = length;
        let mut created = Vec::new();
        while remaining > 0 {
            let len = remaining.min(self.max_segment_length);
            created.push(Segment::new(len)?);
            remaining -= len;
        }
        self.segments.write().extend(created);
        Ok(())
    }

    /// Add samples at the end, in segments of bounded length
    pub fn extend_from(&self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        let created: Vec<Arc<Segment>> = if samples.len() <= self.max_segment_length {
            vec![Segment::from_samples(samples)]
        } else {
            samples
                .chunks(self.max_segment_length)
                .map(|chunk| Segment::from_samples(chunk.to_vec()))
                .collect()
        };
        self.segments.write().extend(created);
    }

    /// Number of samples in the channel
    pub fn length(&self) -> usize {
        self.segments.read().iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Segment lengths in list order
    pub fn segment_lengths(&self) -> Vec<usize> {
        self.segments.read().iter().map(|s| s.len()).collect()
    }

    /// Append a new zero filled segment to the list
    pub fn append_segment(&self, length: usize) -> SgResult<Arc<Segment>> {
        let segment = Segment::new(length)?;
        self.segments.write().push(Arc::clone(&segment));
        log::debug!("Channel::append_segment({}): {:?}", length, segment.id());
        Ok(segment)
    }

    /// Open a stream writer, see [`InsertMode`]
    pub fn open_writer(
        &self,
        mode: InsertMode,
        left: usize,
        right: usize,
    ) -> SgResult<ChannelWriter<'_>> {
        match mode {
            InsertMode::Append => Ok(ChannelWriter::append(self)),
            InsertMode::Insert => ChannelWriter::insert(self, left, right),
            InsertMode::Overwrite => {
                let mut opened = ChannelWriter::lock_overwrite(&[self], left, right)?;
                let (spans, reaches_end, locks) = opened.remove(0);
                Ok(ChannelWriter::overwrite(self, left, right, spans, reaches_end, locks))
            }
        }
    }

    /// Open a reader over `[left, right]` that takes no lock between reads
    pub fn open_reader(&self, left: usize, right: usize) -> ChannelReader<'_> {
        ChannelReader::live(self, left, right)
    }

    /// Open a reader that copies `[left, right]` under one lock set up front
    pub fn open_snapshot_reader(&self, left: usize, right: usize) -> SgResult<ChannelReader<'_>> {
        ChannelReader::snapshot(self, left, right)
    }

    /// Copy `length` samples starting at `offset`, consistent across segments
    pub fn read_range(&self, offset: usize, length: usize) -> SgResult<Vec<Sample>> {
        let (spans, locks) = self.lock_range(offset, length)?;
        copy_spans(&spans, &locks)
    }

    /// Remove `length` samples starting at `offset`
    pub fn delete(&self, offset: usize, length: usize) -> SgResult<()> {
        if length == 0 {
            return Ok(());
        }
        let (spans, mut locks) = self.lock_range(offset, length)?;

        let mut emptied = Vec::new();
        for span in &spans {
            let locked = locked_for(&mut locks, span.segment.id())?;
            locked.remove(span.offset, span.length)?;
            if locked.is_empty() {
                emptied.push(span.segment.id());
            }
        }

        // unlink emptied segments while their locks are still held
        if !emptied.is_empty() {
            self.segments
                .write()
                .retain(|s| !emptied.contains(&s.id()));
        }
        log::debug!(
            "Channel::delete({}, {}): {} segments touched, {} removed",
            offset,
            length,
            spans.len(),
            emptied.len()
        );
        Ok(())
    }

    /// Merge neighbouring segments up to `max_segment_length` samples.
    /// Returns the number of segments that were merged away.
    pub fn defragment(&self, max_segment_length: usize) -> SgResult<usize> {
        let candidates: Vec<Arc<Segment>> = self
            .segments
            .read()
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        let mut locks = LockSet::acquire(candidates);

        let mut segments = self.segments.write();
        let mut merged = Vec::new();
        // merged-away segments stay locked until they are unlinked
        let mut drained = Vec::new();
        let mut target: Option<SegmentId> = None;

        for segment in segments.iter() {
            let id = segment.id();
            // segments we did not lock (fresh or emptied ones) end a run
            if !locks.contains(id) || segment.is_empty() {
                target = None;
                continue;
            }

            let Some(target_id) = target else {
                target = Some(id);
                continue;
            };

            let target_len = segment_len(&locks, target_id);
            if target_len + segment.len() > max_segment_length {
                target = Some(id);
                continue;
            }

            // both locks live in the same set, move the source lock out
            let mut source = locks.extract(&[id]);
            let source_lock = locked_for(&mut source, id)?;
            let target_lock = locked_for(&mut locks, target_id)?;
            if let Err(e) = target_lock.absorb(source_lock) {
                log::warn!("Channel::defragment: {}", e);
                target = Some(id);
                continue;
            }
            merged.push(id);
            drained.push(source);
        }

        segments.retain(|s| !merged.contains(&s.id()));
        drop(segments);
        drop(drained);
        drop(locks);

        if !merged.is_empty() {
            log::debug!("Channel::defragment: merged {} segments", merged.len());
        }
        Ok(merged.len())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RANGE LOCATION (crate internal)
    // ═══════════════════════════════════════════════════════════════════════

    /// Locate and lock exactly the segments holding `[offset, offset + length)`
    pub(crate) fn lock_range(&self, offset: usize, length: usize) -> SgResult<(Vec<Span>, LockSet)> {
        loop {
            let spans = self.locate(offset, length)?;
            let locks = LockSet::acquire(spans.iter().map(|s| Arc::clone(&s.segment)));
            if self.still_located(&spans) {
                return Ok((spans, locks));
            }
            log::debug!("Channel::lock_range({}, {}): segments moved, retrying", offset, length);
        }
    }

    /// Spans covering `[offset, offset + length)`, all of it must exist
    pub(crate) fn locate(&self, offset: usize, length: usize) -> SgResult<Vec<Span>> {
        let segments = self.segments.read();
        let total: usize = segments.iter().map(|s| s.len()).sum();
        match offset.checked_add(length) {
            Some(end) if end <= total => Ok(Self::spans_in(&segments, offset, length)),
            _ => Err(SgError::OutOfRange {
                offset,
                length,
                available: total,
            }),
        }
    }

    /// Spans covering `[left, right]` clipped to the channel end. The flag
    /// tells whether the range reaches (or lies beyond) the last sample.
    pub(crate) fn locate_clamped(&self, left: usize, right: usize) -> SgResult<(Vec<Span>, bool)> {
        let segments = self.segments.read();
        let total: usize = segments.iter().map(|s| s.len()).sum();
        if left > total {
            return Err(SgError::OutOfRange {
                offset: left,
                length: right.saturating_sub(left).saturating_add(1),
                available: total,
            });
        }
        let end = right.saturating_add(1).min(total);
        let spans = Self::spans_in(&segments, left, end.saturating_sub(left));
        Ok((spans, right.saturating_add(1) >= total))
    }

    fn spans_in(segments: &[Arc<Segment>], offset: usize, length: usize) -> Vec<Span> {
        if length == 0 {
            return Vec::new();
        }
        let end = offset + length;
        let mut spans = Vec::new();
        let mut start = 0;
        for segment in segments {
            if start >= end {
                break;
            }
            let len = segment.len();
            let seg_end = start + len;
            if len > 0 && seg_end > offset {
                let from = offset.max(start);
                let to = end.min(seg_end);
                spans.push(Span {
                    segment: Arc::clone(segment),
                    offset: from - start,
                    length: to - from,
                    segment_len: len,
                });
            }
            start = seg_end;
        }
        spans
    }

    /// Whether the located segments are still linked in the same order with
    /// the same lengths. Only meaningful while their locks are held.
    pub(crate) fn still_located(&self, spans: &[Span]) -> bool {
        let Some(first) = spans.first() else {
            return true;
        };
        let segments = self.segments.read();
        let Some(start) = segments.iter().position(|s| Arc::ptr_eq(s, &first.segment)) else {
            return false;
        };

        let mut linked = segments[start..].iter().filter(|s| !s.is_empty());
        spans.iter().all(|span| match linked.next() {
            Some(s) => Arc::ptr_eq(s, &span.segment) && s.len() == span.segment_len,
            None => false,
        })
    }

    fn find(segments: &[Arc<Segment>], pos: usize) -> SgResult<Position> {
        let mut start = 0;
        for (index, segment) in segments.iter().enumerate() {
            let len = segment.len();
            if len == 0 {
                continue;
            }
            if pos == start {
                return Ok(Position::Boundary(index));
            }
            if pos < start + len {
                return Ok(Position::Inside(index, pos - start));
            }
            start += len;
        }
        if pos == start {
            Ok(Position::Boundary(segments.len()))
        } else {
            Err(SgError::OutOfRange {
                offset: pos,
                length: 0,
                available: start,
            })
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STRUCTURAL SURGERY FOR WRITERS (crate internal)
    // ═══════════════════════════════════════════════════════════════════════

    /// Link a fresh, already locked segment behind the last one
    pub(crate) fn push_fresh_segment(&self) -> LockedSegment {
        let fresh = Segment::new_locked();
        self.segments.write().push(Arc::clone(fresh.segment()));
        fresh
    }

    /// Link a fresh, already locked segment so that its first sample lands at
    /// `pos`, splitting the segment that currently holds `pos` if needed.
    /// Up to `reserve` samples are reserved in the fresh segment beforehand.
    pub(crate) fn insert_fresh_segment(&self, pos: usize, reserve: usize) -> SgResult<LockedSegment> {
        let mut fresh = Segment::new_locked();
        if let Err(e) = fresh.reserve(reserve.min(self.max_segment_length)) {
            // only a hint, the writer grows the segment on demand
            log::warn!("Channel::insert_fresh_segment({}): {}", pos, e);
        }

        loop {
            let target = {
                let mut segments = self.segments.write();
                match Self::find(&segments, pos)? {
                    Position::Boundary(index) => {
                        segments.insert(index, Arc::clone(fresh.segment()));
                        return Ok(fresh);
                    }
                    Position::Inside(index, _) => Arc::clone(&segments[index]),
                }
            };

            // structural lock is released before waiting for the segment.
            // Waiting while holding the fresh (highest id) lock is only fine
            // because the fresh segment is not linked yet.
            let mut locked = target.lock();
            let mut segments = self.segments.write();
            match Self::find(&segments, pos)? {
                Position::Boundary(index) => {
                    segments.insert(index, Arc::clone(fresh.segment()));
                    return Ok(fresh);
                }
                Position::Inside(index, inner) if Arc::ptr_eq(&segments[index], &target) => {
                    let tail = locked.split_off(inner)?;
                    let tail = Segment::from_samples(tail);
                    log::debug!(
                        "Channel::insert_fresh_segment({}): split {:?} at {}, tail {:?}",
                        pos,
                        target.id(),
                        inner,
                        tail.id()
                    );
                    segments.insert(index + 1, Arc::clone(fresh.segment()));
                    segments.insert(index + 2, tail);
                    return Ok(fresh);
                }
                Position::Inside(..) => {
                    log::debug!("Channel::insert_fresh_segment({}): segments moved, retrying", pos);
                }
            }
        }
    }

    /// Link a fresh, already locked segment right behind `after`, which the
    /// caller holds locked. `reserve` samples are allocated up front.
    pub(crate) fn link_fresh_after(&self, after: SegmentId, reserve: usize) -> SgResult<LockedSegment> {
        let mut fresh = Segment::new_locked();
        fresh.reserve(reserve)?;
        let mut segments = self.segments.write();
        let index = segments
            .iter()
            .position(|s| s.id() == after)
            .ok_or_else(|| SgError::Transaction(format!("segment {:?} is not linked", after)))?;
        segments.insert(index + 1, Arc::clone(fresh.segment()));
        Ok(fresh)
    }

    /// Unlink a segment, the caller holds its lock
    pub(crate) fn unlink_segment(&self, id: SegmentId) {
        self.segments.write().retain(|s| s.id() != id);
    }
}

/// Length of a locked segment from the set
fn segment_len(locks: &LockSet, id: SegmentId) -> usize {
    locks.get(id).map(|l| l.len()).unwrap_or(0)
}

pub(crate) fn locked_for(locks: &mut LockSet, id: SegmentId) -> SgResult<&mut LockedSegment> {
    locks
        .get_mut(id)
        .ok_or_else(|| SgError::Transaction(format!("segment {:?} is not locked", id)))
}

/// Copy the samples of locked spans into one buffer
pub(crate) fn copy_spans(spans: &[Span], locks: &LockSet) -> SgResult<Vec<Sample>> {
    let total: usize = spans.iter().map(|s| s.length).sum();
    let mut out = Vec::new();
    out.try_reserve_exact(total)
        .map_err(|_| SgError::OutOfMemory { requested: total })?;
    for span in spans {
        let locked = locks
            .get(span.segment.id())
            .ok_or_else(|| SgError::Transaction(format!("segment {:?} is not locked", span.segment.id())))?;
        out.extend_from_slice(locked.read(span.offset, span.length)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n as Sample).collect()
    }

    /// Channel made of several segments holding 0..sum(lengths)
    fn segmented(lengths: &[usize]) -> Channel {
        let channel = Channel::new();
        let mut next = 0;
        for &len in lengths {
            let segment = channel.append_segment(0).unwrap();
            let data: Vec<Sample> = (next..next + len as Sample).collect();
            segment.lock().append(&data).unwrap();
            next += len as Sample;
        }
        channel
    }

    #[test]
    fn test_new_channel_is_empty() {
        let channel = Channel::new();
        assert!(channel.is_empty());
        assert_eq!(channel.segment_count(), 0);

        let channel = Channel::with_length(100).unwrap();
        assert_eq!(channel.length(), 100);
        assert_eq!(channel.segment_count(), 1);
    }

    #[test]
    fn test_initial_segments_are_bounded() {
        let channel = Channel::new().with_max_segment_length(64);
        channel.extend_zeros(200).unwrap();
        assert_eq!(channel.segment_lengths(), vec![64, 64, 64, 8]);

        let channel = Channel::new().with_max_segment_length(64);
        channel.extend_from(ramp(130));
        assert_eq!(channel.segment_lengths(), vec![64, 64, 2]);
        assert_eq!(channel.read_range(0, 130).unwrap(), ramp(130));
    }

    #[test]
    fn test_insert_split_is_bounded() {
        // however long the channel, a split only moves part of one segment
        for length in [1_000, 100_000] {
            let channel = Channel::new().with_max_segment_length(256);
            channel.extend_from(ramp(length));
            let before = channel.segment_count();

            let fresh = channel.insert_fresh_segment(length / 2 + 1, 0).unwrap();
            drop(fresh);
            assert_eq!(channel.segment_count(), before + 2);
            assert!(channel.segment_lengths().iter().all(|&l| l <= 256));
            assert_eq!(channel.read_range(0, length).unwrap(), ramp(length));
        }
    }

    #[test]
    fn test_link_fresh_after() {
        let channel = segmented(&[3, 3]);
        let first = channel.locate(0, 1).unwrap().remove(0).segment;
        let fresh = channel.link_fresh_after(first.id(), 4).unwrap();
        assert_eq!(channel.segment_lengths(), vec![3, 0, 3]);
        drop(fresh);
        assert!(channel.link_fresh_after(SegmentId(0), 0).is_err());
    }

    #[test]
    fn test_length_is_sum_of_segments() {
        let channel = segmented(&[10, 0, 25, 5]);
        assert_eq!(channel.length(), 40);
        assert_eq!(channel.segment_lengths(), vec![10, 0, 25, 5]);
    }

    #[test]
    fn test_read_range_across_segments() {
        let channel = segmented(&[10, 10, 10]);
        assert_eq!(channel.read_range(8, 4).unwrap(), vec![8, 9, 10, 11]);
        assert_eq!(channel.read_range(0, 30).unwrap(), ramp(30));
        assert!(channel.read_range(25, 10).is_err());
    }

    #[test]
    fn test_locate_skips_empty_segments() {
        let channel = segmented(&[5, 0, 5]);
        let spans = channel.locate(3, 4).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].offset, spans[0].length), (3, 2));
        assert_eq!((spans[1].offset, spans[1].length), (0, 2));
    }

    #[test]
    fn test_locate_clamped_reaches_end() {
        let channel = segmented(&[5, 5]);
        let (spans, reaches_end) = channel.locate_clamped(8, 20).unwrap();
        assert!(reaches_end);
        assert_eq!(spans.iter().map(|s| s.length).sum::<usize>(), 2);

        let (spans, reaches_end) = channel.locate_clamped(10, 12).unwrap();
        assert!(reaches_end);
        assert!(spans.is_empty());

        let (_, reaches_end) = channel.locate_clamped(0, 3).unwrap();
        assert!(!reaches_end);

        assert!(channel.locate_clamped(11, 12).is_err());
    }

    #[test]
    fn test_delete_within_and_across_segments() {
        let channel = segmented(&[10, 10, 10]);
        channel.delete(12, 3).unwrap();
        assert_eq!(channel.length(), 27);
        assert_eq!(channel.segment_count(), 3);

        // spans the end of the first, all of the second, part of the third
        channel.delete(5, 20).unwrap();
        assert_eq!(channel.length(), 7);
        assert_eq!(channel.read_range(0, 7).unwrap(), vec![0, 1, 2, 3, 4, 28, 29]);
        assert_eq!(channel.segment_count(), 2);
    }

    #[test]
    fn test_delete_out_of_range() {
        let channel = segmented(&[10]);
        assert!(matches!(
            channel.delete(5, 10),
            Err(SgError::OutOfRange { .. })
        ));
        assert_eq!(channel.length(), 10);
        channel.delete(10, 0).unwrap();
    }

    #[test]
    fn test_insert_fresh_segment_splits() {
        let channel = segmented(&[10]);
        let fresh = channel.insert_fresh_segment(4, 0).unwrap();
        assert_eq!(channel.segment_lengths(), vec![4, 0, 6]);
        drop(fresh);

        // on a boundary nothing is split
        let fresh = channel.insert_fresh_segment(4, 0).unwrap();
        assert_eq!(channel.segment_count(), 4);
        drop(fresh);
        assert_eq!(channel.read_range(0, 10).unwrap(), ramp(10));

        assert!(channel.insert_fresh_segment(11, 0).is_err());
    }

    #[test]
    fn test_still_located_detects_changes() {
        let channel = segmented(&[10, 10]);
        let spans = channel.locate(5, 10).unwrap();
        assert!(channel.still_located(&spans));

        let fresh = channel.insert_fresh_segment(15, 0).unwrap();
        drop(fresh);
        assert!(!channel.still_located(&spans));
    }

    #[test]
    fn test_defragment_merges_neighbours() {
        let channel = segmented(&[3, 3, 3, 3, 3]);
        let merged = channel.defragment(7).unwrap();
        assert_eq!(merged, 2);
        assert_eq!(channel.segment_lengths(), vec![6, 6, 3]);
        assert_eq!(channel.read_range(0, 15).unwrap(), ramp(15));
    }

    #[test]
    fn test_defragment_stops_at_empty_segments() {
        let channel = segmented(&[3, 0, 3]);
        assert_eq!(channel.defragment(100).unwrap(), 0);
        assert_eq!(channel.segment_lengths(), vec![3, 0, 3]);
    }
}
