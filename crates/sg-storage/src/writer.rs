//! Stream writers: Append, Insert and Overwrite
//!
//! A writer is bound to one channel and owns the [`LockSet`] over every
//! segment it may touch. Locks are released when the writer is closed or
//! dropped. Writers are meant to be used from one thread only.

use std::sync::Arc;

use sg_core::{InsertMode, Sample, SgError, SgResult};

use crate::channel::{Channel, Span, locked_for};
use crate::lock_set::LockSet;
use crate::segment::SegmentId;

/// Where accepted samples go
#[derive(Debug)]
enum Target {
    /// Append and Insert: samples go to the newest fresh segment. Once it is
    /// full another fresh segment is linked right behind it.
    Fresh(SegmentId),
    /// Overwrite: samples replace the located spans in order. If the range
    /// reaches the channel end, samples beyond it grow the `tail` segment.
    Spans {
        spans: Vec<Span>,
        tail: Option<SegmentId>,
        fresh_tail: bool,
    },
}

/// Input stream for transferring samples into one channel
#[derive(Debug)]
pub struct ChannelWriter<'c> {
    channel: &'c Channel,
    mode: InsertMode,
    first: usize,
    last: usize,
    written: usize,
    target: Target,
    locks: LockSet,
    /// Samples collected by `push` that were not flushed yet
    pending: Vec<Sample>,
    block_size: usize,
    closed: bool,
}

impl<'c> ChannelWriter<'c> {
    pub(crate) fn append(channel: &'c Channel) -> Self {
        let first = channel.length();
        let fresh = channel.push_fresh_segment();
        log::debug!("ChannelWriter::append(): at {}, {:?}", first, fresh.id());

        let id = fresh.id();
        let mut locks = LockSet::new();
        locks.adopt(fresh);
        Self::new(channel, InsertMode::Append, first, usize::MAX, Target::Fresh(id), locks)
    }

    pub(crate) fn insert(channel: &'c Channel, left: usize, right: usize) -> SgResult<Self> {
        let reserve = if right >= left {
            right.saturating_sub(left).saturating_add(1)
        } else {
            0
        };
        let fresh = channel.insert_fresh_segment(left, reserve)?;
        log::debug!("ChannelWriter::insert({}, {}): {:?}", left, right, fresh.id());

        let id = fresh.id();
        let mut locks = LockSet::new();
        locks.adopt(fresh);
        Ok(Self::new(channel, InsertMode::Insert, left, right, Target::Fresh(id), locks))
    }

    /// Locate and lock `[left, right]` in all channels with one lock set,
    /// then hand each channel its own share of the locks.
    pub(crate) fn lock_overwrite(
        channels: &[&Channel],
        left: usize,
        right: usize,
    ) -> SgResult<Vec<(Vec<Span>, bool, LockSet)>> {
        if right < left {
            return Err(SgError::InvalidRange { left, right });
        }

        loop {
            let located = channels
                .iter()
                .map(|c| c.locate_clamped(left, right))
                .collect::<SgResult<Vec<_>>>()?;

            let mut all = LockSet::acquire(
                located
                    .iter()
                    .flat_map(|(spans, _)| spans.iter().map(|s| Arc::clone(&s.segment))),
            );

            let unchanged = channels
                .iter()
                .zip(&located)
                .all(|(channel, (spans, _))| channel.still_located(spans));
            if unchanged {
                return Ok(located
                    .into_iter()
                    .map(|(spans, reaches_end)| {
                        let ids: Vec<SegmentId> = spans.iter().map(|s| s.segment.id()).collect();
                        let locks = all.extract(&ids);
                        (spans, reaches_end, locks)
                    })
                    .collect());
            }
            log::debug!("ChannelWriter::lock_overwrite({}, {}): segments moved, retrying", left, right);
        }
    }

    pub(crate) fn overwrite(
        channel: &'c Channel,
        left: usize,
        right: usize,
        spans: Vec<Span>,
        reaches_end: bool,
        mut locks: LockSet,
    ) -> Self {
        let mut fresh_tail = false;
        let tail = if !reaches_end {
            None
        } else if let Some(last) = spans.last() {
            Some(last.segment.id())
        } else {
            // nothing to overwrite, the range starts right at the end
            let fresh = channel.push_fresh_segment();
            let id = fresh.id();
            locks.adopt(fresh);
            fresh_tail = true;
            Some(id)
        };
        log::debug!(
            "ChannelWriter::overwrite({}, {}): {} segments locked",
            left,
            right,
            locks.len()
        );

        let target = Target::Spans {
            spans,
            tail,
            fresh_tail,
        };
        Self::new(channel, InsertMode::Overwrite, left, right, target, locks)
    }

    fn new(
        channel: &'c Channel,
        mode: InsertMode,
        first: usize,
        last: usize,
        target: Target,
        locks: LockSet,
    ) -> Self {
        Self {
            channel,
            mode,
            first,
            last,
            written: 0,
            target,
            locks,
            pending: Vec::new(),
            block_size: channel.writer_block_size(),
            closed: false,
        }
    }

    #[inline]
    pub fn mode(&self) -> InsertMode {
        self.mode
    }

    /// First sample index of the written range
    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Declared right bound (unbounded for Append)
    #[inline]
    pub fn last(&self) -> usize {
        self.last
    }

    /// Index the next written sample lands on
    #[inline]
    pub fn position(&self) -> usize {
        self.first + self.written + self.pending.len()
    }

    /// Samples that made it into the channel so far
    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write a block. Either the whole block is consumed or nothing of it.
    pub fn write(&mut self, samples: &[Sample]) -> SgResult<usize> {
        if self.closed {
            return Err(SgError::WriterClosed);
        }
        self.flush_pending()?;
        self.write_block(samples)?;
        Ok(samples.len())
    }

    /// Write a single sample through the internal block buffer. In Overwrite
    /// mode a sample beyond the right bound is rejected right away.
    pub fn push(&mut self, sample: Sample) -> SgResult<()> {
        if self.closed {
            return Err(SgError::WriterClosed);
        }
        if matches!(self.target, Target::Spans { .. }) && self.position() > self.last {
            return Err(SgError::RangeExceeded {
                position: self.position(),
                count: 1,
                right: self.last,
            });
        }
        self.pending.push(sample);
        if self.pending.len() >= self.block_size {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Write out samples collected by `push`
    pub fn flush(&mut self) -> SgResult<()> {
        if self.closed {
            return Err(SgError::WriterClosed);
        }
        self.flush_pending()
    }

    /// Flush, drop an unused fresh segment and release all locks.
    /// Returns the number of samples written. Closing twice is harmless.
    pub fn close(&mut self) -> SgResult<usize> {
        self.finish()?;
        Ok(self.written)
    }

    fn flush_pending(&mut self) -> SgResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // a rejected block is dropped, not retried by the next call
        let mut pending = std::mem::take(&mut self.pending);
        let result = self.write_block(&pending);
        pending.clear();
        self.pending = pending;
        result
    }

    fn write_block(&mut self, samples: &[Sample]) -> SgResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        match &self.target {
            Target::Fresh(id) => {
                let id = *id;
                let last = self.append_fresh(id, samples)?;
                self.target = Target::Fresh(last);
            }
            Target::Spans { spans, tail, .. } => {
                let capacity = (self.last - self.first).saturating_add(1);
                if self.written + samples.len() > capacity {
                    return Err(SgError::RangeExceeded {
                        position: self.first + self.written,
                        count: samples.len(),
                        right: self.last,
                    });
                }

                let span_total: usize = spans.iter().map(|s| s.length).sum();
                let inside = samples.len().min(span_total.saturating_sub(self.written));
                let (head, beyond) = samples.split_at(inside);

                // make room behind the channel end first, so a failing
                // allocation leaves this call without effect
                if !beyond.is_empty() {
                    let Some(tail) = tail else {
                        return Err(SgError::RangeExceeded {
                            position: self.first + self.written,
                            count: samples.len(),
                            right: self.first + span_total - 1,
                        });
                    };
                    locked_for(&mut self.locks, *tail)?.reserve(beyond.len())?;
                }

                let mut skip = self.written;
                let mut rest = head;
                for span in spans {
                    if rest.is_empty() {
                        break;
                    }
                    if skip >= span.length {
                        skip -= span.length;
                        continue;
                    }
                    let take = (span.length - skip).min(rest.len());
                    let locked = locked_for(&mut self.locks, span.segment.id())?;
                    locked.write(span.offset + skip, &rest[..take])?;
                    rest = &rest[take..];
                    skip = 0;
                }

                if let Some(tail) = tail.filter(|_| !beyond.is_empty()) {
                    locked_for(&mut self.locks, tail)?.append(beyond)?;
                }
            }
        }

        self.written += samples.len();
        Ok(())
    }

    /// Append to the fresh segment `id`, continuing in new fresh segments
    /// when it reaches the maximum length. Everything is allocated before the
    /// first sample is copied. Returns the segment that received the end.
    fn append_fresh(&mut self, id: SegmentId, samples: &[Sample]) -> SgResult<SegmentId> {
        let max = self.channel.max_segment_length();
        let current = locked_for(&mut self.locks, id)?;
        let room = max.saturating_sub(current.len()).min(samples.len());
        current.reserve(room)?;
        let (head, rest) = samples.split_at(room);

        let mut added = Vec::new();
        let mut last = id;
        for chunk in rest.chunks(max) {
            match self.channel.link_fresh_after(last, chunk.len()) {
                Ok(fresh) => {
                    last = fresh.id();
                    added.push(fresh);
                }
                Err(e) => {
                    for fresh in added {
                        self.channel.unlink_segment(fresh.id());
                    }
                    return Err(e);
                }
            }
        }

        locked_for(&mut self.locks, id)?.append(head)?;
        for (mut fresh, chunk) in added.into_iter().zip(rest.chunks(max)) {
            fresh.append(chunk)?;
            self.locks.adopt(fresh);
        }
        Ok(last)
    }

    fn fresh_segment(&self) -> Option<SegmentId> {
        match &self.target {
            Target::Fresh(id) => Some(*id),
            Target::Spans {
                tail,
                fresh_tail: true,
                ..
            } => *tail,
            Target::Spans { .. } => None,
        }
    }

    fn finish(&mut self) -> SgResult<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush_pending();
        self.closed = true;
        self.pending = Vec::new();

        if let Some(id) = self.fresh_segment() {
            if self.locks.get(id).is_some_and(|l| l.is_empty()) {
                self.channel.unlink_segment(id);
            }
        }
        std::mem::take(&mut self.locks).release();

        log::debug!(
            "ChannelWriter::close({}): {} samples at {}",
            self.mode,
            self.written,
            self.first
        );
        flushed
    }
}

impl Drop for ChannelWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("ChannelWriter dropped with error: {}", e);
        }
    }
}
