//! Stream readers
//!
//! A live reader holds no lock between calls. Each step locks one segment
//! for the duration of the copy, so a concurrent writer on the same range may
//! be observed half way. A snapshot reader copies its whole range under one
//! lock set when it is opened and never touches the channel again.

use std::sync::Arc;

use sg_core::{Sample, SgResult};

use crate::channel::{Channel, copy_spans};
use crate::lock_set::LockSet;
use crate::segment::Segment;

#[derive(Debug)]
enum Source<'c> {
    Live(&'c Channel),
    Snapshot(Vec<Sample>),
}

/// Read cursor over `[left, right]` of one channel
#[derive(Debug)]
pub struct ChannelReader<'c> {
    source: Source<'c>,
    first: usize,
    last: usize,
    position: usize,
    end: bool,
}

impl<'c> ChannelReader<'c> {
    pub(crate) fn live(channel: &'c Channel, left: usize, right: usize) -> Self {
        Self {
            source: Source::Live(channel),
            first: left,
            last: right,
            position: left,
            end: right < left,
        }
    }

    pub(crate) fn snapshot(channel: &'c Channel, left: usize, right: usize) -> SgResult<Self> {
        let samples = if right < left {
            Vec::new()
        } else {
            let (spans, _) = channel.locate_clamped(left, right)?;
            let locks = LockSet::acquire(spans.iter().map(|s| Arc::clone(&s.segment)));
            // segments may have changed before the locks were granted
            if channel.still_located(&spans) {
                copy_spans(&spans, &locks)?
            } else {
                drop(locks);
                let available = channel.length().saturating_sub(left);
                let length = (right - left).saturating_add(1).min(available);
                channel.read_range(left, length)?
            }
        };

        Ok(Self {
            end: samples.is_empty(),
            source: Source::Snapshot(samples),
            first: left,
            last: right,
            position: left,
        })
    }

    #[inline]
    pub fn first(&self) -> usize {
        self.first
    }

    #[inline]
    pub fn last(&self) -> usize {
        self.last
    }

    /// Index of the next sample to be read
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// True once the range (or the channel) is exhausted
    #[inline]
    pub fn eof(&self) -> bool {
        self.end
    }

    /// Read up to `max_count` samples. The flag is true when nothing is left
    /// after this block.
    pub fn read(&mut self, max_count: usize) -> (Vec<Sample>, bool) {
        if self.end || max_count == 0 {
            return (Vec::new(), self.end);
        }

        let remaining = (self.last - self.position).saturating_add(1);
        let wanted = max_count.min(remaining);
        let block = match &self.source {
            Source::Live(channel) => Self::read_live(channel, self.position, wanted),
            Source::Snapshot(samples) => {
                let offset = self.position - self.first;
                let to = (offset + wanted).min(samples.len());
                samples[offset.min(to)..to].to_vec()
            }
        };

        self.position += block.len();
        let exhausted = match &self.source {
            Source::Live(channel) => self.position >= channel.length(),
            Source::Snapshot(samples) => self.position - self.first >= samples.len(),
        };
        self.end = block.len() < wanted || self.position > self.last || exhausted;
        (block, self.end)
    }

    /// Read everything that is left
    pub fn read_to_end(&mut self) -> Vec<Sample> {
        let mut out = Vec::new();
        while !self.end {
            let (block, _) = self.read(sg_core::DEFAULT_READER_BLOCK_SIZE);
            out.extend_from_slice(&block);
        }
        out
    }

    fn read_live(channel: &Channel, position: usize, wanted: usize) -> Vec<Sample> {
        let mut out = Vec::with_capacity(wanted);
        while out.len() < wanted {
            let pos = position + out.len();
            let Some((segment, offset)) = Self::segment_at(channel, pos) else {
                break;
            };

            // one segment lock at a time, only for the copy
            let locked = segment.lock();
            let available = locked.len().saturating_sub(offset);
            if available == 0 {
                // shrunk or merged away since it was located, look again
                continue;
            }
            let take = available.min(wanted - out.len());
            out.extend_from_slice(&locked.as_slice()[offset..offset + take]);
        }
        out
    }

    /// Segment holding sample `pos` and the offset within it
    fn segment_at(channel: &Channel, pos: usize) -> Option<(Arc<Segment>, usize)> {
        let (spans, _) = channel.locate_clamped(pos, pos).ok()?;
        spans.into_iter().next().map(|span| (span.segment, span.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::InsertMode;

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n as Sample).collect()
    }

    fn segmented(lengths: &[usize]) -> Channel {
        let channel = Channel::new();
        for &len in lengths {
            let mut writer = channel.open_writer(InsertMode::Append, 0, 0).unwrap();
            let start = channel.length() as Sample;
            let data: Vec<Sample> = (start..start + len as Sample).collect();
            writer.write(&data).unwrap();
            writer.close().unwrap();
        }
        channel
    }

    #[test]
    fn test_read_across_segments() {
        let channel = segmented(&[10, 10, 10]);
        let mut reader = channel.open_reader(5, 24);
        let (block, end) = reader.read(8);
        assert_eq!(block, (5..13).collect::<Vec<_>>());
        assert!(!end);
        let (block, end) = reader.read(100);
        assert_eq!(block, (13..25).collect::<Vec<_>>());
        assert!(end);
        assert!(reader.eof());
        assert_eq!(reader.read(10), (Vec::new(), true));
    }

    #[test]
    fn test_read_stops_at_channel_end() {
        let channel = segmented(&[10]);
        let mut reader = channel.open_reader(5, 100);
        assert_eq!(reader.read_to_end(), (5..10).collect::<Vec<_>>());
        assert!(reader.eof());
    }

    #[test]
    fn test_empty_ranges() {
        let channel = segmented(&[10]);
        assert!(channel.open_reader(5, 4).eof());
        let mut reader = channel.open_reader(10, 20);
        assert_eq!(reader.read(4), (Vec::new(), true));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let channel = segmented(&[10, 10]);
        let mut reader = channel.open_snapshot_reader(0, 19).unwrap();

        let mut writer = channel.open_writer(InsertMode::Overwrite, 0, 19).unwrap();
        writer.write(&[0; 20]).unwrap();
        writer.close().unwrap();

        assert_eq!(reader.read_to_end(), ramp(20));
        assert_eq!(channel.open_reader(0, 19).read_to_end(), vec![0; 20]);
    }

    #[test]
    fn test_reader_does_not_hold_locks() {
        let channel = segmented(&[10]);
        let mut reader = channel.open_reader(0, 9);
        reader.read(3);
        let mut writer = channel.open_writer(InsertMode::Overwrite, 0, 9).unwrap();
        writer.write(&[1; 10]).unwrap();
        writer.close().unwrap();
        let (rest, end) = reader.read(100);
        assert_eq!(rest, vec![1; 7]);
        assert!(end);
    }
}
