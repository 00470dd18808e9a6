//! SignalStore: the channels of one open file
//!
//! Channels are addressed by index. Adding or removing channels needs
//! `&mut self`, so it can never happen while a writer or reader borrows the
//! store.

use sg_core::{InsertMode, Sample, SgError, SgResult, StorageConfig};

use crate::channel::Channel;
use crate::reader::ChannelReader;
use crate::writer::ChannelWriter;

/// Multi-channel sample container
#[derive(Debug, Default)]
pub struct SignalStore {
    channels: Vec<Channel>,
    config: StorageConfig,
}

impl SignalStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            channels: Vec::new(),
            config,
        }
    }

    /// Store with `channels` zero filled channels of `length` samples
    pub fn with_channels(channels: usize, length: usize, config: StorageConfig) -> SgResult<Self> {
        let mut store = Self::new(config);
        for _ in 0..channels {
            store.add_channel(length)?;
        }
        Ok(store)
    }

    #[inline]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> SgResult<&Channel> {
        self.channels.get(index).ok_or(SgError::InvalidChannel(index))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Length of the longest channel
    pub fn length(&self) -> usize {
        self.channels.iter().map(|c| c.length()).max().unwrap_or(0)
    }

    /// Add a zero filled channel behind the last one, returns its index
    pub fn add_channel(&mut self, length: usize) -> SgResult<usize> {
        self.insert_channel(self.channels.len(), length)?;
        Ok(self.channels.len() - 1)
    }

    /// Insert a zero filled channel at `index`
    pub fn insert_channel(&mut self, index: usize, length: usize) -> SgResult<()> {
        if index > self.channels.len() {
            return Err(SgError::InvalidChannel(index));
        }
        let channel = self.empty_channel();
        channel.extend_zeros(length)?;
        self.channels.insert(index, channel);
        log::debug!("SignalStore::insert_channel({}, {})", index, length);
        Ok(())
    }

    /// Add a channel holding the given samples, returns its index
    pub fn add_channel_from(&mut self, samples: Vec<Sample>) -> usize {
        let channel = self.empty_channel();
        channel.extend_from(samples);
        self.channels.push(channel);
        self.channels.len() - 1
    }

    fn empty_channel(&self) -> Channel {
        Channel::new()
            .with_writer_block_size(self.config.writer_block_size)
            .with_max_segment_length(self.config.max_segment_length)
    }

    pub fn remove_channel(&mut self, index: usize) -> SgResult<Channel> {
        if index >= self.channels.len() {
            return Err(SgError::InvalidChannel(index));
        }
        log::debug!("SignalStore::remove_channel({})", index);
        Ok(self.channels.remove(index))
    }

    /// All channel indices, in order
    pub fn all_channels(&self) -> Vec<usize> {
        (0..self.channels.len()).collect()
    }

    /// Resolve a channel selection, each channel may appear once
    fn selected(&self, channels: &[usize]) -> SgResult<Vec<&Channel>> {
        for (n, index) in channels.iter().enumerate() {
            if channels[..n].contains(index) {
                return Err(SgError::InvalidChannel(*index));
            }
        }
        channels.iter().map(|&i| self.channel(i)).collect()
    }

    /// Open one writer per selected channel
    pub fn open_writer(
        &self,
        channels: &[usize],
        mode: InsertMode,
        left: usize,
        right: usize,
    ) -> SgResult<MultiChannelWriter<'_>> {
        let selected = self.selected(channels)?;

        let writers = match mode {
            // one lock set across all channels keeps the lock order global
            InsertMode::Overwrite => ChannelWriter::lock_overwrite(&selected, left, right)?
                .into_iter()
                .zip(selected)
                .map(|((spans, reaches_end, locks), channel)| {
                    ChannelWriter::overwrite(channel, left, right, spans, reaches_end, locks)
                })
                .collect(),
            // fresh segments are empty until written, nobody waits on them
            InsertMode::Append | InsertMode::Insert => selected
                .into_iter()
                .map(|channel| channel.open_writer(mode, left, right))
                .collect::<SgResult<Vec<_>>>()?,
        };

        Ok(MultiChannelWriter {
            indices: channels.to_vec(),
            writers,
        })
    }

    /// Open one live reader per selected channel
    pub fn open_reader(
        &self,
        channels: &[usize],
        left: usize,
        right: usize,
    ) -> SgResult<MultiChannelReader<'_>> {
        let readers = self
            .selected(channels)?
            .into_iter()
            .map(|channel| channel.open_reader(left, right))
            .collect();
        Ok(MultiChannelReader {
            indices: channels.to_vec(),
            readers,
        })
    }

    /// Remove `length` samples at `offset` from every selected channel
    pub fn delete(&self, channels: &[usize], offset: usize, length: usize) -> SgResult<()> {
        for channel in self.selected(channels)? {
            channel.delete(offset, length)?;
        }
        Ok(())
    }

    /// Copy a range of one channel
    pub fn read_range(&self, channel: usize, offset: usize, length: usize) -> SgResult<Vec<Sample>> {
        self.channel(channel)?.read_range(offset, length)
    }

    /// Merge small segments in every channel
    pub fn defragment(&self) -> SgResult<usize> {
        let mut merged = 0;
        for channel in &self.channels {
            merged += channel.defragment(self.config.max_segment_length)?;
        }
        Ok(merged)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MULTI-CHANNEL WRITER / READER
// ═══════════════════════════════════════════════════════════════════════════

/// Writers for a set of channels, opened and closed together
#[derive(Debug)]
pub struct MultiChannelWriter<'s> {
    indices: Vec<usize>,
    writers: Vec<ChannelWriter<'s>>,
}

impl<'s> MultiChannelWriter<'s> {
    /// Number of channels written
    #[inline]
    pub fn tracks(&self) -> usize {
        self.writers.len()
    }

    /// Channel indices in writer order
    #[inline]
    pub fn channel_indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn writer(&self, n: usize) -> Option<&ChannelWriter<'s>> {
        self.writers.get(n)
    }

    pub fn writer_mut(&mut self, n: usize) -> Option<&mut ChannelWriter<'s>> {
        self.writers.get_mut(n)
    }

    /// Write `samples` to the `n`-th writer
    pub fn write(&mut self, n: usize, samples: &[Sample]) -> SgResult<usize> {
        let index = self.indices.get(n).copied().unwrap_or(n);
        self.writers
            .get_mut(n)
            .ok_or(SgError::InvalidChannel(index))?
            .write(samples)
    }

    /// Write the same block to every channel
    pub fn write_all(&mut self, samples: &[Sample]) -> SgResult<usize> {
        for writer in &mut self.writers {
            writer.write(samples)?;
        }
        Ok(samples.len())
    }

    /// Close every writer, returns the samples written per channel.
    /// All writers are closed even if one of them fails.
    pub fn close(&mut self) -> SgResult<Vec<usize>> {
        let mut first_error = None;
        let mut counts = Vec::with_capacity(self.writers.len());
        for writer in &mut self.writers {
            match writer.close() {
                Ok(n) => counts.push(n),
                Err(e) => {
                    counts.push(writer.written());
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(counts),
        }
    }

    /// Samples written per channel so far
    pub fn written(&self) -> Vec<usize> {
        self.writers.iter().map(|w| w.written()).collect()
    }
}

/// Live readers for a set of channels
#[derive(Debug)]
pub struct MultiChannelReader<'s> {
    indices: Vec<usize>,
    readers: Vec<ChannelReader<'s>>,
}

impl<'s> MultiChannelReader<'s> {
    #[inline]
    pub fn tracks(&self) -> usize {
        self.readers.len()
    }

    #[inline]
    pub fn channel_indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn reader_mut(&mut self, n: usize) -> Option<&mut ChannelReader<'s>> {
        self.readers.get_mut(n)
    }

    /// Read up to `max_count` samples from every channel. The flag is true
    /// when all readers are exhausted.
    pub fn read(&mut self, max_count: usize) -> (Vec<Vec<Sample>>, bool) {
        let blocks: Vec<Vec<Sample>> = self.readers.iter_mut().map(|r| r.read(max_count).0).collect();
        (blocks, self.eof())
    }

    pub fn eof(&self) -> bool {
        self.readers.iter().all(|r| r.eof())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(channels: usize, length: usize) -> SignalStore {
        let mut store = SignalStore::new(StorageConfig::default());
        for c in 0..channels {
            let base = (c * 10_000) as Sample;
            store.add_channel_from((0..length as Sample).map(|s| base + s).collect());
        }
        store
    }

    #[test]
    fn test_channel_management() {
        let mut store = SignalStore::with_channels(2, 100, StorageConfig::default()).unwrap();
        assert_eq!(store.channel_count(), 2);
        assert_eq!(store.length(), 100);

        store.insert_channel(1, 50).unwrap();
        assert_eq!(store.channel(1).unwrap().length(), 50);
        assert!(store.insert_channel(9, 1).is_err());

        let removed = store.remove_channel(0).unwrap();
        assert_eq!(removed.length(), 100);
        assert_eq!(store.channel_count(), 2);
        assert!(matches!(store.channel(2), Err(SgError::InvalidChannel(2))));
    }

    #[test]
    fn test_multi_channel_overwrite() {
        let store = store(3, 100);
        let mut writer = store.open_writer(&[0, 2], InsertMode::Overwrite, 10, 19).unwrap();
        assert_eq!(writer.tracks(), 2);
        writer.write_all(&[0; 10]).unwrap();
        assert_eq!(writer.close().unwrap(), vec![10, 10]);

        assert_eq!(store.read_range(0, 10, 10).unwrap(), vec![0; 10]);
        assert_eq!(store.read_range(1, 10, 1).unwrap(), vec![10_010]);
        assert_eq!(store.read_range(2, 10, 10).unwrap(), vec![0; 10]);
    }

    #[test]
    fn test_multi_channel_insert_and_read() {
        let store = store(2, 10);
        let mut writer = store.open_writer(&[0, 1], InsertMode::Insert, 5, 6).unwrap();
        writer.write(0, &[-1, -1]).unwrap();
        writer.write(1, &[-2, -2]).unwrap();
        writer.close().unwrap();

        let mut reader = store.open_reader(&[0, 1], 4, 7).unwrap();
        let (blocks, end) = reader.read(100);
        assert!(end);
        assert_eq!(blocks[0], vec![4, -1, -1, 5]);
        assert_eq!(blocks[1], vec![10_004, -2, -2, 10_005]);
    }

    #[test]
    fn test_invalid_channel_selection() {
        let store = store(1, 10);
        assert!(store.open_writer(&[0, 1], InsertMode::Append, 0, 0).is_err());
        assert!(store.open_reader(&[3], 0, 1).is_err());
        assert!(store.delete(&[1], 0, 1).is_err());
        assert!(store.open_writer(&[0, 0], InsertMode::Overwrite, 0, 1).is_err());
    }

    #[test]
    fn test_delete_on_selected_channels() {
        let store = store(2, 10);
        store.delete(&[1], 2, 3).unwrap();
        assert_eq!(store.channel(0).unwrap().length(), 10);
        assert_eq!(store.channel(1).unwrap().length(), 7);
        assert_eq!(store.length(), 10);
    }
}
