//! SignalEditor: undoable edits on a SignalStore
//!
//! Every edit runs in its own transaction (nested into one the caller may
//! have opened). Undo data is registered before a writer touches the signal,
//! insert lengths are corrected from what the writers report on close.

use sg_core::{InsertMode, Sample, SgError, SgResult};
use sg_storage::{MultiChannelWriter, SignalStore};

use crate::action::{UndoAction, UndoDeleteAction, UndoInsertAction, UndoModifyAction, last_index};
use crate::undo::{ActionId, UndoManager, UndoTransactionGuard};

/// Samples per block when writing silence
pub const ZERO_BLOCK: usize = 64 * 1024;

/// Command layer binding a signal to its undo history
#[derive(Debug)]
pub struct SignalEditor<'a> {
    signal: &'a SignalStore,
    manager: &'a mut UndoManager,
}

impl<'a> SignalEditor<'a> {
    pub fn new(signal: &'a SignalStore, manager: &'a mut UndoManager) -> Self {
        Self { signal, manager }
    }

    #[inline]
    pub fn signal(&self) -> &SignalStore {
        self.signal
    }

    #[inline]
    pub fn manager(&self) -> &UndoManager {
        self.manager
    }

    pub fn undo(&mut self) -> SgResult<bool> {
        self.manager.undo(self.signal)
    }

    pub fn redo(&mut self) -> SgResult<bool> {
        self.manager.redo(self.signal)
    }

    /// Open a transaction grouping the following edits
    pub fn begin(&mut self, description: &str) {
        self.manager.begin(description);
    }

    pub fn commit(&mut self) {
        self.manager.commit();
    }

    // ============ Edits ============

    /// Insert one block per channel at `offset`
    pub fn insert(&mut self, channels: &[usize], offset: usize, data: &[Vec<Sample>]) -> SgResult<()> {
        check_blocks(self.signal, channels, data)?;
        let Some(length) = longest(data) else {
            return Ok(());
        };
        let right = insert_bounds(self.signal, channels, offset, length)?;

        let signal = self.signal;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Insert");
        let actions = channels
            .iter()
            .zip(data)
            .map(|(&c, block)| Box::new(UndoInsertAction::new(c, offset, block.len())) as Box<dyn UndoAction>)
            .collect();
        let mark = tx.pending_actions();
        let ids = register_all(&mut tx, signal, actions)?;

        let mut writer = match signal.open_writer(channels, InsertMode::Insert, offset, right) {
            Ok(writer) => writer,
            Err(e) => {
                tx.discard_since(mark);
                return Err(e);
            }
        };
        let result = write_blocks(signal, &mut writer, data);
        let closed = writer.close();
        for (id, written) in ids.into_iter().zip(writer.written()) {
            if let Some(id) = id {
                tx.set_length(id, written);
            }
        }
        result.and(closed.map(|_| ()))
    }

    /// Append one block per channel behind each channel's last sample
    pub fn append(&mut self, channels: &[usize], data: &[Vec<Sample>]) -> SgResult<()> {
        check_blocks(self.signal, channels, data)?;
        if longest(data).is_none() {
            return Ok(());
        }

        let signal = self.signal;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Append");
        // the offsets are only known once the writers exist, inserts capture
        // nothing so registering after opening is still in time
        let mut writer = signal.open_writer(channels, InsertMode::Append, 0, 0)?;
        let actions = (0..writer.tracks())
            .filter_map(|n| writer.writer(n).map(|w| (n, w.first())))
            .map(|(n, first)| Box::new(UndoInsertAction::new(channels[n], first, data[n].len())) as Box<dyn UndoAction>)
            .collect();
        let ids = match register_all(&mut tx, signal, actions) {
            Ok(ids) => ids,
            Err(e) => {
                writer.close()?;
                return Err(e);
            }
        };

        let result = write_blocks(signal, &mut writer, data);
        let closed = writer.close();
        for (id, written) in ids.into_iter().zip(writer.written()) {
            if let Some(id) = id {
                tx.set_length(id, written);
            }
        }
        result.and(closed.map(|_| ()))
    }

    /// Overwrite from `offset` on. Samples reaching past a channel's end
    /// grow it, that part is undone like an insert.
    pub fn overwrite(&mut self, channels: &[usize], offset: usize, data: &[Vec<Sample>]) -> SgResult<()> {
        check_blocks(self.signal, channels, data)?;
        let Some(length) = longest(data) else {
            return Ok(());
        };

        let signal = self.signal;
        let mut actions: Vec<Box<dyn UndoAction>> = Vec::new();
        // per channel: samples inside the old length and index of the growth action
        let mut plan = Vec::with_capacity(channels.len());
        for (&c, block) in channels.iter().zip(data) {
            let available = signal.channel(c)?.length();
            if offset > available {
                return Err(SgError::OutOfRange {
                    offset,
                    length: block.len(),
                    available,
                });
            }
            let inside = block.len().min(available - offset);
            if inside > 0 {
                actions.push(Box::new(UndoModifyAction::new(c, offset, inside)));
            }
            let growth = (block.len() > inside).then(|| {
                actions.push(Box::new(UndoInsertAction::new(c, available, block.len() - inside)));
                actions.len() - 1
            });
            plan.push((inside, growth));
        }

        let right = last_index(offset, length)?;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Overwrite");
        let mark = tx.pending_actions();
        let ids = register_all(&mut tx, signal, actions)?;

        let mut writer = match signal.open_writer(channels, InsertMode::Overwrite, offset, right) {
            Ok(writer) => writer,
            Err(e) => {
                tx.discard_since(mark);
                return Err(e);
            }
        };
        let result = write_blocks(signal, &mut writer, data);
        let closed = writer.close();
        for ((inside, growth), written) in plan.into_iter().zip(writer.written()) {
            if let Some(Some(id)) = growth.map(|index| ids[index]) {
                tx.set_length(id, written.saturating_sub(inside));
            }
        }
        result.and(closed.map(|_| ()))
    }

    /// Remove `length` samples at `offset` from every selected channel
    pub fn delete(&mut self, channels: &[usize], offset: usize, length: usize) -> SgResult<()> {
        check_channels(self.signal, channels)?;
        if length == 0 {
            return Ok(());
        }

        let signal = self.signal;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Delete");
        let actions = channels
            .iter()
            .map(|&c| Box::new(UndoDeleteAction::new(c, offset, length)) as Box<dyn UndoAction>)
            .collect();
        let mark = tx.pending_actions();
        let ids = register_all(&mut tx, signal, actions)?;

        for (n, &c) in channels.iter().enumerate() {
            if let Err(e) = signal.channel(c).and_then(|channel| channel.delete(offset, length)) {
                // channels from here on were left untouched
                let recorded = ids[..n].iter().filter(|id| id.is_some()).count();
                tx.discard_since(mark + recorded);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Overwrite `[left, right]` with silence
    pub fn zero(&mut self, channels: &[usize], left: usize, right: usize) -> SgResult<()> {
        check_channels(self.signal, channels)?;
        if right < left {
            return Err(SgError::InvalidRange { left, right });
        }
        let length = right - left + 1;

        let signal = self.signal;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Silence");
        let actions = channels
            .iter()
            .map(|&c| Box::new(UndoModifyAction::new(c, left, length)) as Box<dyn UndoAction>)
            .collect();
        let mark = tx.pending_actions();
        register_all(&mut tx, signal, actions)?;

        let mut writer = match signal.open_writer(channels, InsertMode::Overwrite, left, right) {
            Ok(writer) => writer,
            Err(e) => {
                tx.discard_since(mark);
                return Err(e);
            }
        };
        let result = write_zeros(&mut writer, length);
        let closed = writer.close();
        result.and(closed.map(|_| ()))
    }

    /// Insert `length` samples of silence at `offset`
    pub fn insert_silence(&mut self, channels: &[usize], offset: usize, length: usize) -> SgResult<()> {
        check_channels(self.signal, channels)?;
        if length == 0 {
            return Ok(());
        }
        let right = insert_bounds(self.signal, channels, offset, length)?;

        let signal = self.signal;
        let mut tx = UndoTransactionGuard::new(&mut *self.manager, "Insert Silence");
        let actions = channels
            .iter()
            .map(|&c| Box::new(UndoInsertAction::new(c, offset, length)) as Box<dyn UndoAction>)
            .collect();
        let mark = tx.pending_actions();
        let ids = register_all(&mut tx, signal, actions)?;

        let mut writer = match signal.open_writer(channels, InsertMode::Insert, offset, right) {
            Ok(writer) => writer,
            Err(e) => {
                tx.discard_since(mark);
                return Err(e);
            }
        };
        let result = write_zeros(&mut writer, length);
        let closed = writer.close();
        for (id, written) in ids.into_iter().zip(writer.written()) {
            if let Some(id) = id {
                tx.set_length(id, written);
            }
        }
        result.and(closed.map(|_| ()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn check_channels(signal: &SignalStore, channels: &[usize]) -> SgResult<()> {
    for (n, &c) in channels.iter().enumerate() {
        if c >= signal.channel_count() || channels[..n].contains(&c) {
            return Err(SgError::InvalidChannel(c));
        }
    }
    Ok(())
}

fn check_blocks(signal: &SignalStore, channels: &[usize], data: &[Vec<Sample>]) -> SgResult<()> {
    check_channels(signal, channels)?;
    if channels.len() != data.len() {
        return Err(SgError::BlockCount {
            expected: channels.len(),
            actual: data.len(),
        });
    }
    Ok(())
}

/// Right bound of an insert of `length` samples at `offset`. The offset must
/// lie within or right behind every selected channel.
fn insert_bounds(signal: &SignalStore, channels: &[usize], offset: usize, length: usize) -> SgResult<usize> {
    for &c in channels {
        let available = signal.channel(c)?.length();
        if offset > available {
            return Err(SgError::OutOfRange {
                offset,
                length,
                available,
            });
        }
    }
    last_index(offset, length)
}

/// Length of the longest block, `None` when there is nothing to write
fn longest(data: &[Vec<Sample>]) -> Option<usize> {
    data.iter().map(Vec::len).max().filter(|&n| n > 0)
}

/// Register the actions of one edit. On failure the ones already
/// registered are dropped again and the edit must not happen.
fn register_all(
    manager: &mut UndoManager,
    signal: &SignalStore,
    actions: Vec<Box<dyn UndoAction>>,
) -> SgResult<Vec<Option<ActionId>>> {
    let mark = manager.pending_actions();
    let mut ids = Vec::with_capacity(actions.len());
    for action in actions {
        match manager.register(action, signal) {
            Ok(id) => ids.push(id),
            Err(e) => {
                manager.discard_since(mark);
                return Err(e);
            }
        }
    }
    Ok(ids)
}

fn write_blocks(signal: &SignalStore, writer: &mut MultiChannelWriter<'_>, data: &[Vec<Sample>]) -> SgResult<()> {
    let block_size = signal.config().writer_block_size.max(1);
    for (n, block) in data.iter().enumerate() {
        for chunk in block.chunks(block_size) {
            writer.write(n, chunk)?;
        }
    }
    Ok(())
}

fn write_zeros(writer: &mut MultiChannelWriter<'_>, length: usize) -> SgResult<()> {
    let zeros = vec![0; length.min(ZERO_BLOCK)];
    let mut remaining = length;
    while remaining > 0 {
        let count = remaining.min(ZERO_BLOCK);
        writer.write_all(&zeros[..count])?;
        remaining -= count;
    }
    Ok(())
}
