//! Undo actions
//!
//! An action is created right before its edit is applied. `store()` captures
//! whatever the edit is about to destroy, `undo()` applies the inverse and can
//! hand back the matching redo action, captured in the same call.

use std::mem::size_of;

use sg_core::{InsertMode, Sample, SgError, SgResult, samples_to_bytes};
use sg_storage::SignalStore;

/// One reversible edit on one channel
pub trait UndoAction: Send + std::fmt::Debug {
    /// Short text for the undo/redo menu
    fn description(&self) -> String;

    /// Bytes held once `store()` has run
    fn undo_size(&self) -> usize;

    /// Bytes the redo action returned by `undo()` will hold
    fn redo_size(&self) -> usize;

    /// Capture the data the edit is about to destroy. Must run before the
    /// edit touches the signal.
    fn store(&mut self, signal: &SignalStore) -> SgResult<()>;

    /// Apply the inverse edit. With `with_redo` the action that reverts this
    /// undo is returned.
    fn undo(
        self: Box<Self>,
        signal: &SignalStore,
        with_redo: bool,
    ) -> SgResult<Option<Box<dyn UndoAction>>>;

    /// Correct the length once the writer of the edit has closed
    fn set_length(&mut self, _length: usize) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// INSERT
// ═══════════════════════════════════════════════════════════════════════════

/// Samples were inserted at `offset`. Undo deletes them again.
#[derive(Debug, Clone)]
pub struct UndoInsertAction {
    channel: usize,
    offset: usize,
    length: usize,
}

impl UndoInsertAction {
    pub fn new(channel: usize, offset: usize, length: usize) -> Self {
        Self {
            channel,
            offset,
            length,
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl UndoAction for UndoInsertAction {
    fn description(&self) -> String {
        "Insert".to_string()
    }

    fn undo_size(&self) -> usize {
        size_of::<Self>()
    }

    fn redo_size(&self) -> usize {
        samples_to_bytes(self.length)
    }

    // inserting never destroys anything
    fn store(&mut self, _signal: &SignalStore) -> SgResult<()> {
        Ok(())
    }

    fn undo(
        self: Box<Self>,
        signal: &SignalStore,
        with_redo: bool,
    ) -> SgResult<Option<Box<dyn UndoAction>>> {
        if self.length == 0 {
            return Ok(with_redo.then(|| self as Box<dyn UndoAction>));
        }

        let redo = if with_redo {
            let mut redo = UndoDeleteAction::new(self.channel, self.offset, self.length);
            redo.store(signal)?;
            Some(Box::new(redo) as Box<dyn UndoAction>)
        } else {
            None
        };

        signal.channel(self.channel)?.delete(self.offset, self.length)?;
        log::debug!(
            "undo insert: channel {}, {} samples at {}",
            self.channel,
            self.length,
            self.offset
        );
        Ok(redo)
    }

    fn set_length(&mut self, length: usize) {
        self.length = length;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DELETE
// ═══════════════════════════════════════════════════════════════════════════

/// Samples are about to be removed. Undo inserts them again.
#[derive(Debug, Clone)]
pub struct UndoDeleteAction {
    channel: usize,
    offset: usize,
    length: usize,
    samples: Vec<Sample>,
}

impl UndoDeleteAction {
    pub fn new(channel: usize, offset: usize, length: usize) -> Self {
        Self {
            channel,
            offset,
            length,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl UndoAction for UndoDeleteAction {
    fn description(&self) -> String {
        "Delete".to_string()
    }

    fn undo_size(&self) -> usize {
        size_of::<Self>() + samples_to_bytes(self.length)
    }

    fn redo_size(&self) -> usize {
        size_of::<UndoInsertAction>()
    }

    fn store(&mut self, signal: &SignalStore) -> SgResult<()> {
        self.samples = signal.read_range(self.channel, self.offset, self.length)?;
        Ok(())
    }

    fn undo(
        self: Box<Self>,
        signal: &SignalStore,
        with_redo: bool,
    ) -> SgResult<Option<Box<dyn UndoAction>>> {
        if !self.samples.is_empty() {
            let channel = signal.channel(self.channel)?;
            let right = last_index(self.offset, self.samples.len())?;
            let mut writer = channel.open_writer(InsertMode::Insert, self.offset, right)?;
            writer.write(&self.samples)?;
            writer.close()?;
        }
        log::debug!(
            "undo delete: channel {}, {} samples at {}",
            self.channel,
            self.samples.len(),
            self.offset
        );

        Ok(with_redo.then(|| {
            Box::new(UndoInsertAction::new(self.channel, self.offset, self.samples.len()))
                as Box<dyn UndoAction>
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MODIFY
// ═══════════════════════════════════════════════════════════════════════════

/// Samples are about to be overwritten in place. Undo writes the old ones
/// back.
#[derive(Debug, Clone)]
pub struct UndoModifyAction {
    channel: usize,
    offset: usize,
    length: usize,
    samples: Vec<Sample>,
}

impl UndoModifyAction {
    pub fn new(channel: usize, offset: usize, length: usize) -> Self {
        Self {
            channel,
            offset,
            length,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl UndoAction for UndoModifyAction {
    fn description(&self) -> String {
        "Modify".to_string()
    }

    fn undo_size(&self) -> usize {
        size_of::<Self>() + samples_to_bytes(self.length)
    }

    fn redo_size(&self) -> usize {
        self.undo_size()
    }

    fn store(&mut self, signal: &SignalStore) -> SgResult<()> {
        self.samples = signal.read_range(self.channel, self.offset, self.length)?;
        Ok(())
    }

    fn undo(
        self: Box<Self>,
        signal: &SignalStore,
        with_redo: bool,
    ) -> SgResult<Option<Box<dyn UndoAction>>> {
        if self.samples.is_empty() {
            return Ok(with_redo.then(|| self as Box<dyn UndoAction>));
        }

        // read what the restore is about to overwrite
        let redo = if with_redo {
            let mut redo = UndoModifyAction::new(self.channel, self.offset, self.samples.len());
            redo.store(signal)?;
            Some(Box::new(redo) as Box<dyn UndoAction>)
        } else {
            None
        };

        let channel = signal.channel(self.channel)?;
        let right = last_index(self.offset, self.samples.len())?;
        let mut writer = channel.open_writer(InsertMode::Overwrite, self.offset, right)?;
        writer.write(&self.samples)?;
        writer.close()?;
        log::debug!(
            "undo modify: channel {}, {} samples at {}",
            self.channel,
            self.samples.len(),
            self.offset
        );
        Ok(redo)
    }
}

/// Index of the last of `length` (> 0) samples starting at `offset`
pub(crate) fn last_index(offset: usize, length: usize) -> SgResult<usize> {
    offset
        .checked_add(length.saturating_sub(1))
        .ok_or(SgError::OutOfRange {
            offset,
            length,
            available: usize::MAX - offset,
        })
}
