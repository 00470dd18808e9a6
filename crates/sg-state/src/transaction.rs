//! Undo transactions: the actions of one user command

use sg_core::{SgError, SgResult};
use sg_storage::SignalStore;

use crate::action::UndoAction;

/// Ordered group of undo actions, reverted as one step
pub struct UndoTransaction {
    description: String,
    actions: Vec<Box<dyn UndoAction>>,
}

impl UndoTransaction {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            actions: Vec::new(),
        }
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Append an action whose `store()` has already run
    pub fn add(&mut self, action: Box<dyn UndoAction>) {
        self.actions.push(action);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Bytes held by the actions
    pub fn undo_size(&self) -> usize {
        self.actions.iter().map(|a| a.undo_size()).sum()
    }

    /// Bytes a redo transaction would hold
    pub fn redo_size(&self) -> usize {
        self.actions.iter().map(|a| a.redo_size()).sum()
    }

    pub(crate) fn action_mut(&mut self, index: usize) -> Option<&mut Box<dyn UndoAction>> {
        self.actions.get_mut(index)
    }

    /// Drop every action added after the first `len`
    pub(crate) fn truncate(&mut self, len: usize) {
        self.actions.truncate(len);
    }

    /// Revert everything, without redo
    pub fn undo_all(self, signal: &SignalStore) -> SgResult<()> {
        self.undo(signal, false).map(|_| ())
    }

    /// Revert all actions, newest first. With `with_redo` the returned
    /// transaction re-applies the command when it is undone itself.
    ///
    /// A failure part way leaves the signal half reverted and is reported as
    /// [`SgError::Transaction`].
    pub fn undo(self, signal: &SignalStore, with_redo: bool) -> SgResult<Option<UndoTransaction>> {
        let total = self.actions.len();
        let mut redo = with_redo.then(|| UndoTransaction::new(self.description.clone()));

        for (done, action) in self.actions.into_iter().rev().enumerate() {
            let kind = action.description();
            match action.undo(signal, with_redo) {
                // kept in production order: reverting the redo transaction
                // replays the oldest edit first
                Ok(Some(inverse)) => {
                    if let Some(redo) = redo.as_mut() {
                        redo.add(inverse);
                    }
                }
                Ok(None) => {}
                Err(e) if done == 0 => return Err(e),
                Err(e) => {
                    log::error!(
                        "undo of '{}' failed after {} of {} actions: {}",
                        self.description,
                        done,
                        total,
                        e
                    );
                    return Err(SgError::Transaction(format!(
                        "{} ({}) failed after {} of {} actions: {}",
                        self.description, kind, done, total, e
                    )));
                }
            }
        }

        Ok(redo)
    }
}

impl std::fmt::Debug for UndoTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoTransaction")
            .field("description", &self.description)
            .field("actions", &self.actions.len())
            .field("undo_size", &self.undo_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{UndoInsertAction, UndoModifyAction};
    use sg_core::{InsertMode, Sample, StorageConfig};

    fn store(length: usize) -> SignalStore {
        let mut store = SignalStore::new(StorageConfig::default());
        store.add_channel_from((0..length as Sample).collect());
        store
    }

    fn overwrite(signal: &SignalStore, left: usize, data: &[Sample]) {
        let channel = signal.channel(0).unwrap();
        let mut writer = channel
            .open_writer(InsertMode::Overwrite, left, left + data.len() - 1)
            .unwrap();
        writer.write(data).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_reverse_order() {
        let signal = store(10);
        let mut transaction = UndoTransaction::new("Two edits");

        // insert two samples, then overwrite a range that covers them
        transaction.add(Box::new(UndoInsertAction::new(0, 2, 2)));
        let channel = signal.channel(0).unwrap();
        let mut writer = channel.open_writer(InsertMode::Insert, 2, 3).unwrap();
        writer.write(&[-1, -1]).unwrap();
        writer.close().unwrap();

        let mut modify = UndoModifyAction::new(0, 1, 4);
        modify.store(&signal).unwrap();
        transaction.add(Box::new(modify));
        overwrite(&signal, 1, &[9, 9, 9, 9]);

        assert_eq!(transaction.len(), 2);
        transaction.undo_all(&signal).unwrap();
        assert_eq!(signal.read_range(0, 0, 10).unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_redo_transaction() {
        let signal = store(10);
        let mut transaction = UndoTransaction::new("Overwrite");
        let mut modify = UndoModifyAction::new(0, 0, 3);
        modify.store(&signal).unwrap();
        transaction.add(Box::new(modify));
        overwrite(&signal, 0, &[7, 7, 7]);
        assert!(transaction.redo_size() > 0);

        let redo = transaction.undo(&signal, true).unwrap().unwrap();
        assert_eq!(redo.description(), "Overwrite");
        assert_eq!(signal.read_range(0, 0, 3).unwrap(), vec![0, 1, 2]);

        let undo = redo.undo(&signal, true).unwrap().unwrap();
        assert_eq!(signal.read_range(0, 0, 3).unwrap(), vec![7, 7, 7]);
        assert_eq!(undo.len(), 1);
    }

    #[test]
    fn test_failure_after_partial_undo() {
        let signal = store(10);
        let mut transaction = UndoTransaction::new("Broken");
        // the older action points past the end and can not be reverted
        transaction.add(Box::new(UndoInsertAction::new(0, 50, 5)));
        transaction.add(Box::new(UndoInsertAction::new(0, 0, 1)));

        let err = transaction.undo_all(&signal).unwrap_err();
        assert!(matches!(err, SgError::Transaction(_)));
        assert_eq!(signal.channel(0).unwrap().length(), 9);
    }

    #[test]
    fn test_empty_transaction() {
        let signal = store(1);
        let transaction = UndoTransaction::new("Nothing");
        assert!(transaction.is_empty());
        assert_eq!(transaction.undo_size(), 0);
        assert!(transaction.undo(&signal, true).unwrap().unwrap().is_empty());
    }
}
