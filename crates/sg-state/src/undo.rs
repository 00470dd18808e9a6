//! Undo/Redo manager
//!
//! Transactions can be nested, only the outermost commit closes one. Every
//! action is registered (and its data captured) before the edit it belongs to
//! touches the signal.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use sg_core::{SgError, SgResult, UndoConfig};
use sg_storage::SignalStore;

use crate::action::UndoAction;
use crate::transaction::UndoTransaction;

/// Handle of an action inside the open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(usize);

/// Undo/Redo manager
#[derive(Debug)]
pub struct UndoManager {
    undo_stack: VecDeque<UndoTransaction>,
    redo_stack: Vec<UndoTransaction>,
    max_transactions: usize,
    max_memory_bytes: usize,
    group_depth: usize,
    current: Option<UndoTransaction>,
    /// Recording gave up for the open transaction
    disabled: bool,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(&UndoConfig::default())
    }
}

impl UndoManager {
    pub fn new(config: &UndoConfig) -> Self {
        Self::with_limits(config.max_transactions, config.max_memory_bytes)
    }

    pub fn with_limits(max_transactions: usize, max_memory_bytes: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_transactions.min(1024)),
            redo_stack: Vec::new(),
            max_transactions,
            max_memory_bytes,
            group_depth: 0,
            current: None,
            disabled: false,
        }
    }

    // ============ Transactions ============

    /// Open a transaction, or nest into the open one
    pub fn begin(&mut self, description: &str) {
        if self.group_depth == 0 {
            self.current = Some(UndoTransaction::new(description));
            self.disabled = false;
        }
        self.group_depth += 1;
    }

    /// Close one level. The outermost commit puts the transaction on the
    /// undo stack.
    pub fn commit(&mut self) {
        if self.group_depth == 0 {
            log::warn!("UndoManager::commit without open transaction");
            return;
        }
        self.group_depth -= 1;
        if self.group_depth > 0 {
            return;
        }

        self.disabled = false;
        let Some(transaction) = self.current.take() else {
            return;
        };
        if transaction.is_empty() {
            return;
        }

        log::debug!(
            "commit '{}': {} actions, {} bytes",
            transaction.description(),
            transaction.len(),
            transaction.undo_size()
        );
        self.redo_stack.clear();
        self.undo_stack.push_back(transaction);
        while self.undo_stack.len() > self.max_transactions {
            self.undo_stack.pop_front();
        }
    }

    /// Drop the open transaction without reverting anything
    pub fn abort(&mut self) {
        if let Some(transaction) = self.current.take() {
            log::debug!("abort '{}'", transaction.description());
        }
        self.group_depth = 0;
        self.disabled = false;
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.group_depth > 0
    }

    /// Whether actions of the open transaction are recorded
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.group_depth > 0 && !self.disabled
    }

    /// Capture the undo data of an edit that is about to happen and add the
    /// action to the open transaction.
    ///
    /// A failing `store()` is returned and nothing is recorded, the edit must
    /// not be applied then. `Ok(None)` means the edit may go ahead but will
    /// not be undoable.
    pub fn register(
        &mut self,
        mut action: Box<dyn UndoAction>,
        signal: &SignalStore,
    ) -> SgResult<Option<ActionId>> {
        if self.group_depth == 0 {
            return Err(SgError::Transaction(format!(
                "'{}' registered outside of a transaction",
                action.description()
            )));
        }

        if self.disabled {
            self.redo_stack.clear();
            return Ok(None);
        }

        let needed = action.undo_size();
        if !self.make_room(needed) {
            self.disable(needed);
            return Ok(None);
        }

        action.store(signal)?;
        // the signal is about to change, whatever was undone is gone
        self.redo_stack.clear();
        let Some(current) = self.current.as_mut() else {
            return Ok(None);
        };
        current.add(action);
        Ok(Some(ActionId(current.len() - 1)))
    }

    /// Correct the length of a registered action after its writer closed
    pub fn set_length(&mut self, id: ActionId, length: usize) {
        if let Some(action) = self.current.as_mut().and_then(|t| t.action_mut(id.0)) {
            action.set_length(length);
        }
    }

    /// Number of actions in the open transaction
    pub fn pending_actions(&self) -> usize {
        self.current.as_ref().map_or(0, |t| t.len())
    }

    /// Forget actions registered after `mark`, when their edit never happened
    pub fn discard_since(&mut self, mark: usize) {
        if let Some(current) = self.current.as_mut() {
            current.truncate(mark);
        }
    }

    // ============ Undo / Redo ============

    /// Revert the newest transaction
    pub fn undo(&mut self, signal: &SignalStore) -> SgResult<bool> {
        if self.group_depth > 0 {
            return Err(SgError::Transaction("undo while a transaction is open".into()));
        }
        let Some(transaction) = self.undo_stack.pop_back() else {
            return Ok(false);
        };

        let needed = transaction.redo_size();
        let with_redo = self.make_room(needed);
        if !with_redo {
            log::warn!("not enough memory for redo ({} bytes)", needed);
            self.redo_stack.clear();
        }

        log::info!("undo '{}'", transaction.description());
        match transaction.undo(signal, with_redo) {
            Ok(redo) => {
                if let Some(redo) = redo {
                    self.redo_stack.push(redo);
                }
                Ok(true)
            }
            Err(e) => {
                log::error!("undo failed, discarding history: {}", e);
                self.clear();
                Err(e)
            }
        }
    }

    /// Re-apply the newest undone transaction
    pub fn redo(&mut self, signal: &SignalStore) -> SgResult<bool> {
        if self.group_depth > 0 {
            return Err(SgError::Transaction("redo while a transaction is open".into()));
        }
        let Some(transaction) = self.redo_stack.pop() else {
            return Ok(false);
        };

        log::info!("redo '{}'", transaction.description());
        match transaction.undo(signal, true) {
            Ok(undo) => {
                if let Some(undo) = undo.filter(|t| !t.is_empty()) {
                    self.undo_stack.push_back(undo);
                    while self.undo_stack.len() > self.max_transactions {
                        self.undo_stack.pop_front();
                    }
                }
                Ok(true)
            }
            Err(e) => {
                log::error!("redo failed, discarding history: {}", e);
                self.clear();
                Err(e)
            }
        }
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|t| t.description())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|t| t.description())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Bytes held by the whole history, including the open transaction
    pub fn memory_used(&self) -> usize {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .chain(self.current.iter())
            .map(|t| t.undo_size())
            .sum()
    }

    /// Clear all history. An open transaction keeps recording.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    // ============ Memory ============

    /// Drop old history until `needed` more bytes fit, redo data first
    fn make_room(&mut self, needed: usize) -> bool {
        if needed > self.max_memory_bytes {
            return false;
        }
        while self.memory_used() + needed > self.max_memory_bytes {
            if !self.redo_stack.is_empty() {
                self.redo_stack.remove(0);
            } else if let Some(dropped) = self.undo_stack.pop_front() {
                log::debug!("undo history full, dropping '{}'", dropped.description());
            } else {
                return false;
            }
        }
        true
    }

    fn disable(&mut self, needed: usize) {
        log::warn!(
            "undo data of {} bytes exceeds the limit of {}, continuing without undo",
            needed,
            self.max_memory_bytes
        );
        self.undo_stack.clear();
        self.redo_stack.clear();
        // a partial transaction could not restore the command either
        if let Some(current) = self.current.as_mut() {
            current.truncate(0);
        }
        self.disabled = true;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSACTION GUARD
// ═══════════════════════════════════════════════════════════════════════════

/// Opens a transaction on construction and commits it when dropped
#[derive(Debug)]
pub struct UndoTransactionGuard<'a> {
    manager: &'a mut UndoManager,
    aborted: bool,
}

impl<'a> UndoTransactionGuard<'a> {
    pub fn new(manager: &'a mut UndoManager, description: &str) -> Self {
        manager.begin(description);
        Self {
            manager,
            aborted: false,
        }
    }

    /// Drop the transaction instead of committing it
    pub fn abort(mut self) {
        self.manager.abort();
        self.aborted = true;
    }
}

impl Deref for UndoTransactionGuard<'_> {
    type Target = UndoManager;

    fn deref(&self) -> &UndoManager {
        self.manager
    }
}

impl DerefMut for UndoTransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut UndoManager {
        self.manager
    }
}

impl Drop for UndoTransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.aborted {
            self.manager.commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{UndoDeleteAction, UndoInsertAction, UndoModifyAction};
    use sg_core::{InsertMode, Sample, StorageConfig, samples_to_bytes};

    fn store(length: usize) -> SignalStore {
        let mut store = SignalStore::new(StorageConfig::default());
        store.add_channel_from((0..length as Sample).collect());
        store
    }

    fn contents(signal: &SignalStore) -> Vec<Sample> {
        let length = signal.channel(0).unwrap().length();
        signal.read_range(0, 0, length).unwrap()
    }

    /// Register and apply an overwrite of `[left, left + n)` with `value`
    fn set(manager: &mut UndoManager, signal: &SignalStore, left: usize, n: usize, value: Sample) {
        manager
            .register(Box::new(UndoModifyAction::new(0, left, n)), signal)
            .unwrap();
        let channel = signal.channel(0).unwrap();
        let mut writer = channel.open_writer(InsertMode::Overwrite, left, left + n - 1).unwrap();
        writer.write(&vec![value; n]).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_undo_redo() {
        let signal = store(10);
        let mut manager = UndoManager::default();

        manager.begin("First");
        set(&mut manager, &signal, 0, 2, 1);
        manager.commit();
        manager.begin("Second");
        set(&mut manager, &signal, 0, 2, 2);
        manager.commit();
        assert_eq!(manager.undo_description(), Some("Second"));

        assert!(manager.undo(&signal).unwrap());
        assert_eq!(&contents(&signal)[..2], &[1, 1]);
        assert_eq!(manager.redo_description(), Some("Second"));

        assert!(manager.redo(&signal).unwrap());
        assert_eq!(&contents(&signal)[..2], &[2, 2]);
        assert_eq!(manager.undo_count(), 2);
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_nested_transactions() {
        let signal = store(10);
        let mut manager = UndoManager::default();

        manager.begin("Outer");
        set(&mut manager, &signal, 0, 1, 5);
        manager.begin("Inner");
        set(&mut manager, &signal, 5, 1, 5);
        manager.commit();
        assert!(manager.in_transaction());
        assert_eq!(manager.undo_count(), 0);
        manager.commit();

        assert_eq!(manager.undo_count(), 1);
        assert_eq!(manager.undo_description(), Some("Outer"));
        manager.undo(&signal).unwrap();
        assert_eq!(contents(&signal), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        manager.begin("A");
        set(&mut manager, &signal, 0, 1, 1);
        manager.commit();
        manager.undo(&signal).unwrap();
        assert!(manager.can_redo());

        manager.begin("B");
        set(&mut manager, &signal, 1, 1, 1);
        manager.commit();
        assert!(!manager.can_redo());
    }

    #[test]
    fn test_max_transactions() {
        let signal = store(10);
        let mut manager = UndoManager::with_limits(3, usize::MAX);
        for i in 0..5 {
            manager.begin(&format!("Edit {}", i));
            set(&mut manager, &signal, i, 1, -1);
            manager.commit();
        }
        assert_eq!(manager.undo_count(), 3);
        assert_eq!(manager.undo_description(), Some("Edit 4"));
    }

    #[test]
    fn test_memory_limit_drops_oldest() {
        let signal = store(100);
        let per_edit = UndoModifyAction::new(0, 0, 10).undo_size();
        let mut manager = UndoManager::with_limits(100, per_edit * 2);
        for i in 0..3 {
            manager.begin(&format!("Edit {}", i));
            set(&mut manager, &signal, i * 10, 10, 0);
            manager.commit();
        }
        assert_eq!(manager.undo_count(), 2);
        assert!(manager.memory_used() <= per_edit * 2);
    }

    #[test]
    fn test_oversized_action_disables_transaction() {
        let signal = store(100);
        let mut manager = UndoManager::with_limits(100, samples_to_bytes(20));
        manager.begin("Small");
        set(&mut manager, &signal, 0, 2, 0);
        manager.commit();
        assert!(manager.can_undo());

        manager.begin("Huge");
        let id = manager
            .register(Box::new(UndoModifyAction::new(0, 0, 50)), &signal)
            .unwrap();
        assert!(id.is_none());
        assert!(!manager.is_recording());
        assert!(!manager.can_undo());
        // later actions of the same transaction are not recorded either
        assert!(manager
            .register(Box::new(UndoInsertAction::new(0, 0, 1)), &signal)
            .unwrap()
            .is_none());
        manager.commit();

        assert!(!manager.can_undo());
        manager.begin("Next");
        assert!(manager.is_recording());
        manager.abort();
    }

    #[test]
    fn test_failed_store_is_not_recorded() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        manager.begin("Delete");
        let result = manager.register(Box::new(UndoDeleteAction::new(0, 8, 5)), &signal);
        assert!(result.is_err());
        assert_eq!(manager.pending_actions(), 0);
        manager.commit();
        assert!(!manager.can_undo());
    }

    #[test]
    fn test_register_needs_transaction() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        let result = manager.register(Box::new(UndoInsertAction::new(0, 0, 1)), &signal);
        assert!(matches!(result, Err(SgError::Transaction(_))));
    }

    #[test]
    fn test_set_length_and_discard() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        manager.begin("Insert");
        let id = manager
            .register(Box::new(UndoInsertAction::new(0, 10, 0)), &signal)
            .unwrap()
            .unwrap();
        let channel = signal.channel(0).unwrap();
        let mut writer = channel.open_writer(InsertMode::Append, 0, 0).unwrap();
        writer.write(&[1, 2, 3]).unwrap();
        manager.set_length(id, writer.close().unwrap());

        let mark = manager.pending_actions();
        manager
            .register(Box::new(UndoInsertAction::new(0, 0, 99)), &signal)
            .unwrap();
        manager.discard_since(mark);
        assert_eq!(manager.pending_actions(), 1);
        manager.commit();

        manager.undo(&signal).unwrap();
        assert_eq!(contents(&signal), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_guard_commits_on_drop() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        {
            let mut guard = UndoTransactionGuard::new(&mut manager, "Guarded");
            set(&mut guard, &signal, 0, 1, 9);
        }
        assert_eq!(manager.undo_description(), Some("Guarded"));

        let mut guard = UndoTransactionGuard::new(&mut manager, "Aborted");
        set(&mut guard, &signal, 1, 1, 9);
        guard.abort();
        assert_eq!(manager.undo_count(), 1);
        assert!(!manager.in_transaction());
    }

    #[test]
    fn test_undo_inside_transaction_fails() {
        let signal = store(10);
        let mut manager = UndoManager::default();
        manager.begin("Open");
        assert!(manager.undo(&signal).is_err());
        assert!(manager.redo(&signal).is_err());
        manager.commit();
        assert!(!manager.undo(&signal).unwrap());
    }
}
