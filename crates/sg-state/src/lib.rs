//! sg-state: Undo/redo for the sample store
//!
//! Provides reversible editing on top of `sg-storage`:
//! - Undo actions that capture what an edit is about to destroy
//! - Transactions grouping the actions of one user command
//! - UndoManager with nested transactions and history limits
//! - SignalEditor, the command layer that ties edits to their undo data

mod action;
mod editor;
mod transaction;
mod undo;

pub use action::*;
pub use editor::*;
pub use transaction::*;
pub use undo::*;
