//! Edit scripts
//!
//! A script is a JSON array of edits, run in order against one signal:
//!
//! ```json
//! [
//!   { "op": "silence", "offset": 0, "length": 48000 },
//!   { "op": "insert", "channels": [0], "offset": 100, "samples": [1, 2, 3] },
//!   { "op": "undo" }
//! ]
//! ```
//!
//! Edits without `channels` apply to every channel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sg_core::Sample;
use sg_state::SignalEditor;

/// One scripted edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Insert {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        offset: usize,
        samples: Vec<Sample>,
    },
    Append {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        samples: Vec<Sample>,
    },
    Overwrite {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        offset: usize,
        samples: Vec<Sample>,
    },
    Delete {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        offset: usize,
        length: usize,
    },
    Zero {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        left: usize,
        right: usize,
    },
    Silence {
        #[serde(default)]
        channels: Option<Vec<usize>>,
        offset: usize,
        length: usize,
    },
    Begin {
        description: String,
    },
    Commit,
    Undo,
    Redo,
}

pub fn parse(text: &str) -> Result<Vec<Op>> {
    serde_json::from_str(text).context("invalid edit script")
}

/// Run every edit, stops at the first failing one
pub fn run(editor: &mut SignalEditor<'_>, ops: &[Op]) -> Result<()> {
    for (n, op) in ops.iter().enumerate() {
        apply(editor, op).with_context(|| format!("edit {} ({}) failed", n, op_name(op)))?;
    }
    Ok(())
}

fn apply(editor: &mut SignalEditor<'_>, op: &Op) -> Result<()> {
    let all = editor.signal().all_channels();
    let select = |channels: &Option<Vec<usize>>| channels.clone().unwrap_or_else(|| all.clone());

    match op {
        Op::Insert {
            channels,
            offset,
            samples,
        } => {
            let channels = select(channels);
            let data = vec![samples.clone(); channels.len()];
            editor.insert(&channels, *offset, &data)?;
        }
        Op::Append { channels, samples } => {
            let channels = select(channels);
            let data = vec![samples.clone(); channels.len()];
            editor.append(&channels, &data)?;
        }
        Op::Overwrite {
            channels,
            offset,
            samples,
        } => {
            let channels = select(channels);
            let data = vec![samples.clone(); channels.len()];
            editor.overwrite(&channels, *offset, &data)?;
        }
        Op::Delete {
            channels,
            offset,
            length,
        } => editor.delete(&select(channels), *offset, *length)?,
        Op::Zero {
            channels,
            left,
            right,
        } => editor.zero(&select(channels), *left, *right)?,
        Op::Silence {
            channels,
            offset,
            length,
        } => editor.insert_silence(&select(channels), *offset, *length)?,
        Op::Begin { description } => editor.begin(description),
        Op::Commit => editor.commit(),
        Op::Undo => {
            if !editor.undo()? {
                log::warn!("nothing to undo");
            }
        }
        Op::Redo => {
            if !editor.redo()? {
                log::warn!("nothing to redo");
            }
        }
    }
    Ok(())
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::Insert { .. } => "insert",
        Op::Append { .. } => "append",
        Op::Overwrite { .. } => "overwrite",
        Op::Delete { .. } => "delete",
        Op::Zero { .. } => "zero",
        Op::Silence { .. } => "silence",
        Op::Begin { .. } => "begin",
        Op::Commit => "commit",
        Op::Undo => "undo",
        Op::Redo => "redo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::StorageConfig;
    use sg_state::UndoManager;
    use sg_storage::SignalStore;

    #[test]
    fn test_parse() {
        let ops = parse(
            r#"[
                {"op": "silence", "offset": 0, "length": 10},
                {"op": "insert", "channels": [1], "offset": 2, "samples": [5, 6]},
                {"op": "undo"}
            ]"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[1],
            Op::Insert {
                channels: Some(vec![1]),
                offset: 2,
                samples: vec![5, 6]
            }
        );
        assert_eq!(ops[2], Op::Undo);
        assert!(parse(r#"[{"op": "explode"}]"#).is_err());
    }

    #[test]
    fn test_run() {
        let signal = SignalStore::with_channels(2, 0, StorageConfig::default()).unwrap();
        let mut manager = UndoManager::default();
        let mut editor = SignalEditor::new(&signal, &mut manager);
        let ops = parse(
            r#"[
                {"op": "silence", "offset": 0, "length": 10},
                {"op": "overwrite", "channels": [0], "offset": 8, "samples": [1, 2, 3, 4]},
                {"op": "delete", "channels": [1], "offset": 0, "length": 5},
                {"op": "undo"},
                {"op": "redo"}
            ]"#,
        )
        .unwrap();

        run(&mut editor, &ops).unwrap();
        assert_eq!(signal.channel(0).unwrap().length(), 12);
        assert_eq!(signal.channel(1).unwrap().length(), 5);
        assert_eq!(signal.read_range(0, 8, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_run_reports_failing_edit() {
        let signal = SignalStore::with_channels(1, 4, StorageConfig::default()).unwrap();
        let mut manager = UndoManager::default();
        let mut editor = SignalEditor::new(&signal, &mut manager);
        let ops = parse(r#"[{"op": "delete", "offset": 2, "length": 10}]"#).unwrap();

        let err = run(&mut editor, &ops).unwrap_err();
        assert!(err.to_string().contains("edit 0"));
    }
}
