//! Undo/redo log of applied operations.
//!
//! The log is a JSON state file holding every applied batch plus an index of
//! how many of them are currently in effect. File contents needed to replay a
//! batch in either direction are stored by SHA-256 hash in an objects
//! directory next to the state file.
//!
//! No file is touched unless its on-disk hash is what the log expects; a file
//! edited by hand since the batch was applied is reported as a conflict and
//! left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::editor::Editor;

/// Default name of the state file
pub const STATE_FILE_NAME: &str = ".itf_state.json";

/// Directory (next to the state file) holding content snapshots
pub const OBJECTS_DIR_NAME: &str = ".itf_objects";

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Modify,
    Delete,
    Rename,
}

/// One applied file operation.
///
/// `content_hash` is the file content the operation left behind (for a
/// delete, the content it removed). `previous_hash` is the content a modify
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub path: PathBuf,
    pub action: Action,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// RFC 3339
    pub timestamp: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    history: Vec<HistoryEntry>,
    /// Number of entries currently applied
    current_index: usize,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("history file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {hash} is missing from the history store")]
    MissingSnapshot { hash: String },
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What a replay actually did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
    /// Effect on disk: undoing a create is a delete, and so on
    pub action: Action,
    pub path: PathBuf,
    pub new_path: Option<PathBuf>,
}

/// Outcome of one undo or redo step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    pub done: Vec<Replayed>,
    /// Files left alone, with the reason
    pub conflicts: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

pub struct HistoryStore {
    state_path: PathBuf,
    objects_dir: PathBuf,
    state: State,
}

impl HistoryStore {
    /// Load the state file at `state_path`; a missing file is an empty log.
    pub fn open(state_path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let state_path = state_path.into();
        let objects_dir = state_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(OBJECTS_DIR_NAME);

        let state = match fs::read_to_string(&state_path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| HistoryError::Corrupt {
                path: state_path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(io_error(&state_path)(e)),
        };

        Ok(Self {
            state_path,
            objects_dir,
            state,
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.state.history
    }

    pub fn current_index(&self) -> usize {
        self.state.current_index
    }

    pub fn can_undo(&self) -> bool {
        self.state.current_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.state.current_index < self.state.history.len()
    }

    /// Store `bytes` under their hash and return it.
    pub fn store_snapshot(&self, bytes: &[u8]) -> Result<String, HistoryError> {
        let hash = content_hash(bytes);
        let path = self.objects_dir.join(&hash);
        if !path.exists() {
            fs::create_dir_all(&self.objects_dir).map_err(io_error(&self.objects_dir))?;
            fs::write(&path, bytes).map_err(io_error(&path))?;
        }
        Ok(hash)
    }

    pub fn load_snapshot(&self, hash: &str) -> Result<Vec<u8>, HistoryError> {
        let path = self.objects_dir.join(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(HistoryError::MissingSnapshot {
                hash: hash.to_string(),
            }),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Append a batch, discarding anything that had been undone.
    pub fn record(&mut self, operations: Vec<Operation>) -> Result<(), HistoryError> {
        if operations.is_empty() {
            return Ok(());
        }
        let keep = self.state.current_index;
        self.state.history.truncate(keep);
        self.state.history.push(HistoryEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operations,
        });
        self.state.current_index = self.state.history.len();
        self.save()
    }

    /// Revert the most recently applied batch.
    pub fn undo<E: Editor + ?Sized>(&mut self, editor: &mut E) -> Result<Replay, HistoryError> {
        if !self.can_undo() {
            return Err(HistoryError::NothingToUndo);
        }
        let index = self.state.current_index - 1;
        let entry = self.state.history[index].clone();

        let mut replay = Replay::default();
        for op in entry.operations.iter().rev() {
            self.replay_operation(op, Direction::Undo, editor, &mut replay)?;
        }

        self.state.current_index = index;
        self.save()?;
        Ok(replay)
    }

    /// Re-apply the most recently undone batch.
    pub fn redo<E: Editor + ?Sized>(&mut self, editor: &mut E) -> Result<Replay, HistoryError> {
        if !self.can_redo() {
            return Err(HistoryError::NothingToRedo);
        }
        let index = self.state.current_index;
        let entry = self.state.history[index].clone();

        let mut replay = Replay::default();
        for op in &entry.operations {
            self.replay_operation(op, Direction::Redo, editor, &mut replay)?;
        }

        self.state.current_index = index + 1;
        self.save()?;
        Ok(replay)
    }

    fn save(&self) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(&self.state).map_err(|source| HistoryError::Corrupt {
            path: self.state_path.clone(),
            source,
        })?;
        fs::write(&self.state_path, json).map_err(io_error(&self.state_path))
    }

    fn replay_operation<E: Editor + ?Sized>(
        &self,
        op: &Operation,
        direction: Direction,
        editor: &mut E,
        replay: &mut Replay,
    ) -> Result<(), HistoryError> {
        use Direction::{Redo, Undo};

        let result = match (op.action, direction) {
            (Action::Create, Undo) => self.remove_if(&op.path, &op.content_hash, editor),
            (Action::Create, Redo) => self.restore_if_absent(&op.path, &op.content_hash, editor),
            (Action::Delete, Undo) => self.restore_if_absent(&op.path, &op.content_hash, editor),
            (Action::Delete, Redo) => self.remove_if(&op.path, &op.content_hash, editor),
            (Action::Modify, _) => {
                let Some(previous) = op.previous_hash.as_deref() else {
                    replay
                        .conflicts
                        .push((op.path.clone(), "no previous content recorded".into()));
                    return Ok(());
                };
                let (expected, target) = match direction {
                    Undo => (op.content_hash.as_str(), previous),
                    Redo => (previous, op.content_hash.as_str()),
                };
                self.overwrite_if(&op.path, expected, target, editor)
            }
            (Action::Rename, _) => {
                let Some(new_path) = op.new_path.as_deref() else {
                    replay
                        .conflicts
                        .push((op.path.clone(), "rename has no target".into()));
                    return Ok(());
                };
                let (from, to) = match direction {
                    Undo => (new_path, op.path.as_path()),
                    Redo => (op.path.as_path(), new_path),
                };
                Self::move_if(from, to, &op.content_hash, editor)
            }
        };

        match result? {
            Ok(()) => {
                let action = match (op.action, direction) {
                    (Action::Create, Undo) => Action::Delete,
                    (Action::Delete, Undo) => Action::Create,
                    (action, _) => action,
                };
                let (path, new_path) = match (op.action, direction, &op.new_path) {
                    (Action::Rename, Undo, Some(new_path)) => (new_path.clone(), Some(op.path.clone())),
                    _ => (op.path.clone(), op.new_path.clone()),
                };
                replay.done.push(Replayed {
                    action,
                    path,
                    new_path,
                });
            }
            Err(reason) => replay.conflicts.push((op.path.clone(), reason)),
        }
        Ok(())
    }

    /// `Ok(Err(reason))` is a conflict; the outer error is a store failure.
    fn remove_if<E: Editor + ?Sized>(
        &self,
        path: &Path,
        expected: &str,
        editor: &mut E,
    ) -> Result<Result<(), String>, HistoryError> {
        if let Err(reason) = check_hash(path, expected) {
            return Ok(Err(reason));
        }
        Ok(editor.remove_file(path).map_err(|e| e.to_string()))
    }

    fn restore_if_absent<E: Editor + ?Sized>(
        &self,
        path: &Path,
        hash: &str,
        editor: &mut E,
    ) -> Result<Result<(), String>, HistoryError> {
        if path.exists() {
            return Ok(Err("file exists".into()));
        }
        let bytes = self.load_snapshot(hash)?;
        if let Some(parent) = path.parent() {
            if let Err(e) = editor.create_dir(parent) {
                return Ok(Err(e.to_string()));
            }
        }
        Ok(editor.write_bytes(path, &bytes).map_err(|e| e.to_string()))
    }

    fn overwrite_if<E: Editor + ?Sized>(
        &self,
        path: &Path,
        expected: &str,
        target: &str,
        editor: &mut E,
    ) -> Result<Result<(), String>, HistoryError> {
        if let Err(reason) = check_hash(path, expected) {
            return Ok(Err(reason));
        }
        let bytes = self.load_snapshot(target)?;
        Ok(editor.write_bytes(path, &bytes).map_err(|e| e.to_string()))
    }

    fn move_if<E: Editor + ?Sized>(
        from: &Path,
        to: &Path,
        expected: &str,
        editor: &mut E,
    ) -> Result<Result<(), String>, HistoryError> {
        if let Err(reason) = check_hash(from, expected) {
            return Ok(Err(reason));
        }
        if to.exists() {
            return Ok(Err(format!("{} exists", to.display())));
        }
        Ok(editor.rename_file(from, to).map_err(|e| e.to_string()))
    }
}

/// The file at `path` must exist and hash to `expected`.
fn check_hash(path: &Path, expected: &str) -> Result<(), String> {
    match fs::read(path) {
        Ok(bytes) if content_hash(&bytes) == expected => Ok(()),
        Ok(_) => Err("file changed since it was written".into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err("file is missing".into()),
        Err(e) => Err(e.to_string()),
    }
}
