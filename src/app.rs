//! Orchestration: plan, apply through an editor, record history, summarize.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::blocks::{extract_tool_blocks, has_allowed_extension};
use crate::diff_fix::{MatchMode, correct_diff, extract_diff_blocks};
use crate::editor::{Editor, FsEditor};
use crate::history::{Action, HistoryError, HistoryStore, Operation, Replay, STATE_FILE_NAME};
use crate::patch::render_lines;
use crate::plan::{ChangeSource, ExecutionPlan, PlanOptions, create_plan, plan_contents};
use crate::resolve::{FileAction, PathResolver, relativize};

pub const EMPTY_SOURCE_MESSAGE: &str = "Source is empty. Nothing to process.";
pub const NO_CHANGES_MESSAGE: &str = "No valid changes were generated. Nothing to do.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Normalized extension allow-list; `[".diff"]` selects diff-only mode
    pub extensions: Vec<String>,
    pub lookup_dirs: Vec<PathBuf>,
    pub match_mode: MatchMode,
    pub state_file: PathBuf,
    pub record_history: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            lookup_dirs: Vec::new(),
            match_mode: MatchMode::Exact,
            state_file: PathBuf::from(STATE_FILE_NAME),
            record_history: true,
        }
    }
}

/// What a run did, with paths relative to the working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub created: Vec<String>,
    pub modified: Vec<String>,
    /// `old -> new`
    pub renamed: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Summary {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// True when no file was touched.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.modified.is_empty()
            && self.renamed.is_empty()
            && self.deleted.is_empty()
    }
}

pub struct App<E: Editor = FsEditor> {
    config: AppConfig,
    resolver: PathResolver,
    editor: E,
    base_dir: PathBuf,
}

impl App<FsEditor> {
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::with_editor(config, FsEditor)
    }
}

impl<E: Editor> App<E> {
    pub fn with_editor(config: AppConfig, editor: E) -> Result<Self> {
        let resolver =
            PathResolver::new(&config.lookup_dirs).context("failed to resolve lookup directories")?;
        let base_dir = std::env::current_dir().context("failed to read working directory")?;
        Ok(Self {
            config,
            resolver,
            editor,
            base_dir,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            extensions: self.config.extensions.clone(),
            match_mode: self.config.match_mode,
        }
    }

    /// Path for display: relative to the working directory when possible.
    pub fn display_path(&self, path: &Path) -> String {
        relativize(path, &self.base_dir).display().to_string()
    }

    pub fn plan(&self, text: &str) -> Result<ExecutionPlan> {
        Ok(create_plan(text, &self.resolver, &self.plan_options())?)
    }

    /// Plan and apply `text` in one step.
    pub fn process(&mut self, text: &str) -> Result<Summary> {
        if text.trim().is_empty() {
            return Ok(Summary::with_message(EMPTY_SOURCE_MESSAGE));
        }
        let plan = self.plan(text)?;
        self.apply_plan(&plan)
    }

    /// Write `path → content` pairs a caller already holds.
    pub fn apply_contents(&mut self, contents: &BTreeMap<String, String>) -> Result<Summary> {
        let plan = plan_contents(contents, &self.resolver)?;
        self.apply_plan(&plan)
    }

    /// Apply a plan: directories, renames, writes, then deletes. Each file
    /// stands alone; failures are collected into the summary.
    pub fn apply_plan(&mut self, plan: &ExecutionPlan) -> Result<Summary> {
        let mut summary = Summary {
            failed: plan.failed.iter().map(|p| self.display_path(p)).collect(),
            ..Default::default()
        };
        if plan.is_empty() {
            summary.message = Some(NO_CHANGES_MESSAGE.to_string());
            return Ok(summary);
        }

        let store = if self.config.record_history {
            Some(HistoryStore::open(&self.config.state_file)?)
        } else {
            None
        };
        let mut operations = Vec::new();

        for dir in &plan.dirs_to_create {
            self.editor
                .create_dir(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }

        for rename in &plan.renames {
            let (from, to) = (self.display_path(&rename.from), self.display_path(&rename.to));
            if rename.to.exists() {
                summary.failed.push(to);
                continue;
            }
            let bytes = match fs::read(&rename.from) {
                Ok(bytes) => bytes,
                Err(_) => {
                    summary.failed.push(from);
                    continue;
                }
            };
            if self.editor.rename_file(&rename.from, &rename.to).is_err() {
                summary.failed.push(from);
                continue;
            }
            if let Some(store) = &store {
                operations.push(Operation {
                    path: rename.from.clone(),
                    action: Action::Rename,
                    content_hash: store.store_snapshot(&bytes)?,
                    previous_hash: None,
                    new_path: Some(rename.to.clone()),
                });
            }
            summary.renamed.push(format!("{from} -> {to}"));
        }

        // Content as it is right before writing, renames included
        let mut previous: BTreeMap<&Path, Option<Vec<u8>>> = BTreeMap::new();
        let mut writable = Vec::new();
        for change in &plan.changes {
            match read_optional(&change.path) {
                Ok(bytes) => {
                    previous.insert(change.path.as_path(), bytes);
                    writable.push(change.clone());
                }
                Err(_) => summary.failed.push(self.display_path(&change.path)),
            }
        }

        let report = self.editor.apply_changes(&writable);
        for (path, _) in &report.failed {
            summary.failed.push(self.display_path(path));
        }

        let mut diff_modified = Vec::new();
        let mut other_modified = Vec::new();
        for change in writable.iter().filter(|c| report.updated.contains(&c.path)) {
            let before = previous.get(change.path.as_path()).cloned().flatten();
            let shown = self.display_path(&change.path);
            let action = if before.is_some() {
                FileAction::Modify
            } else {
                FileAction::Create
            };
            match action {
                FileAction::Create => summary.created.push(shown),
                FileAction::Modify if change.source == ChangeSource::Diff => diff_modified.push(shown),
                FileAction::Modify => other_modified.push(shown),
            }

            if let Some(store) = &store {
                let after = store.store_snapshot(render_lines(&change.content).as_bytes())?;
                let (action, previous_hash) = match before {
                    Some(bytes) => (Action::Modify, Some(store.store_snapshot(&bytes)?)),
                    None => (Action::Create, None),
                };
                operations.push(Operation {
                    path: change.path.clone(),
                    action,
                    content_hash: after,
                    previous_hash,
                    new_path: None,
                });
            }
        }
        summary.modified = diff_modified;
        summary.modified.extend(other_modified);

        for path in &plan.deletes {
            let shown = self.display_path(path);
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(_) => {
                    summary.failed.push(shown);
                    continue;
                }
            };
            if self.editor.remove_file(path).is_err() {
                summary.failed.push(shown);
                continue;
            }
            if let Some(store) = &store {
                operations.push(Operation {
                    path: path.clone(),
                    action: Action::Delete,
                    content_hash: store.store_snapshot(&bytes)?,
                    previous_hash: None,
                    new_path: None,
                });
            }
            summary.deleted.push(shown);
        }

        if let Some(mut store) = store {
            store
                .record(operations)
                .context("failed to record history")?;
        }

        Ok(summary)
    }

    /// Corrected form of every diff in `text`. Diffs that cannot be corrected
    /// are left out.
    pub fn fix_diffs(&self, text: &str) -> String {
        let options = self.plan_options();
        extract_diff_blocks(text)
            .into_iter()
            .filter(|diff| {
                options.diff_only() || has_allowed_extension(&diff.file_path, &options.extensions)
            })
            .filter_map(|diff| correct_diff(&diff, &self.resolver, options.match_mode).ok())
            .collect()
    }

    /// Contents of every tool block, one per line.
    pub fn tool_output(&self, text: &str) -> String {
        extract_tool_blocks(text).join("\n")
    }

    pub fn undo(&mut self) -> Result<Summary> {
        let mut store = HistoryStore::open(&self.config.state_file)?;
        match store.undo(&mut self.editor) {
            Ok(replay) => Ok(self.replay_summary(replay)),
            Err(HistoryError::NothingToUndo) => Ok(Summary::with_message("Nothing to undo.")),
            Err(e) => Err(e).context("undo failed"),
        }
    }

    pub fn redo(&mut self) -> Result<Summary> {
        let mut store = HistoryStore::open(&self.config.state_file)?;
        match store.redo(&mut self.editor) {
            Ok(replay) => Ok(self.replay_summary(replay)),
            Err(HistoryError::NothingToRedo) => Ok(Summary::with_message("Nothing to redo.")),
            Err(e) => Err(e).context("redo failed"),
        }
    }

    fn replay_summary(&self, replay: Replay) -> Summary {
        let mut summary = Summary::default();
        for done in replay.done {
            let shown = self.display_path(&done.path);
            match (done.action, done.new_path) {
                (Action::Create, _) => summary.created.push(shown),
                (Action::Modify, _) => summary.modified.push(shown),
                (Action::Delete, _) => summary.deleted.push(shown),
                (Action::Rename, Some(to)) => {
                    summary
                        .renamed
                        .push(format!("{shown} -> {}", self.display_path(&to)));
                }
                (Action::Rename, None) => summary.renamed.push(shown),
            }
        }
        summary.failed = replay
            .conflicts
            .iter()
            .map(|(path, _)| self.display_path(path))
            .collect();
        summary
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn app_in(dir: &TempDir) -> App {
        let config = AppConfig {
            lookup_dirs: vec![dir.path().to_path_buf()],
            state_file: dir.path().join(STATE_FILE_NAME),
            ..Default::default()
        };
        App::new(config).unwrap()
    }

    fn read(dir: &TempDir, rel: &str) -> String {
        fs::read_to_string(dir.path().join(rel)).unwrap()
    }

    #[test]
    fn test_empty_source_message() {
        let dir = tempdir().unwrap();
        let summary = app_in(&dir).process("  \n").unwrap();
        assert_eq!(summary.message.as_deref(), Some(EMPTY_SOURCE_MESSAGE));
        assert!(summary.is_empty());
    }

    #[test]
    fn test_no_changes_message() {
        let dir = tempdir().unwrap();
        let summary = app_in(&dir).process("just prose, no blocks").unwrap();
        assert_eq!(summary.message.as_deref(), Some(NO_CHANGES_MESSAGE));
    }

    #[test]
    fn test_process_creates_and_modifies() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("lib.py"), "a = 1\nb = 2\n").unwrap();
        let text = "`src/new.py`\n```python\nprint(1)\n```\n\
                    ```diff\n--- a/lib.py\n+++ b/lib.py\n@@ -7,2 +7,2 @@\n a = 1\n-b = 2\n+b = 3\n```";

        let mut app = app_in(&dir);
        let summary = app.process(text).unwrap();

        assert_eq!(summary.created.len(), 1);
        assert!(summary.created[0].ends_with("new.py"));
        assert_eq!(summary.modified.len(), 1);
        assert!(summary.failed.is_empty());
        assert_eq!(read(&dir, "src/new.py"), "print(1)\n");
        assert_eq!(read(&dir, "lib.py"), "a = 1\nb = 3\n");
    }

    #[test]
    fn test_failed_diff_reported_others_applied() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.txt"), "one\n").unwrap();
        let text = "```diff\n+++ b/x.txt\n@@\n nowhere\n+y\n```\n`ok.txt`\n```\nfine\n```";

        let summary = app_in(&dir).process(text).unwrap();
        assert!(summary.has_failures());
        assert!(summary.failed[0].ends_with("x.txt"));
        assert_eq!(read(&dir, "ok.txt"), "fine\n");
        assert_eq!(read(&dir, "x.txt"), "one\n");
    }

    #[test]
    fn test_undo_and_redo_round_trip() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "before\n").unwrap();
        let mut app = app_in(&dir);
        app.process("`a.txt`\n```\nafter\n```\n`b.txt`\n```\nnew\n```").unwrap();
        assert_eq!(read(&dir, "a.txt"), "after\n");

        let undone = app.undo().unwrap();
        assert_eq!(read(&dir, "a.txt"), "before\n");
        assert!(!dir.path().join("b.txt").exists());
        assert_eq!(undone.modified.len(), 1);
        assert_eq!(undone.deleted.len(), 1);

        app.redo().unwrap();
        assert_eq!(read(&dir, "a.txt"), "after\n");
        assert_eq!(read(&dir, "b.txt"), "new\n");

        let nothing = app.redo().unwrap();
        assert_eq!(nothing.message.as_deref(), Some("Nothing to redo."));
    }

    #[test]
    fn test_rename_then_delete() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.go"), "package a\n").unwrap();
        fs::write(dir.path().join("junk.txt"), "x\n").unwrap();
        let mut app = app_in(&dir);

        let summary = app
            .process("```rename\nold.go pkg/new.go\n```\n```delete\njunk.txt\n```")
            .unwrap();
        assert_eq!(summary.renamed.len(), 1);
        assert_eq!(summary.deleted.len(), 1);
        assert_eq!(read(&dir, "pkg/new.go"), "package a\n");
        assert!(!dir.path().join("junk.txt").exists());

        app.undo().unwrap();
        assert_eq!(read(&dir, "old.go"), "package a\n");
        assert_eq!(read(&dir, "junk.txt"), "x\n");
    }

    #[test]
    fn test_rename_onto_existing_file_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        let summary = app_in(&dir).process("```rename\na.txt b.txt\n```").unwrap();
        assert!(summary.renamed.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(read(&dir, "b.txt"), "b\n");
    }

    #[test]
    fn test_refused_rename_keeps_target_intact() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "precious\n").unwrap();
        let summary = app_in(&dir)
            .process("```rename\na.txt b.txt\n```\n`a.txt`\n```\nnew a\n```")
            .unwrap();

        assert_eq!(read(&dir, "b.txt"), "precious\n");
        assert_eq!(read(&dir, "a.txt"), "new a\n");
        assert!(summary.renamed.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].ends_with("b.txt"));
        assert_eq!(summary.modified.len(), 1);
        assert!(summary.modified[0].ends_with("a.txt"));
    }

    #[test]
    fn test_history_disabled_writes_no_state() {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            lookup_dirs: vec![dir.path().to_path_buf()],
            state_file: dir.path().join(STATE_FILE_NAME),
            record_history: false,
            ..Default::default()
        };
        let mut app = App::new(config).unwrap();
        app.process("`a.txt`\n```\nx\n```").unwrap();
        assert!(!dir.path().join(STATE_FILE_NAME).exists());
    }

    #[test]
    fn test_apply_contents() {
        let dir = tempdir().unwrap();
        let mut app = app_in(&dir);
        let contents = BTreeMap::from([("gen/out.txt".to_string(), "hello\n".to_string())]);
        let summary = app.apply_contents(&contents).unwrap();
        assert_eq!(summary.created.len(), 1);
        assert_eq!(read(&dir, "gen/out.txt"), "hello\n");
    }

    #[test]
    fn test_fix_diffs_skips_failures() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "a\nb\nc\n").unwrap();
        let text = "```diff\n+++ b/f.txt\n@@ -9,9 +9,9 @@\n b\n-c\n+C\n```\n```diff\n+++ b/f.txt\n@@\n zzz\n+q\n```";
        let fixed = app_in(&dir).fix_diffs(text);
        assert_eq!(fixed, "--- a/f.txt\n+++ b/f.txt\n@@ -2,2 +2,2 @@\n b\n-c\n+C\n");
    }

    #[test]
    fn test_tool_output() {
        let dir = tempdir().unwrap();
        let text = "```tool\nfirst\n```\n```tool\nsecond\n```";
        assert_eq!(app_in(&dir).tool_output(text), "first\nsecond");
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = Summary {
            created: vec!["a".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["created"][0], "a");
        assert!(json.get("message").is_none());
    }
}
