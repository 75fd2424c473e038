//! Merging of file blocks, diffs and delete/rename blocks into one plan.
//!
//! The merge is two explicit passes: diff-derived changes are collected into a
//! map keyed by resolved path, then file-block changes are laid over it. A file
//! block therefore always beats a diff for the same path, wherever each one sits
//! in the document.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::blocks::{BlockKind, CodeBlock, extract_code_blocks, extract_path, has_allowed_extension};
use crate::diff_fix::{CorrectionError, DiffBlock, MatchMode, correct_hunks};
use crate::ops::{parse_delete_block, parse_rename_block};
use crate::patch::{apply_patch, split_lines};
use crate::resolve::{FileAction, PathResolver, missing_parent, read_path};

/// Where a planned write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    FileBlock,
    Diff,
    /// A change to a renamed file, carried over to the new path
    Rename,
    /// Content handed in directly by a library caller
    Library,
}

/// One committed decision to write `content` to `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub content: Vec<String>,
    pub source: ChangeSource,
    pub raw_block: String,
}

/// Why a block contributed nothing to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NoPath,
    NoDiffPath,
    ExtensionFiltered,
    DiffOnlyMode,
    NoHunks,
    EmptyBody,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoPath => "hint names no file path",
            Self::NoDiffPath => "diff has no '+++ b/<path>' line",
            Self::ExtensionFiltered => "extension not allowed",
            Self::DiffOnlyMode => "file blocks are ignored in diff-only mode",
            Self::NoHunks => "diff contains no hunks",
            Self::EmptyBody => "block body is empty",
        };
        f.write_str(text)
    }
}

/// What happened to one fenced block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BlockOutcome {
    /// Produced a change for `path`
    Matched { kind: BlockKind, path: String },
    /// Tool, delete or rename block with `entries` usable items
    Collected { kind: BlockKind, entries: usize },
    Skipped { kind: BlockKind, reason: SkipReason },
    Failed {
        kind: BlockKind,
        path: String,
        reason: String,
    },
}

/// A resolved rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTarget {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// The conflict-free set of operations derived from one input text.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// At most one change per path, ordered by path
    pub changes: Vec<FileChange>,
    pub file_actions: BTreeMap<PathBuf, FileAction>,
    pub dirs_to_create: BTreeSet<PathBuf>,
    /// Paths whose diffs could not be corrected or applied, in input order
    pub failed: Vec<PathBuf>,
    pub deletes: Vec<PathBuf>,
    pub renames: Vec<RenameTarget>,
    pub tools: Vec<String>,
    /// One entry per fenced block, in document order
    pub outcomes: Vec<BlockOutcome>,
}

impl ExecutionPlan {
    /// True when nothing would be written, renamed or deleted.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty() && self.renames.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Normalized allow-list (`.rs`, `.py`, ...); empty allows everything
    pub extensions: Vec<String>,
    pub match_mode: MatchMode,
}

impl PlanOptions {
    /// Diff-only mode: the filter is exactly `.diff`.
    pub fn diff_only(&self) -> bool {
        self.extensions.len() == 1 && self.extensions[0] == ".diff"
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lines of a file block: trailing newlines trimmed, empty block → no lines.
pub fn file_block_lines(content: &str) -> Vec<String> {
    let trimmed = content.trim_end_matches('\n');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('\n').map(str::to_string).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan Construction
// ─────────────────────────────────────────────────────────────────────────────

struct Planner<'a> {
    resolver: &'a PathResolver,
    options: &'a PlanOptions,
    outcomes: Vec<Option<BlockOutcome>>,
    failed: Vec<PathBuf>,
}

impl Planner<'_> {
    fn record(&mut self, index: usize, outcome: BlockOutcome) {
        self.outcomes[index] = Some(outcome);
    }

    fn fail(&mut self, index: usize, path: PathBuf, rel: &str, reason: String) {
        if !self.failed.contains(&path) {
            self.failed.push(path);
        }
        self.record(
            index,
            BlockOutcome::Failed {
                kind: BlockKind::Diff,
                path: rel.to_string(),
                reason,
            },
        );
    }

    fn collect_renames(&mut self, blocks: &[CodeBlock]) -> Vec<RenameTarget> {
        let mut renames = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            if block.kind() != BlockKind::Rename {
                continue;
            }
            let parsed = parse_rename_block(&block.content);
            let outcome = if parsed.is_empty() {
                BlockOutcome::Skipped {
                    kind: BlockKind::Rename,
                    reason: SkipReason::EmptyBody,
                }
            } else {
                BlockOutcome::Collected {
                    kind: BlockKind::Rename,
                    entries: parsed.len(),
                }
            };
            self.record(i, outcome);
            renames.extend(parsed.iter().map(|r| RenameTarget {
                from: self.resolver.resolve(&r.old_path),
                to: self.resolver.resolve(&r.new_path),
            }));
        }
        renames
    }

    fn collect_deletes(&mut self, blocks: &[CodeBlock]) -> Vec<PathBuf> {
        let mut deletes = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            if block.kind() != BlockKind::Delete {
                continue;
            }
            let parsed = parse_delete_block(&block.content);
            let outcome = if parsed.is_empty() {
                BlockOutcome::Skipped {
                    kind: BlockKind::Delete,
                    reason: SkipReason::EmptyBody,
                }
            } else {
                BlockOutcome::Collected {
                    kind: BlockKind::Delete,
                    entries: parsed.len(),
                }
            };
            self.record(i, outcome);
            deletes.extend(parsed.iter().map(|rel| self.resolver.resolve(rel)));
        }
        deletes
    }

    fn collect_tools(&mut self, blocks: &[CodeBlock]) -> Vec<String> {
        let mut tools = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            if block.kind() == BlockKind::Tool {
                self.record(
                    i,
                    BlockOutcome::Collected {
                        kind: BlockKind::Tool,
                        entries: 1,
                    },
                );
                tools.push(block.content.trim_end_matches('\n').to_string());
            }
        }
        tools
    }

    /// First pass: corrected and applied diffs. Repeated diffs for one path
    /// chain, each applying to the previous result; a failure drops the path.
    fn diff_changes(
        &mut self,
        blocks: &[CodeBlock],
        renames: &[RenameTarget],
    ) -> BTreeMap<PathBuf, FileChange> {
        let mut changes: BTreeMap<PathBuf, FileChange> = BTreeMap::new();
        let mut poisoned: BTreeSet<PathBuf> = BTreeSet::new();
        let diff_only = self.options.diff_only();

        for (i, block) in blocks.iter().enumerate() {
            if block.kind() != BlockKind::Diff {
                continue;
            }
            let Some(diff) = DiffBlock::from_code_block(block) else {
                self.record(
                    i,
                    BlockOutcome::Skipped {
                        kind: BlockKind::Diff,
                        reason: SkipReason::NoDiffPath,
                    },
                );
                continue;
            };
            if !diff_only && !has_allowed_extension(&diff.file_path, &self.options.extensions) {
                self.record(
                    i,
                    BlockOutcome::Skipped {
                        kind: BlockKind::Diff,
                        reason: SkipReason::ExtensionFiltered,
                    },
                );
                continue;
            }

            let path = self.resolver.resolve(&diff.file_path);
            if poisoned.contains(&path) {
                self.fail(i, path, &diff.file_path, "an earlier diff for this file failed".into());
                continue;
            }

            let source = match changes.get(&path) {
                Some(previous) => Some(previous.content.clone()),
                None => match read_source(&path, renames) {
                    Ok(source) => source,
                    Err(e) => {
                        poisoned.insert(path.clone());
                        self.fail(i, path, &diff.file_path, e.to_string());
                        continue;
                    }
                },
            };
            let source_lines: &[String] = source.as_deref().unwrap_or_default();

            let corrected = match correct_hunks(
                source_lines,
                &diff.raw_content,
                &diff.file_path,
                self.options.match_mode,
            ) {
                Ok(corrected) => corrected,
                Err(CorrectionError::NoHunks) => {
                    self.record(
                        i,
                        BlockOutcome::Skipped {
                            kind: BlockKind::Diff,
                            reason: SkipReason::NoHunks,
                        },
                    );
                    continue;
                }
                Err(e) => {
                    changes.remove(&path);
                    poisoned.insert(path.clone());
                    self.fail(i, path, &diff.file_path, e.to_string());
                    continue;
                }
            };

            match apply_patch(source.as_deref(), &corrected) {
                Ok(content) => {
                    self.record(
                        i,
                        BlockOutcome::Matched {
                            kind: BlockKind::Diff,
                            path: diff.file_path.clone(),
                        },
                    );
                    changes.insert(
                        path.clone(),
                        FileChange {
                            path,
                            content,
                            source: ChangeSource::Diff,
                            raw_block: block.raw(),
                        },
                    );
                }
                Err(e) => {
                    changes.remove(&path);
                    poisoned.insert(path.clone());
                    self.fail(i, path, &diff.file_path, e.to_string());
                }
            }
        }

        changes
    }

    /// Second pass: file blocks, later blocks winning over earlier ones.
    fn file_block_changes(&mut self, blocks: &[CodeBlock]) -> BTreeMap<PathBuf, FileChange> {
        let mut changes = BTreeMap::new();
        let diff_only = self.options.diff_only();

        for (i, block) in blocks.iter().enumerate() {
            if block.kind() != BlockKind::File {
                continue;
            }
            let skip = |reason| BlockOutcome::Skipped {
                kind: BlockKind::File,
                reason,
            };
            if diff_only {
                self.record(i, skip(SkipReason::DiffOnlyMode));
                continue;
            }
            let Some(rel) = extract_path(&block.hint) else {
                self.record(i, skip(SkipReason::NoPath));
                continue;
            };
            if !has_allowed_extension(&rel, &self.options.extensions) {
                self.record(i, skip(SkipReason::ExtensionFiltered));
                continue;
            }

            let path = self.resolver.resolve(&rel);
            changes.insert(
                path.clone(),
                FileChange {
                    path,
                    content: file_block_lines(&block.content),
                    source: ChangeSource::FileBlock,
                    raw_block: block.raw(),
                },
            );
            self.record(
                i,
                BlockOutcome::Matched {
                    kind: BlockKind::File,
                    path: rel,
                },
            );
        }

        changes
    }
}

/// Current lines of `path`. A path that a rename will create and that does
/// not exist yet is read from the rename's source instead.
fn read_source(path: &Path, renames: &[RenameTarget]) -> io::Result<Option<Vec<String>>> {
    let mut text = read_path(path)?;
    if text.is_none() {
        if let Some(rename) = renames.iter().find(|r| r.to.as_path() == path) {
            text = read_path(&rename.from)?;
        }
    }
    Ok(text.map(|t| t.lines().map(str::to_string).collect()))
}

/// Split renames into those that can run and the targets of those that
/// cannot: a target that already exists or is claimed by an earlier rename.
/// Refused renames are dropped so no change follows them.
fn accept_renames(
    renames: Vec<RenameTarget>,
) -> Result<(Vec<RenameTarget>, Vec<PathBuf>), PlanError> {
    let mut accepted: Vec<RenameTarget> = Vec::new();
    let mut refused = Vec::new();
    for rename in renames {
        let exists = rename.to.try_exists().map_err(|source| PlanError::Inspect {
            path: rename.to.clone(),
            source,
        })?;
        if exists || accepted.iter().any(|r| r.to == rename.to) {
            refused.push(rename.to);
        } else {
            accepted.push(rename);
        }
    }
    Ok((accepted, refused))
}

/// Build the execution plan for `text`.
pub fn create_plan(
    text: &str,
    resolver: &PathResolver,
    options: &PlanOptions,
) -> Result<ExecutionPlan, PlanError> {
    let blocks = extract_code_blocks(text);
    plan_blocks(&blocks, resolver, options)
}

/// Build the execution plan for already-extracted blocks.
pub fn plan_blocks(
    blocks: &[CodeBlock],
    resolver: &PathResolver,
    options: &PlanOptions,
) -> Result<ExecutionPlan, PlanError> {
    let mut planner = Planner {
        resolver,
        options,
        outcomes: vec![None; blocks.len()],
        failed: Vec::new(),
    };

    let (renames, refused) = accept_renames(planner.collect_renames(blocks))?;
    let deletes = planner.collect_deletes(blocks);
    let tools = planner.collect_tools(blocks);

    let mut merged = planner.diff_changes(blocks, &renames);
    for (path, change) in planner.file_block_changes(blocks) {
        merged.insert(path, change);
    }

    // Changes aimed at a file that is being renamed follow it to the new path
    for rename in &renames {
        if merged.contains_key(&rename.to) {
            continue;
        }
        if let Some(mut change) = merged.remove(&rename.from) {
            change.path = rename.to.clone();
            change.source = ChangeSource::Rename;
            merged.insert(rename.to.clone(), change);
        }
    }

    let rename_targets: BTreeSet<&Path> = renames.iter().map(|r| r.to.as_path()).collect();
    let (file_actions, mut dirs_to_create) = classify_targets(merged.keys(), &rename_targets)?;
    for rename in &renames {
        dirs_to_create.extend(inspect_parent(&rename.to)?);
    }

    let Planner {
        outcomes, failed, ..
    } = planner;
    let mut failed: Vec<PathBuf> = failed
        .into_iter()
        .filter(|path| {
            !merged
                .get(path)
                .is_some_and(|c| c.source == ChangeSource::FileBlock)
        })
        .collect();
    for path in refused {
        if !failed.contains(&path) {
            failed.push(path);
        }
    }

    Ok(ExecutionPlan {
        changes: merged.into_values().collect(),
        file_actions,
        dirs_to_create,
        failed,
        deletes,
        renames,
        tools,
        outcomes: outcomes.into_iter().flatten().collect(),
    })
}

/// Plan writes of content a caller already holds, keyed by hint path.
pub fn plan_contents(
    contents: &BTreeMap<String, String>,
    resolver: &PathResolver,
) -> Result<ExecutionPlan, PlanError> {
    let merged: BTreeMap<PathBuf, FileChange> = contents
        .iter()
        .map(|(rel, text)| {
            let path = resolver.resolve(rel);
            let change = FileChange {
                path: path.clone(),
                content: split_lines(text),
                source: ChangeSource::Library,
                raw_block: String::new(),
            };
            (path, change)
        })
        .collect();
    let (file_actions, dirs_to_create) = classify_targets(merged.keys(), &BTreeSet::new())?;

    Ok(ExecutionPlan {
        changes: merged.into_values().collect(),
        file_actions,
        dirs_to_create,
        ..Default::default()
    })
}

/// Create/modify per target plus the missing parents of created files. Rename
/// targets count as existing.
fn classify_targets<'a>(
    paths: impl IntoIterator<Item = &'a PathBuf>,
    rename_targets: &BTreeSet<&Path>,
) -> Result<(BTreeMap<PathBuf, FileAction>, BTreeSet<PathBuf>), PlanError> {
    let mut file_actions = BTreeMap::new();
    let mut dirs_to_create = BTreeSet::new();

    for path in paths {
        let exists = path.try_exists().map_err(|source| PlanError::Inspect {
            path: path.clone(),
            source,
        })?;
        let action = if exists || rename_targets.contains(path.as_path()) {
            FileAction::Modify
        } else {
            FileAction::Create
        };
        file_actions.insert(path.clone(), action);
        if action == FileAction::Create {
            dirs_to_create.extend(inspect_parent(path)?);
        }
    }

    Ok((file_actions, dirs_to_create))
}

fn inspect_parent(path: &Path) -> Result<Option<PathBuf>, PlanError> {
    missing_parent(path).map_err(|source| PlanError::Inspect {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, PathResolver) {
        let dir = tempdir().unwrap();
        let resolver = PathResolver::with_root(dir.path());
        (dir, resolver)
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    fn plan(text: &str, resolver: &PathResolver) -> ExecutionPlan {
        create_plan(text, resolver, &PlanOptions::default()).unwrap()
    }

    fn with_extensions(exts: &[&str]) -> PlanOptions {
        PlanOptions {
            extensions: crate::blocks::normalize_extensions(exts),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_block_lines() {
        assert_eq!(file_block_lines("x=1\n"), vec!["x=1"]);
        assert_eq!(file_block_lines("a\n\nb\n\n\n"), vec!["a", "", "b"]);
        assert!(file_block_lines("").is_empty());
        assert!(file_block_lines("\n\n").is_empty());
    }

    #[test]
    fn test_single_file_block_creates() {
        let (dir, resolver) = setup();
        let plan = plan("`src/a.py`\n```python\nx=1\n```\n", &resolver);

        let target = dir.path().join("src/a.py");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, target);
        assert_eq!(plan.changes[0].content, vec!["x=1"]);
        assert_eq!(plan.changes[0].source, ChangeSource::FileBlock);
        assert_eq!(plan.file_actions[&target], FileAction::Create);
        assert!(plan.dirs_to_create.contains(&dir.path().join("src")));
        assert!(plan.failed.is_empty());
    }

    #[test]
    fn test_existing_file_is_modify() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("a.txt"), "old\n").unwrap();
        let plan = plan("`a.txt`\n```\nnew\n```", &resolver);
        assert_eq!(plan.file_actions[&dir.path().join("a.txt")], FileAction::Modify);
        assert!(plan.dirs_to_create.is_empty());
    }

    #[test]
    fn test_diff_is_corrected_and_applied() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("f.txt"), numbered(20)).unwrap();
        let text = "```diff\n--- a/f.txt\n+++ b/f.txt\n@@ -1,3 +1,4 @@\n line 10\n line 11\n+inserted\n line 12\n```";
        let plan = plan(text, &resolver);

        assert_eq!(plan.changes.len(), 1);
        let content = &plan.changes[0].content;
        assert_eq!(content.len(), 21);
        assert_eq!(content[10], "line 11");
        assert_eq!(content[11], "inserted");
        assert_eq!(content[12], "line 12");
        assert_eq!(plan.changes[0].source, ChangeSource::Diff);
    }

    #[test]
    fn test_file_block_beats_diff_in_any_order() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let diff = "```diff\n+++ b/a.txt\n@@\n one\n-two\n+TWO\n```";
        let file = "`a.txt`\n```\nreplaced\n```";

        for text in [format!("{diff}\n{file}"), format!("{file}\n{diff}")] {
            let plan = plan(&text, &resolver);
            assert_eq!(plan.changes.len(), 1);
            assert_eq!(plan.changes[0].content, vec!["replaced"]);
            assert_eq!(plan.changes[0].source, ChangeSource::FileBlock);
        }
    }

    #[test]
    fn test_later_file_block_wins() {
        let (_dir, resolver) = setup();
        let plan = plan("`a.txt`\n```\nfirst\n```\n`a.txt`\n```\nsecond\n```", &resolver);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].content, vec!["second"]);
    }

    #[test]
    fn test_diff_only_mode() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("x.py"), "a = 1\n").unwrap();
        let text = "`main.go`\n```go\npackage main\n```\n```diff\n+++ b/x.py\n@@\n-a = 1\n+a = 2\n```";
        let plan = create_plan(text, &resolver, &with_extensions(&["diff"])).unwrap();

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, dir.path().join("x.py"));
        assert_eq!(plan.changes[0].content, vec!["a = 2"]);
        assert_eq!(
            plan.outcomes[0],
            BlockOutcome::Skipped {
                kind: BlockKind::File,
                reason: SkipReason::DiffOnlyMode,
            }
        );
    }

    #[test]
    fn test_extension_filter_applies_to_diffs() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("x.py"), "a = 1\n").unwrap();
        let text = "`a.rs`\n```rust\nfn a() {}\n```\n```diff\n+++ b/x.py\n@@\n-a = 1\n+a = 2\n```";
        let plan = create_plan(text, &resolver, &with_extensions(&["rs"])).unwrap();

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, dir.path().join("a.rs"));
        assert_eq!(
            plan.outcomes[1],
            BlockOutcome::Skipped {
                kind: BlockKind::Diff,
                reason: SkipReason::ExtensionFiltered,
            }
        );
    }

    #[test]
    fn test_failed_diff_does_not_stop_others() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("bad.txt"), "a\nb\n").unwrap();
        let text = "```diff\n+++ b/bad.txt\n@@\n missing context\n+x\n```\n`good.txt`\n```\nok\n```";
        let plan = plan(text, &resolver);

        assert_eq!(plan.failed, vec![dir.path().join("bad.txt")]);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, dir.path().join("good.txt"));
        assert!(matches!(
            &plan.outcomes[0],
            BlockOutcome::Failed { path, .. } if path == "bad.txt"
        ));
    }

    #[test]
    fn test_file_block_clears_failure_for_same_path() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        let text = "```diff\n+++ b/a.txt\n@@\n nope\n+x\n```\n`a.txt`\n```\nfull\n```";
        let plan = plan(text, &resolver);
        assert!(plan.failed.is_empty());
        assert_eq!(plan.changes[0].content, vec!["full"]);
    }

    #[test]
    fn test_repeated_diffs_chain() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("c.txt"), "a\nb\nc\n").unwrap();
        let text = "```diff\n+++ b/c.txt\n@@\n a\n-b\n+B\n```\n```diff\n+++ b/c.txt\n@@\n B\n-c\n+C\n```";
        let plan = plan(text, &resolver);
        assert_eq!(plan.changes[0].content, vec!["a", "B", "C"]);
    }

    #[test]
    fn test_diff_without_target_or_hunks_is_skipped() {
        let (_dir, resolver) = setup();
        let text = "```diff\n@@\n-a\n+b\n```\n```diff\n--- a/x\n+++ b/x\n```";
        let plan = plan(text, &resolver);
        assert!(plan.is_empty());
        assert!(plan.failed.is_empty());
        assert_eq!(
            plan.outcomes,
            vec![
                BlockOutcome::Skipped {
                    kind: BlockKind::Diff,
                    reason: SkipReason::NoDiffPath,
                },
                BlockOutcome::Skipped {
                    kind: BlockKind::Diff,
                    reason: SkipReason::NoHunks,
                },
            ]
        );
    }

    #[test]
    fn test_block_without_path_is_skipped() {
        let (_dir, resolver) = setup();
        let plan = plan("Here is some code:\n```rust\nfn main() {}\n```", &resolver);
        assert!(plan.changes.is_empty());
        assert_eq!(
            plan.outcomes,
            vec![BlockOutcome::Skipped {
                kind: BlockKind::File,
                reason: SkipReason::NoPath,
            }]
        );
    }

    #[test]
    fn test_delete_rename_and_tool_blocks() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("old.go"), "package old\n").unwrap();
        let text = "```rename\nold.go new/new.go\n```\n```delete\ngone.txt\n```\n```tool\n{\"cmd\": 1}\n```";
        let plan = plan(text, &resolver);

        assert_eq!(
            plan.renames,
            vec![RenameTarget {
                from: dir.path().join("old.go"),
                to: dir.path().join("new/new.go"),
            }]
        );
        assert_eq!(plan.deletes, vec![dir.path().join("gone.txt")]);
        assert_eq!(plan.tools, vec!["{\"cmd\": 1}"]);
        assert!(plan.dirs_to_create.contains(&dir.path().join("new")));
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_change_to_renamed_file_follows_it() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("old.txt"), "a\nb\n").unwrap();
        let text = "```rename\nold.txt new.txt\n```\n`old.txt`\n```\nrewritten\n```";
        let plan = plan(text, &resolver);

        let target = dir.path().join("new.txt");
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, target);
        assert_eq!(plan.changes[0].source, ChangeSource::Rename);
        assert_eq!(plan.file_actions[&target], FileAction::Modify);
    }

    #[test]
    fn test_diff_against_rename_target_reads_old_file() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("old.txt"), "a\nb\n").unwrap();
        let text = "```rename\nold.txt new.txt\n```\n```diff\n+++ b/new.txt\n@@\n a\n-b\n+c\n```";
        let plan = plan(text, &resolver);

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].content, vec!["a", "c"]);
        assert_eq!(plan.file_actions[&dir.path().join("new.txt")], FileAction::Modify);
    }

    #[test]
    fn test_rename_onto_existing_file_is_refused() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "precious\n").unwrap();
        let text = "```rename\na.txt b.txt\n```\n`a.txt`\n```\nnew a\n```";
        let plan = plan(text, &resolver);

        let source = dir.path().join("a.txt");
        assert!(plan.renames.is_empty());
        assert_eq!(plan.failed, vec![dir.path().join("b.txt")]);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, source);
        assert_eq!(plan.changes[0].source, ChangeSource::FileBlock);
        assert_eq!(plan.file_actions[&source], FileAction::Modify);
    }

    #[test]
    fn test_second_rename_to_same_target_is_refused() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        let plan = plan("```rename\na.txt c.txt\nb.txt c.txt\n```", &resolver);

        assert_eq!(plan.renames.len(), 1);
        assert_eq!(plan.renames[0].from, dir.path().join("a.txt"));
        assert_eq!(plan.failed, vec![dir.path().join("c.txt")]);
    }

    #[test]
    fn test_unreadable_diff_target_fails_that_file_only() {
        let (dir, resolver) = setup();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("latin1.txt"), [b'a', 0xE9, b'\n']).unwrap();
        let text = "```diff\n+++ b/pkg\n@@\n a\n+b\n```\n\
                    ```diff\n+++ b/latin1.txt\n@@\n a\n+b\n```\n\
                    `ok.txt`\n```\nfine\n```";
        let plan = plan(text, &resolver);

        assert_eq!(
            plan.failed,
            vec![dir.path().join("pkg"), dir.path().join("latin1.txt")]
        );
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, dir.path().join("ok.txt"));
        let failures = plan
            .outcomes
            .iter()
            .filter(|o| matches!(o, BlockOutcome::Failed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_plan_contents() {
        let (dir, resolver) = setup();
        fs::write(dir.path().join("keep.txt"), "old\n").unwrap();
        let contents = BTreeMap::from([
            ("keep.txt".to_string(), "new\n".to_string()),
            ("lib/fresh.txt".to_string(), "a\n\nb".to_string()),
        ]);
        let plan = plan_contents(&contents, &resolver).unwrap();

        assert_eq!(plan.changes.len(), 2);
        assert!(plan.changes.iter().all(|c| c.source == ChangeSource::Library));
        assert_eq!(plan.changes[0].content, vec!["new"]);
        assert_eq!(plan.changes[1].content, vec!["a", "", "b"]);
        assert_eq!(plan.file_actions[&dir.path().join("keep.txt")], FileAction::Modify);
        assert_eq!(plan.file_actions[&dir.path().join("lib/fresh.txt")], FileAction::Create);
        assert!(plan.dirs_to_create.contains(&dir.path().join("lib")));
    }
}
