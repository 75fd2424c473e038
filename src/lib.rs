//! # itf
//!
//! Turns LLM-generated markdown into file changes on a local project.
//!
//! ## Overview
//!
//! The input is free-form markdown as it comes out of a chat window. Fenced
//! code blocks carry the payload, and the paragraph right above each fence
//! (the *hint*) names the target file in backticks:
//!
//! ````text
//! `src/app.py`
//! ```python
//! print("hello")
//! ```
//! ````
//!
//! ## Key Components
//!
//! - **Block Extraction** ([`blocks`]): a line scanner that yields fenced
//!   blocks with their hint and language tag, plus the path/extension filter.
//! - **Diff Correction** ([`diff_fix`]): relocates unified-diff hunks whose
//!   line numbers are stale, using only the hunk's context and removed lines.
//! - **Patch Application** ([`patch`]): applies a corrected diff strictly.
//! - **Planning** ([`plan`]): merges full-file blocks and diffs into one
//!   conflict-free [`plan::ExecutionPlan`].
//! - **Delete/Rename Blocks** ([`ops`]).
//! - **Collaborators**: [`resolve`] (lookup roots), [`editor`] (writes the
//!   plan), [`history`] (undo/redo log) and [`app`] (orchestration).
//!
//! ## Algorithm Flow
//!
//! ```text
//! Input → Block Extraction → file blocks ─────────────────────┐
//!                          → diff blocks → Correction → Patch ─┤→ Plan → Editor → History
//!                          → delete/rename/tool blocks ────────┘
//! ```

#![forbid(unsafe_code)]

pub mod app;
pub mod blocks;
pub mod diff_fix;
pub mod editor;
pub mod history;
pub mod ops;
pub mod patch;
pub mod plan;
pub mod resolve;

pub use app::{App, AppConfig, Summary};
pub use blocks::{
    BlockKind, CodeBlock, extract_code_blocks, extract_path, extract_tool_blocks,
    has_allowed_extension, normalize_extensions,
};
pub use diff_fix::{
    CorrectionError, DiffBlock, MatchMode, correct_diff, correct_hunks, extract_diff_blocks,
};
pub use plan::{BlockOutcome, ChangeSource, ExecutionPlan, FileChange, PlanOptions, create_plan};
pub use resolve::{FileAction, PathResolver};
