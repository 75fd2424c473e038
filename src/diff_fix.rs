//! Relocation of unified-diff hunks with untrustworthy line numbers.
//!
//! LLMs get hunk content right far more often than they get `@@` numbers
//! right. The corrector throws the numbers away and finds each hunk again by
//! searching the live file for the hunk's *target block* (its context and
//! removed lines). Hunks are located in order; each search starts one line
//! past the previous match, so the result is monotonic and non-overlapping.
//!
//! ```text
//! raw diff → hunks → target blocks → fold(search_floor) → rebuilt headers
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::blocks::{BlockKind, CodeBlock, CodeBlocks};
use crate::resolve::{self, PathResolver};

/// Default similarity threshold for fuzzy matching (80%)
pub const DEFAULT_SIMILARITY: f64 = 0.8;

/// Prefix of the line that names a diff's target file
const TARGET_MARKER: &str = "+++ b/";

/// How a target block is compared against the source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MatchMode {
    /// Every whitespace-normalized line must be equal; first window wins
    #[default]
    Exact,
    /// Best window by mean Levenshtein similarity, if it reaches `threshold`
    Fuzzy { threshold: f64 },
}

/// A diff block whose target path could be read from its `+++ b/` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBlock {
    pub file_path: String,
    pub raw_content: String,
}

impl DiffBlock {
    /// Build from a fenced block. Returns `None` when the block is not a diff
    /// or carries no `+++ b/<path>` marker.
    pub fn from_code_block(block: &CodeBlock) -> Option<Self> {
        if block.kind() != BlockKind::Diff {
            return None;
        }
        let raw_content = block.content.trim().to_string();
        let file_path = extract_path_from_diff(&raw_content)?;
        Some(Self {
            file_path,
            raw_content,
        })
    }
}

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("diff contains no hunks")]
    NoHunks,
    #[error("hunk {hunk} has no context or removed lines to locate it by")]
    EmptyTargetBlock { hunk: usize },
    #[error("could not find matching block for hunk {hunk}")]
    HunkNotFound { hunk: usize },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Find the target path in a raw diff (`+++ b/<path>`, up to whitespace).
pub fn extract_path_from_diff(raw: &str) -> Option<String> {
    raw.lines()
        .find_map(|line| line.strip_prefix(TARGET_MARKER))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

/// All diff blocks in `text` that name a target path.
pub fn extract_diff_blocks(text: &str) -> Vec<DiffBlock> {
    CodeBlocks::new(text)
        .filter_map(|block| DiffBlock::from_code_block(&block))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Hunks
// ─────────────────────────────────────────────────────────────────────────────

/// Body of one hunk: lines prefixed with ' ', '+' or '-'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub lines: Vec<String>,
}

impl Hunk {
    fn old_side(line: &str) -> Option<&str> {
        line.strip_prefix(' ').or_else(|| line.strip_prefix('-'))
    }

    /// Context and removed lines, prefix stripped, blank lines left out.
    pub fn target_block(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| Self::old_side(line))
            .filter(|content| !content.trim().is_empty())
            .collect()
    }

    /// Old-side lines that come before the first target line (blank context).
    fn leading_old_lines(&self) -> usize {
        self.lines
            .iter()
            .filter_map(|line| Self::old_side(line))
            .take_while(|content| content.trim().is_empty())
            .count()
    }

    /// (context, removed, added) line counts
    fn counts(&self) -> (usize, usize, usize) {
        let added = self.lines.iter().filter(|l| l.starts_with('+')).count();
        let removed = self.lines.iter().filter(|l| l.starts_with('-')).count();
        (self.lines.len() - added - removed, removed, added)
    }
}

/// Split a raw diff into hunks, discarding every `@@` header's numbers.
///
/// `---`/`+++` lines before the first header are file markers. After it, a
/// `---` line immediately followed by a `+++` line is also a marker pair; any
/// other `---...` line is a removal.
pub fn parse_hunks(raw: &str) -> Vec<Hunk> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut hunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut seen_header = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with("@@") {
            if !current.is_empty() {
                hunks.push(Hunk {
                    lines: std::mem::take(&mut current),
                });
            }
            seen_header = true;
            i += 1;
            continue;
        }

        let is_marker = if seen_header {
            line.starts_with("--- ")
                && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
        } else {
            line.starts_with("---") || line.starts_with("+++")
        };
        if is_marker {
            i += if seen_header { 2 } else { 1 };
            continue;
        }

        if line.starts_with([' ', '+', '-']) {
            current.push(line.to_string());
        }
        i += 1;
    }

    if !current.is_empty() {
        hunks.push(Hunk { lines: current });
    }
    hunks
}

/// A rebuilt `@@ -a,b +c,d @@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
}

impl HunkHeader {
    fn new(hunk: &Hunk, old_start: usize, line_delta: isize) -> Self {
        let (context, removed, added) = hunk.counts();
        let new_start = (old_start as isize + line_delta).max(0) as usize;
        Self {
            old_start,
            old_lines: context + removed,
            new_start,
            new_lines: context + added,
        }
    }

    fn line_delta(&self) -> isize {
        self.new_lines as isize - self.old_lines as isize
    }
}

impl fmt::Display for HunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Block Matching
// ─────────────────────────────────────────────────────────────────────────────

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Non-blank source lines, normalized, with their true 1-based line numbers.
struct FilteredSource {
    lines: Vec<String>,
    line_numbers: Vec<usize>,
}

impl FilteredSource {
    fn new<S: AsRef<str>>(source: &[S]) -> Self {
        let mut lines = Vec::new();
        let mut line_numbers = Vec::new();
        for (i, line) in source.iter().enumerate() {
            let normalized = normalize_line(line.as_ref());
            if !normalized.is_empty() {
                lines.push(normalized);
                line_numbers.push(i + 1);
            }
        }
        Self {
            lines,
            line_numbers,
        }
    }
}

/// Where a hunk landed and where the next search may begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    old_start: usize,
    next_floor: usize,
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Similarity in [0, 1]: one minus the normalized edit distance.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
}

/// Index into `source.lines` of the window matching `target`, searching from
/// `floor`.
fn match_block(
    source: &FilteredSource,
    target: &[String],
    floor: usize,
    mode: MatchMode,
) -> Option<usize> {
    let len = target.len();
    if len == 0 || source.lines.len() < len {
        return None;
    }
    let last = source.lines.len() - len;
    if floor > last {
        return None;
    }

    match mode {
        MatchMode::Exact => (floor..=last).find(|&i| source.lines[i..i + len] == *target),
        MatchMode::Fuzzy { threshold } => {
            let mut best: Option<(usize, f64)> = None;
            for i in floor..=last {
                let total: f64 = source.lines[i..i + len]
                    .iter()
                    .zip(target)
                    .map(|(s, t)| line_similarity(s, t))
                    .sum();
                let score = total / len as f64;
                if best.is_none_or(|(_, best_score)| score > best_score) {
                    best = Some((i, score));
                }
            }
            best.filter(|&(_, score)| score >= threshold)
                .map(|(i, _)| i)
        }
    }
}

/// Locate one hunk at or after `floor`. `index` is 1-based, for errors.
fn locate_hunk(
    source: &FilteredSource,
    hunk: &Hunk,
    index: usize,
    floor: usize,
    mode: MatchMode,
) -> Result<Placement, CorrectionError> {
    let target: Vec<String> = hunk
        .target_block()
        .into_iter()
        .map(normalize_line)
        .collect();
    if target.is_empty() {
        return Err(CorrectionError::EmptyTargetBlock { hunk: index });
    }

    let start = match_block(source, &target, floor, mode)
        .ok_or(CorrectionError::HunkNotFound { hunk: index })?;

    let matched_line = source.line_numbers[start];
    Ok(Placement {
        old_start: matched_line.saturating_sub(hunk.leading_old_lines()).max(1),
        next_floor: start + target.len(),
    })
}

/// Compute corrected headers for `hunks` against `source`, in order.
pub fn relocate_hunks<S: AsRef<str>>(
    source: &[S],
    hunks: &[Hunk],
    mode: MatchMode,
) -> Result<Vec<HunkHeader>, CorrectionError> {
    let filtered = FilteredSource::new(source);

    let (_, _, headers) = hunks.iter().enumerate().try_fold(
        (0usize, 0isize, Vec::with_capacity(hunks.len())),
        |(search_floor, line_delta, mut headers), (i, hunk)| {
            let placement = locate_hunk(&filtered, hunk, i + 1, search_floor, mode)?;
            let header = HunkHeader::new(hunk, placement.old_start, line_delta);
            let next_delta = line_delta + header.line_delta();
            headers.push(header);
            Ok::<_, CorrectionError>((placement.next_floor, next_delta, headers))
        },
    )?;

    Ok(headers)
}

/// Rewrite `raw_diff` so its hunk headers match `source`.
///
/// Fails as a whole if any hunk cannot be located; no partial diff is produced.
/// Hunk bodies are emitted verbatim.
pub fn correct_hunks<S: AsRef<str>>(
    source: &[S],
    raw_diff: &str,
    path: &str,
    mode: MatchMode,
) -> Result<String, CorrectionError> {
    let hunks = parse_hunks(raw_diff);
    if hunks.is_empty() {
        return Err(CorrectionError::NoHunks);
    }

    let headers = relocate_hunks(source, &hunks, mode)?;

    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for (hunk, header) in hunks.iter().zip(&headers) {
        out.push_str(&header.to_string());
        out.push('\n');
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Correct a diff block against the current content of its target file.
///
/// A missing file is corrected against an empty source.
pub fn correct_diff(
    diff: &DiffBlock,
    resolver: &PathResolver,
    mode: MatchMode,
) -> Result<String, CorrectionError> {
    let source = resolve::read_current(resolver, &diff.file_path).map_err(|source| {
        CorrectionError::Read {
            path: resolver.resolve(&diff.file_path),
            source,
        }
    })?;

    let lines: Vec<&str> = source.as_deref().map(|s| s.lines().collect()).unwrap_or_default();
    correct_hunks(&lines, &diff.raw_content, &diff.file_path, mode)
}
