//! Fenced code block extraction and hint path filtering.
//!
//! The scanner works line by line. A fence opens on a line of three or more
//! backticks (at most three spaces of indentation) and closes on the next line
//! holding only at least as many backticks, so a ```` ```` ```` outer fence
//! can carry a ```` ``` ```` block as plain content.

use std::path::Path;

/// Minimum number of backticks that make a fence
const MIN_FENCE_LEN: usize = 3;

/// Maximum indentation (in spaces) allowed before an opening fence
const MAX_FENCE_INDENT: usize = 3;

/// A fenced code block together with the paragraph that precedes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Trimmed text of the paragraph right above the fence (empty if none)
    pub hint: String,
    /// First word of the fence info string (e.g. "go", "diff")
    pub lang: String,
    /// Block body, every line terminated by `\n`
    pub content: String,
}

/// What a block asks for, decided by its language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// Full file content; the target comes from the hint
    File,
    /// Unified diff; the target comes from its `+++ b/` line
    Diff,
    /// Opaque tool invocation, printed verbatim
    Tool,
    /// List of paths to delete
    Delete,
    /// List of `<old> <new>` pairs
    Rename,
}

impl CodeBlock {
    pub fn kind(&self) -> BlockKind {
        match self.lang.as_str() {
            "diff" => BlockKind::Diff,
            "tool" => BlockKind::Tool,
            "delete" => BlockKind::Delete,
            "rename" => BlockKind::Rename,
            _ => BlockKind::File,
        }
    }

    /// Rebuild the fenced source of this block.
    ///
    /// The fence is made one backtick longer than any backtick run that starts
    /// a line of the content, so the result parses back to the same block.
    pub fn raw(&self) -> String {
        let longest_inner = self
            .content
            .lines()
            .map(|line| line.trim_start().chars().take_while(|&c| c == '`').count())
            .max()
            .unwrap_or(0);
        let fence = "`".repeat(MIN_FENCE_LEN.max(longest_inner + 1));
        format!("{fence}{}\n{}{fence}", self.lang, self.content)
    }
}

struct Fence<'a> {
    len: usize,
    info: &'a str,
}

fn parse_opening_fence(line: &str) -> Option<Fence<'_>> {
    let rest = line.trim_start_matches(' ');
    if line.len() - rest.len() > MAX_FENCE_INDENT {
        return None;
    }

    let len = rest.chars().take_while(|&c| c == '`').count();
    if len < MIN_FENCE_LEN {
        return None;
    }

    // Backticks in the info string mean this is inline code, not a fence
    let info = rest[len..].trim();
    if info.contains('`') {
        return None;
    }

    Some(Fence { len, info })
}

fn is_closing_fence(line: &str, open_len: usize) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= open_len && trimmed.chars().all(|c| c == '`')
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Iterator over the fenced code blocks of a document, in document order.
pub struct CodeBlocks<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    /// First line a hint may start on (just past the previous block)
    floor: usize,
}

impl<'a> CodeBlocks<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
            floor: 0,
        }
    }

    /// Paragraph ending right above `fence_idx`, allowing one blank line gap.
    fn hint_above(&self, fence_idx: usize) -> String {
        let mut end = fence_idx;
        if end > self.floor && is_blank(self.lines[end - 1]) {
            end -= 1;
        }

        let mut start = end;
        while start > self.floor && !is_blank(self.lines[start - 1]) {
            start -= 1;
        }

        if start == end {
            return String::new();
        }
        self.lines[start..end].join("\n").trim().to_string()
    }
}

impl Iterator for CodeBlocks<'_> {
    type Item = CodeBlock;

    fn next(&mut self) -> Option<CodeBlock> {
        while self.pos < self.lines.len() {
            let open_idx = self.pos;
            let Some(fence) = parse_opening_fence(self.lines[open_idx]) else {
                self.pos += 1;
                continue;
            };

            let close_idx = (open_idx + 1..self.lines.len())
                .find(|&i| is_closing_fence(self.lines[i], fence.len));
            let Some(close_idx) = close_idx else {
                // Unterminated: everything after the fence belongs to it
                self.pos = self.lines.len();
                return None;
            };

            let hint = self.hint_above(open_idx);
            let mut content = String::new();
            for line in &self.lines[open_idx + 1..close_idx] {
                content.push_str(line);
                content.push('\n');
            }
            let lang = fence
                .info
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();

            self.pos = close_idx + 1;
            self.floor = close_idx + 1;

            return Some(CodeBlock {
                hint,
                lang,
                content,
            });
        }
        None
    }
}

/// Extract all fenced code blocks from markdown text.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    CodeBlocks::new(text).collect()
}

/// Contents of every ```` ```tool ```` block, trailing newlines removed.
pub fn extract_tool_blocks(text: &str) -> Vec<String> {
    CodeBlocks::new(text)
        .filter(|block| block.kind() == BlockKind::Tool)
        .map(|block| block.content.trim_end_matches('\n').to_string())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Path and Extension Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Extract a file path from a hint such as "`src/main.rs`".
///
/// Only the first backtick span is considered, and it must not contain
/// whitespace. This keeps prose like "run `cargo test`" from becoming a path.
pub fn extract_path(hint: &str) -> Option<String> {
    let open = hint.find('`')?;
    let rest = &hint[open + 1..];
    let close = rest.find('`')?;

    let candidate = rest[..close].trim();
    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return None;
    }
    Some(candidate.to_string())
}

/// True if `extensions` is empty or contains the extension of `path`.
///
/// Extensions are compared with their leading dot (see [`normalize_extensions`]).
pub fn has_allowed_extension(path: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }

    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => extensions
            .iter()
            .any(|allowed| allowed.strip_prefix('.') == Some(ext)),
        None => false,
    }
}

/// Normalize user-supplied extensions so each starts with a dot.
pub fn normalize_extensions<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .map(|ext| ext.as_ref().trim())
        .filter(|ext| !ext.is_empty() && *ext != ".")
        .map(|ext| {
            if ext.starts_with('.') {
                ext.to_string()
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_with_hint() {
        let text = "`src/a.py`\n```python\nx=1\n```\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].hint, "`src/a.py`");
        assert_eq!(blocks[0].lang, "python");
        assert_eq!(blocks[0].content, "x=1\n");
        assert_eq!(blocks[0].kind(), BlockKind::File);
    }

    #[test]
    fn test_hint_allows_one_blank_line() {
        let text = "`a.go`\n\n```go\npackage main\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].hint, "`a.go`");
    }

    #[test]
    fn test_hint_not_captured_across_two_blank_lines() {
        let text = "`a.go`\n\n\n```go\npackage main\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].hint, "");
    }

    #[test]
    fn test_hint_is_whole_paragraph() {
        let text = "Intro line\nUpdate `b.rs` like so:\n```rust\nfn f() {}\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].hint, "Intro line\nUpdate `b.rs` like so:");
    }

    #[test]
    fn test_hint_does_not_reach_into_previous_block() {
        let text = "`a.txt`\n```\none\n```\n```\ntwo\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].hint, "`a.txt`");
        assert_eq!(blocks[1].hint, "");
    }

    #[test]
    fn test_multiple_blocks_in_document_order() {
        let text = "`one.rs`\n```rust\n1\n```\n\nprose\n\n`two.rs`\n```rust\n2\n```\n";
        let blocks = extract_code_blocks(text);
        let hints: Vec<_> = blocks.iter().map(|b| b.hint.as_str()).collect();
        assert_eq!(hints, vec!["`one.rs`", "`two.rs`"]);
    }

    #[test]
    fn test_unterminated_fence_is_dropped() {
        let text = "`a.rs`\n```rust\nfn main() {}\n";
        assert!(extract_code_blocks(text).is_empty());
    }

    #[test]
    fn test_nested_fence_with_longer_outer() {
        let text = "`README.md`\n````markdown\n# Title\n```sh\nmake\n```\n````\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lang, "markdown");
        assert_eq!(blocks[0].content, "# Title\n```sh\nmake\n```\n");
    }

    #[test]
    fn test_inline_code_is_not_a_fence() {
        let text = "```not a fence```\n`a.rs`\n```\nbody\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "body\n");
    }

    #[test]
    fn test_info_string_uses_first_word() {
        let text = "```diff title=\"x\"\n+a\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks[0].lang, "diff");
        assert_eq!(blocks[0].kind(), BlockKind::Diff);
    }

    #[test]
    fn test_empty_block() {
        let blocks = extract_code_blocks("`e.txt`\n```\n```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "");
    }

    #[test]
    fn test_crlf_input() {
        let blocks = extract_code_blocks("`a.txt`\r\n```\r\nline\r\n```\r\n");
        assert_eq!(blocks[0].content, "line\n");
    }

    #[test]
    fn test_kinds() {
        for (lang, kind) in [
            ("diff", BlockKind::Diff),
            ("tool", BlockKind::Tool),
            ("delete", BlockKind::Delete),
            ("rename", BlockKind::Rename),
            ("", BlockKind::File),
            ("rust", BlockKind::File),
        ] {
            let block = CodeBlock {
                hint: String::new(),
                lang: lang.to_string(),
                content: String::new(),
            };
            assert_eq!(block.kind(), kind, "lang {lang:?}");
        }
    }

    #[test]
    fn test_raw_reparses_to_same_block() {
        let block = CodeBlock {
            hint: String::new(),
            lang: "md".to_string(),
            content: "```sh\nls\n```\n".to_string(),
        };
        let raw = block.raw();
        assert!(raw.starts_with("````md\n"));
        let reparsed = extract_code_blocks(&raw);
        assert_eq!(reparsed, vec![block]);
    }

    #[test]
    fn test_extract_tool_blocks() {
        let text = "```tool\n{\"tool\": \"x\"}\n```\n`a.rs`\n```rust\nfn a() {}\n```\n```tool\nsecond\n```";
        assert_eq!(
            extract_tool_blocks(text),
            vec!["{\"tool\": \"x\"}".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_extract_path() {
        assert_eq!(extract_path("`src/main.rs`"), Some("src/main.rs".into()));
        assert_eq!(extract_path("File: `a/b.py`:"), Some("a/b.py".into()));
        assert_eq!(extract_path("`  padded.txt `"), Some("padded.txt".into()));
        assert_eq!(extract_path("`go run main.go`"), None);
        assert_eq!(extract_path("no backticks here"), None);
        assert_eq!(extract_path("`unclosed"), None);
        assert_eq!(extract_path("``"), None);
    }

    #[test]
    fn test_has_allowed_extension() {
        let exts = vec![".py".to_string(), ".rs".to_string()];
        assert!(has_allowed_extension("a/b.py", &exts));
        assert!(has_allowed_extension("lib.rs", &exts));
        assert!(!has_allowed_extension("main.go", &exts));
        assert!(!has_allowed_extension("Makefile", &exts));
        assert!(has_allowed_extension("Makefile", &[]));
    }

    #[test]
    fn test_normalize_extensions() {
        let raw = ["py", ".rs", " go ", "", "."];
        assert_eq!(
            normalize_extensions(&raw),
            vec![".py".to_string(), ".rs".to_string(), ".go".to_string()]
        );
    }
}
