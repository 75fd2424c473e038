//! Strict application of a corrected unified diff.
//!
//! Patching is delegated to `diffy`: every hunk must match the source text
//! exactly, otherwise the whole patch is rejected and the file is left alone.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("malformed diff: {0}")]
    Parse(String),
    #[error("patch does not apply: {0}")]
    Rejected(String),
}

/// Join lines back into file text, one trailing newline when non-empty.
pub fn render_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(line.as_ref());
        text.push('\n');
    }
    text
}

/// Split file text into lines, dropping a single trailing newline. Only the
/// empty text has no lines; `"\n"` is one blank line.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n').map(str::to_string).collect()
}

/// Apply `diff` to `source`. `None` stands for a file that does not exist yet
/// and patches against an empty text.
pub fn apply_patch(source: Option<&[String]>, diff: &str) -> Result<Vec<String>, PatchError> {
    let base = source.map(render_lines).unwrap_or_default();

    let patch = diffy::Patch::from_str(diff).map_err(|e| PatchError::Parse(e.to_string()))?;
    let patched = diffy::apply(&base, &patch).map_err(|e| PatchError::Rejected(e.to_string()))?;

    Ok(split_lines(&patched))
}
