//! The write side: something that can put planned content onto disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::patch::render_lines;
use crate::plan::FileChange;

/// Result of handing a batch of changes to an editor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub updated: Vec<PathBuf>,
    /// Path and error message for every change that could not be written
    pub failed: Vec<(PathBuf, String)>,
}

/// Applies file operations. Each call stands alone; a failure leaves other
/// files untouched.
pub trait Editor {
    fn write_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    fn remove_file(&mut self, path: &Path) -> io::Result<()>;

    fn rename_file(&mut self, from: &Path, to: &Path) -> io::Result<()>;

    fn create_dir(&mut self, path: &Path) -> io::Result<()>;

    fn write_file(&mut self, path: &Path, lines: &[String]) -> io::Result<()> {
        self.write_bytes(path, render_lines(lines).as_bytes())
    }

    /// Write every change in order, collecting successes and failures.
    fn apply_changes(&mut self, changes: &[FileChange]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for change in changes {
            match self.write_file(&change.path, &change.content) {
                Ok(()) => report.updated.push(change.path.clone()),
                Err(e) => report.failed.push((change.path.clone(), e.to_string())),
            }
        }
        report
    }
}

/// Writes straight to the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEditor;

impl Editor for FsEditor {
    fn write_bytes(&mut self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(path, bytes)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename_file(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ChangeSource;
    use tempfile::tempdir;

    fn change(path: PathBuf, lines: &[&str]) -> FileChange {
        FileChange {
            path,
            content: lines.iter().map(|s| s.to_string()).collect(),
            source: ChangeSource::Library,
            raw_block: String::new(),
        }
    }

    #[test]
    fn test_write_file_adds_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        FsEditor.write_file(&path, &["x".into(), "y".into()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\ny\n");

        FsEditor.write_file(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_apply_changes_reports_each_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blocker"), "file, not dir").unwrap();
        let good = dir.path().join("good.txt");
        let bad = dir.path().join("blocker").join("bad.txt");

        let report = FsEditor.apply_changes(&[change(bad.clone(), &["x"]), change(good.clone(), &["ok"])]);

        assert_eq!(report.updated, vec![good.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert_eq!(fs::read_to_string(good).unwrap(), "ok\n");
    }

    #[test]
    fn test_rename_and_remove() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, "x").unwrap();

        let mut editor = FsEditor;
        editor.rename_file(&from, &to).unwrap();
        assert!(!from.exists());
        editor.remove_file(&to).unwrap();
        assert!(!to.exists());
    }
}
