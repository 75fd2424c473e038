//! Bodies of `delete` and `rename` blocks.

use serde::Serialize;

/// One `<old> <new>` line of a rename block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRename {
    pub old_path: String,
    pub new_path: String,
}

/// Each trimmed, non-blank line names a file to delete.
pub fn parse_delete_block(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Each line is `<old> <new>` separated by a single space. Lines with any
/// other shape are skipped.
pub fn parse_rename_block(body: &str) -> Vec<FileRename> {
    body.lines().filter_map(parse_rename_line).collect()
}

fn parse_rename_line(line: &str) -> Option<FileRename> {
    let line = line.trim();
    let mut parts = line.split(' ');
    let (old_path, new_path) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let valid = |p: &str| !p.is_empty() && !p.contains(char::is_whitespace);
    if !valid(old_path) || !valid(new_path) {
        return None;
    }
    Some(FileRename {
        old_path: old_path.to_string(),
        new_path: new_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delete_block() {
        let body = "  old.go\n\n   \nsrc/legacy.rs  \n";
        assert_eq!(parse_delete_block(body), vec!["old.go", "src/legacy.rs"]);
        assert!(parse_delete_block("").is_empty());
    }

    #[test]
    fn test_parse_rename_block() {
        let renames = parse_rename_block("old.go new.go\n");
        assert_eq!(
            renames,
            vec![FileRename {
                old_path: "old.go".into(),
                new_path: "new.go".into(),
            }]
        );
    }

    #[test]
    fn test_malformed_rename_lines_are_skipped() {
        let body = "a.rs b.rs\nonly-one\nthree parts here\ndouble  space.rs\n\nc.rs\td.rs\ne.rs f.rs";
        let renames = parse_rename_block(body);
        let pairs: Vec<_> = renames
            .iter()
            .map(|r| (r.old_path.as_str(), r.new_path.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a.rs", "b.rs"), ("e.rs", "f.rs")]);
    }
}
