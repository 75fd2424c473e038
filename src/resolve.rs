//! Mapping of hint paths onto lookup roots, and filesystem classification.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Resolves relative hint paths against one or more lookup roots.
///
/// A path that already exists under some root resolves there; anything else
/// lands under the first root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: Vec<PathBuf>,
}

impl PathResolver {
    /// Build from lookup directories; an empty list means the current directory.
    pub fn new(lookup_dirs: &[PathBuf]) -> io::Result<Self> {
        let roots = if lookup_dirs.is_empty() {
            vec![std::env::current_dir()?]
        } else {
            lookup_dirs
                .iter()
                .map(std::path::absolute)
                .collect::<io::Result<Vec<_>>>()?
        };
        Ok(Self { roots })
    }

    /// A resolver with a single root, used as-is.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The first root containing `rel`, if any.
    pub fn resolve_existing(&self, rel: &str) -> Option<PathBuf> {
        if Path::new(rel).is_absolute() {
            let path = PathBuf::from(rel);
            return path.exists().then_some(path);
        }
        self.roots
            .iter()
            .map(|root| root.join(rel))
            .find(|candidate| candidate.exists())
    }

    /// Where `rel` lives or should be created.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        if let Some(existing) = self.resolve_existing(rel) {
            return existing;
        }
        match self.roots.first() {
            Some(root) => root.join(rel),
            None => PathBuf::from(rel),
        }
    }
}

/// Whether a planned write creates a new file or overwrites an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Modify,
}

/// Current content of `rel`, or `None` when it does not exist anywhere.
pub fn read_current(resolver: &PathResolver, rel: &str) -> io::Result<Option<String>> {
    read_path(&resolver.resolve(rel))
}

/// Read `path`, mapping not-found to `None`.
pub fn read_path(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// The parent directory of `path` when it does not exist yet.
pub fn missing_parent(path: &Path) -> io::Result<Option<PathBuf>> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.try_exists()? => {
            Ok(Some(parent.to_path_buf()))
        }
        _ => Ok(None),
    }
}

/// Create every directory in `dirs` (with intermediate components).
pub fn create_missing_dirs<'a, I>(dirs: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for dir in dirs {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// `path` relative to `base` when it lies underneath, otherwise unchanged.
pub fn relativize(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
