//! Dependency resolution
//!
//! A resolver enumerates the local files that must be uploaded before any
//! task runs. Resolvers only read the local filesystem; they never touch the
//! remote account, and calling [`DependencyResolver::resolve`] twice yields
//! the same result.

pub mod automatic;
pub mod manual;

pub use automatic::{AutomaticDependencyResolver, PythonImportRule, ReferenceScanner, RegexRule};
pub use manual::ManualDependencyResolver;

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Ordered, de-duplicated set of local file paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    files: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path; returns `false` if an equivalent path is already present
    pub fn insert(&mut self, path: impl AsRef<Path>) -> bool {
        let normalized = normalize(path.as_ref());
        if self.seen.contains(&normalized) {
            return false;
        }
        self.seen.insert(normalized.clone());
        self.files.push(normalized);
        true
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.seen.contains(&normalize(path.as_ref()))
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }
}

impl<P: AsRef<Path>> FromIterator<P> for DependencySet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = Self::new();
        for path in iter {
            set.insert(path);
        }
        set
    }
}

impl IntoIterator for DependencySet {
    type Item = PathBuf;
    type IntoIter = std::vec::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// Result of a resolution: the files found plus non-fatal problems
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub files: DependencySet,
    pub warnings: Vec<String>,
}

/// Trait for dependency resolvers
pub trait DependencyResolver: Send + Sync + fmt::Debug {
    /// Enumerate the files to upload
    fn resolve(&self) -> Resolution;
}

impl<R: DependencyResolver + ?Sized> DependencyResolver for Arc<R> {
    fn resolve(&self) -> Resolution {
        (**self).resolve()
    }
}

/// Lexically normalize a path: drop `.` segments and fold `..` where possible
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_collapses_equivalent_paths() {
        let mut set = DependencySet::new();
        assert!(set.insert("data/input.csv"));
        assert!(!set.insert("./data/input.csv"));
        assert!(!set.insert("data/tmp/../input.csv"));
        assert!(set.insert("data/other.csv"));
        assert_eq!(
            set.files(),
            &[PathBuf::from("data/input.csv"), PathBuf::from("data/other.csv")]
        );
    }

    #[test]
    fn test_normalize_keeps_leading_parent() {
        assert_eq!(normalize(Path::new("../a/./b")), PathBuf::from("../a/b"));
        assert_eq!(normalize(Path::new("./")), PathBuf::from("."));
    }
}
