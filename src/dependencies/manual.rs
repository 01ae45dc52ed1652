//! Caller-maintained dependency list

use super::{DependencyResolver, DependencySet, Resolution};
use std::path::{Path, PathBuf};

/// Resolver that returns exactly the paths it was given, in insertion order
#[derive(Debug, Clone, Default)]
pub struct ManualDependencyResolver {
    files: DependencySet,
}

impl ManualDependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path; duplicates are collapsed
    pub fn add(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.files.insert(path);
        self
    }

    pub fn with(mut self, path: impl AsRef<Path>) -> Self {
        self.files.insert(path);
        self
    }

    pub fn with_all<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.files.insert(path);
        }
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }
}

impl DependencyResolver for ManualDependencyResolver {
    fn resolve(&self) -> Resolution {
        Resolution {
            files: self.files.clone(),
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = ManualDependencyResolver::new()
            .with("bin/solver")
            .with("data/a.cnf")
            .with("data/b.cnf");
        let first = resolver.resolve();
        let second = resolver.resolve();
        assert_eq!(first, second);
        assert_eq!(
            first.files.files(),
            &[
                PathBuf::from("bin/solver"),
                PathBuf::from("data/a.cnf"),
                PathBuf::from("data/b.cnf")
            ]
        );
    }

    #[test]
    fn test_duplicate_paths_yield_one_entry() {
        let mut resolver = ManualDependencyResolver::new();
        resolver.add("data/a.cnf").add("data/a.cnf").add("./data/a.cnf");
        assert_eq!(resolver.resolve().files.len(), 1);
    }

    #[test]
    fn test_empty_resolver() {
        let resolution = ManualDependencyResolver::new().resolve();
        assert!(resolution.files.is_empty());
        assert!(resolution.warnings.is_empty());
    }
}
