//! Reference-scanning dependency discovery
//!
//! Starting from one or more entry points, text files are scanned for
//! references to other local files. Which references are recognized is
//! decided by pluggable [`ReferenceScanner`]s.

use super::{normalize, DependencyResolver, DependencySet, Resolution};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MAX_DEPTH: usize = 8;
const MAX_SCANNED_BYTES: u64 = 4 * 1024 * 1024;

static SHELL_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(?:source|\.)\s+["']?([^\s"';|&]+)"#).expect("Valid regex pattern")
});

static QUOTED_RELATIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["'](\.{1,2}/[^"'\s]+|[\w\-]+(?:/[\w\-.]+)*\.(?:sh|py|json|csv|txt|dat|cfg|ini|yml|yaml|cnf))["']"#)
        .expect("Valid regex pattern")
});

static PYTHON_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+(\.*[\w.]*)\s+import|import\s+([\w.]+(?:\s*,\s*[\w.]+)*))")
        .expect("Valid regex pattern")
});

/// A file referenced from a scanned file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Path relative to the referencing file's directory, or absolute
    pub path: PathBuf,
    /// A missing optional reference is ignored instead of warned about
    pub optional: bool,
}

/// Trait for reference-discovery rules
pub trait ReferenceScanner: Send + Sync + fmt::Debug {
    /// Whether this rule applies to `path`
    fn applies_to(&self, path: &Path) -> bool;

    /// References found in `content`
    fn scan(&self, content: &str) -> Vec<Reference>;
}

/// Regex rule whose first non-empty capture group names a file
#[derive(Clone)]
pub struct RegexRule {
    name: String,
    pattern: Regex,
    extensions: Vec<String>,
    optional: bool,
}

impl fmt::Debug for RegexRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl RegexRule {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::from_regex(name, Regex::new(pattern)?))
    }

    fn from_regex(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            pattern,
            extensions: Vec::new(),
            optional: false,
        }
    }

    /// Restrict the rule to files with these extensions
    pub fn for_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// `source file` and `. file` in shell scripts
    pub fn shell_source() -> Self {
        Self::from_regex("shell-source", SHELL_SOURCE.clone()).for_extensions(["sh", "bash"])
    }

    /// Quoted strings that look like relative file paths, in any file
    pub fn quoted_relative_paths() -> Self {
        Self::from_regex("quoted-path", QUOTED_RELATIVE_PATH.clone()).optional()
    }
}

impl ReferenceScanner for RegexRule {
    fn applies_to(&self, path: &Path) -> bool {
        self.extensions.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn scan(&self, content: &str) -> Vec<Reference> {
        self.pattern
            .captures_iter(content)
            .filter_map(|caps| caps.iter().skip(1).flatten().next())
            .map(|m| Reference {
                path: PathBuf::from(m.as_str()),
                optional: self.optional,
            })
            .collect()
    }
}

/// `import a.b` / `from a.b import c` resolved to `a/b.py` next to the script
#[derive(Debug, Clone, Default)]
pub struct PythonImportRule;

impl PythonImportRule {
    fn module_to_path(module: &str) -> Option<PathBuf> {
        let dots = module.chars().take_while(|c| *c == '.').count();
        let rest = &module[dots..];
        if rest.is_empty() {
            return None;
        }
        let mut path = PathBuf::new();
        for _ in 1..dots {
            path.push("..");
        }
        for segment in rest.split('.') {
            path.push(segment);
        }
        path.set_extension("py");
        Some(path)
    }
}

impl ReferenceScanner for PythonImportRule {
    fn applies_to(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("py")
    }

    fn scan(&self, content: &str) -> Vec<Reference> {
        let mut references = Vec::new();
        for caps in PYTHON_IMPORT.captures_iter(content) {
            let modules: Vec<&str> = match (caps.get(1), caps.get(2)) {
                (Some(from), _) => vec![from.as_str()],
                (None, Some(imports)) => imports.as_str().split(',').map(str::trim).collect(),
                (None, None) => Vec::new(),
            };
            // Standard-library and site-packages imports are indistinguishable
            // from local modules here, so every import is optional.
            references.extend(
                modules
                    .into_iter()
                    .filter_map(Self::module_to_path)
                    .map(|path| Reference {
                        path,
                        optional: true,
                    }),
            );
        }
        references
    }
}

/// Resolver that follows references from entry-point scripts
#[derive(Debug, Clone)]
pub struct AutomaticDependencyResolver {
    entry_points: Vec<PathBuf>,
    scanners: Vec<Arc<dyn ReferenceScanner>>,
    max_depth: usize,
}

impl AutomaticDependencyResolver {
    /// Resolver with the built-in rule set
    pub fn new<I, P>(entry_points: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entry_points: entry_points.into_iter().map(Into::into).collect(),
            scanners: vec![
                Arc::new(RegexRule::shell_source()),
                Arc::new(PythonImportRule),
                Arc::new(RegexRule::quoted_relative_paths()),
            ],
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Replace the rule set
    pub fn with_scanners(mut self, scanners: Vec<Arc<dyn ReferenceScanner>>) -> Self {
        self.scanners = scanners;
        self
    }

    pub fn with_scanner(mut self, scanner: impl ReferenceScanner + 'static) -> Self {
        self.scanners.push(Arc::new(scanner));
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn read_text(path: &Path) -> Option<String> {
        let metadata = std::fs::metadata(path).ok()?;
        if metadata.len() > MAX_SCANNED_BYTES {
            debug!("Not scanning {}: too large", path.display());
            return None;
        }
        let bytes = std::fs::read(path).ok()?;
        if bytes.contains(&0) {
            return None;
        }
        String::from_utf8(bytes).ok()
    }
}

impl DependencyResolver for AutomaticDependencyResolver {
    fn resolve(&self) -> Resolution {
        let mut files = DependencySet::new();
        let mut warnings = Vec::new();
        let mut queue = VecDeque::new();

        for entry in &self.entry_points {
            if entry.is_file() {
                if files.insert(entry) {
                    queue.push_back((normalize(entry), 0usize));
                }
            } else {
                warnings.push(format!("entry point {} not found", entry.display()));
            }
        }

        while let Some((file, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                continue;
            }
            let Some(content) = Self::read_text(&file) else {
                continue;
            };
            let base = file.parent().map(Path::to_path_buf).unwrap_or_default();

            for scanner in self.scanners.iter().filter(|s| s.applies_to(&file)) {
                for reference in scanner.scan(&content) {
                    let candidate = if reference.path.is_absolute() {
                        reference.path.clone()
                    } else {
                        base.join(&reference.path)
                    };
                    if files.contains(&candidate) {
                        continue;
                    }
                    if candidate.is_file() {
                        files.insert(&candidate);
                        queue.push_back((normalize(&candidate), depth + 1));
                    } else if !reference.optional {
                        warnings.push(format!(
                            "{} references {} which was not found",
                            file.display(),
                            reference.path.display()
                        ));
                    }
                }
            }
        }

        Resolution { files, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_follows_shell_sources_transitively() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "run.sh", "#!/bin/sh\nsource lib/common.sh\n./solve\n");
        write(dir.path(), "lib/common.sh", ". ./env.sh\n");
        write(dir.path(), "lib/env.sh", "export X=1\n");

        let resolution = AutomaticDependencyResolver::new([&entry]).resolve();
        assert_eq!(
            resolution.files.files(),
            &[
                normalize(&entry),
                normalize(&dir.path().join("lib/common.sh")),
                normalize(&dir.path().join("lib/env.sh")),
            ]
        );
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_missing_reference_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "run.sh", "source missing.sh\n");

        let resolution = AutomaticDependencyResolver::new([&entry]).resolve();
        assert_eq!(resolution.files.len(), 1);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("missing.sh"));
    }

    #[test]
    fn test_python_imports_resolve_local_modules_only() {
        let dir = TempDir::new().unwrap();
        let entry = write(
            dir.path(),
            "main.py",
            "import os, helpers\nfrom pkg.model import Net\nopen('data/input.csv')\n",
        );
        write(dir.path(), "helpers.py", "");
        write(dir.path(), "pkg/model.py", "");
        write(dir.path(), "data/input.csv", "1,2\n");

        let resolution = AutomaticDependencyResolver::new([&entry]).resolve();
        let names: Vec<_> = resolution
            .files
            .iter()
            .map(|p| p.strip_prefix(normalize(dir.path())).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("main.py"),
                PathBuf::from("helpers.py"),
                PathBuf::from("pkg/model.py"),
                PathBuf::from("data/input.csv"),
            ]
        );
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_missing_entry_point() {
        let resolution = AutomaticDependencyResolver::new(["/definitely/not/here.sh"]).resolve();
        assert!(resolution.files.is_empty());
        assert_eq!(resolution.warnings.len(), 1);
    }

    #[test]
    fn test_custom_rule_and_idempotence() {
        let dir = TempDir::new().unwrap();
        let entry = write(dir.path(), "job.cfg", "include = params.dat\n");
        write(dir.path(), "params.dat", "");

        let rule = RegexRule::new("include", r"include\s*=\s*(\S+)").unwrap();
        let resolver =
            AutomaticDependencyResolver::new([&entry]).with_scanners(vec![Arc::new(rule)]);
        let first = resolver.resolve();
        assert_eq!(first.files.len(), 2);
        assert_eq!(first, resolver.resolve());
    }

    #[test]
    fn test_binary_files_are_not_scanned() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("solver");
        std::fs::write(&entry, b"\x7fELF\0source x.sh").unwrap();

        let resolution = AutomaticDependencyResolver::new([&entry]).resolve();
        assert_eq!(resolution.files.len(), 1);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_module_to_path() {
        assert_eq!(
            PythonImportRule::module_to_path("a.b"),
            Some(PathBuf::from("a/b.py"))
        );
        assert_eq!(
            PythonImportRule::module_to_path("..util"),
            Some(PathBuf::from("../util.py"))
        );
        assert_eq!(PythonImportRule::module_to_path("."), None);
    }
}
