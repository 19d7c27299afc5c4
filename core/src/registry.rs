use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Component, Path, PathBuf, MAIN_SEPARATOR},
};

use janitor_api::RecordKey;

/// Resolve `.` and `..` without touching the filesystem and drop trailing
/// separators.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A path in the single form used for every comparison in an audit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `self` equals `dir` or lives somewhere below it.
    pub fn is_within(&self, dir: &CanonicalPath) -> bool {
        if self.0 == dir.0 {
            return true;
        }
        if !self.0.starts_with(&dir.0) {
            return false;
        }
        dir.0.ends_with(MAIN_SEPARATOR) || self.0[dir.0.len()..].starts_with(MAIN_SEPARATOR)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps any spelling of a path to its [`CanonicalPath`].
///
/// Roots are walked at their symlink-resolved location while records may
/// name files through the configured spelling, so configured prefixes are
/// rewritten to the resolved ones before comparison.
#[derive(Debug)]
pub struct PathNormalizer {
    case_insensitive: bool,
    aliases: Vec<(PathBuf, PathBuf)>,
    roots: Vec<(String, CanonicalPath)>,
}

impl PathNormalizer {
    /// `roots` holds `(name, configured, resolved)` triples.
    pub fn new(case_insensitive: bool, roots: Vec<(String, PathBuf, PathBuf)>) -> Self {
        let mut normalizer = Self {
            case_insensitive,
            aliases: Vec::new(),
            roots: Vec::new(),
        };
        for (name, configured, resolved) in roots {
            let key = normalizer.normalize(&resolved);
            if configured != resolved {
                normalizer.aliases.push((configured, resolved));
            }
            normalizer.roots.push((name, key));
        }
        normalizer
    }

    pub fn normalize(&self, path: &Path) -> CanonicalPath {
        let mut p = lexical_normalize(path);
        for (configured, resolved) in &self.aliases {
            if let Ok(rest) = p.strip_prefix(configured) {
                p = if rest.as_os_str().is_empty() {
                    resolved.clone()
                } else {
                    resolved.join(rest)
                };
                break;
            }
        }
        let s = p.to_string_lossy().into_owned();
        if self.case_insensitive {
            CanonicalPath(s.to_lowercase())
        } else {
            CanonicalPath(s)
        }
    }

    /// Name of the managed root containing `path`, if any.
    pub fn root_of(&self, path: &CanonicalPath) -> Option<&str> {
        self.roots
            .iter()
            .find(|(_, root)| path.is_within(root))
            .map(|(name, _)| name.as_str())
    }

    /// True when `path` is one of the managed roots itself.
    pub fn is_root(&self, path: &CanonicalPath) -> bool {
        self.roots.iter().any(|(_, root)| root == path)
    }
}

/// The set of paths an audit must never classify as orphaned.
///
/// Built fresh for every run: paths referenced by live records, plus
/// explicitly protected files and trees.
#[derive(Debug, Default)]
pub struct PathRegistry {
    referenced: HashMap<CanonicalPath, Vec<RecordKey>>,
    protected_files: HashSet<CanonicalPath>,
    protected_trees: Vec<CanonicalPath>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `by` references `path`. Several records may share a path.
    pub fn reference(&mut self, path: CanonicalPath, by: RecordKey) {
        self.referenced.entry(path).or_default().push(by);
    }

    pub fn protect_file(&mut self, path: CanonicalPath) {
        self.protected_files.insert(path);
    }

    /// Protect a directory and everything below it.
    pub fn protect_tree(&mut self, dir: CanonicalPath) {
        self.protected_trees.push(dir);
    }

    pub fn is_referenced(&self, path: &CanonicalPath) -> bool {
        self.referenced.contains_key(path)
    }

    /// Referenced by a record or structurally protected.
    pub fn is_known(&self, path: &CanonicalPath) -> bool {
        self.is_referenced(path)
            || self.protected_files.contains(path)
            || self.protected_trees.iter().any(|t| path.is_within(t))
    }

    pub fn referrers(&self, path: &CanonicalPath) -> &[RecordKey] {
        self.referenced.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct referenced paths.
    pub fn len(&self) -> usize {
        self.referenced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.referenced.is_empty()
    }
}
