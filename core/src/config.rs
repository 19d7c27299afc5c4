use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{lexical_normalize, PathNormalizer};

/// Default minimum age before an unreferenced file may be classified as orphaned.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10 * 60;

/// File names that belong to in-flight operations and are never orphans.
pub const DEFAULT_TRANSIENT_PATTERNS: &[&str] =
    &["*.lock", "*.partial", "*.download", "*.incomplete", ".DS_Store"];

/// A directory the audit is allowed to scan and delete within.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootConfig {
    pub name: String,
    pub path: PathBuf,
}

/// How much detail the finished report keeps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportDetail {
    /// Counts plus the full orphan lists.
    #[default]
    Full,
    /// Counts only.
    Summary,
}

/// Audit policy as written in configuration, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub roots: Vec<RootConfig>,
    pub grace_period_secs: u64,
    pub transient_patterns: Vec<String>,
    /// Files or whole trees that are never orphans.
    pub protected_paths: Vec<PathBuf>,
    pub case_insensitive: bool,
    pub prune_empty_dirs: bool,
    pub report_detail: ReportDetail,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            transient_patterns: DEFAULT_TRANSIENT_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            protected_paths: Vec::new(),
            case_insensitive: cfg!(any(target_os = "macos", target_os = "windows")),
            prune_empty_dirs: false,
            report_detail: ReportDetail::Full,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no managed roots configured")]
    NoRoots,
    #[error("managed root name {0:?} is used twice")]
    DuplicateName(String),
    #[error("managed root {name} at {} does not exist", path.display())]
    MissingRoot { name: String, path: PathBuf },
    #[error("managed root {name} at {} is not a directory", path.display())]
    NotADirectory { name: String, path: PathBuf },
    #[error("managed root {name} must be an absolute path, got {}", path.display())]
    RelativeRoot { name: String, path: PathBuf },
    #[error("managed roots {outer} and {inner} overlap")]
    Overlapping { outer: String, inner: String },
    #[error("invalid transient pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated managed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRoot {
    pub name: String,
    /// The path as configured, lexically normalized.
    pub configured: PathBuf,
    /// The path with symlinks resolved. Walks start here.
    pub path: PathBuf,
}

/// Audit policy after validation; shared read-only by every stage of a run.
#[derive(Debug)]
pub struct AuditPolicy {
    pub roots: Vec<ManagedRoot>,
    pub grace_period: Duration,
    pub transient_patterns: Vec<Pattern>,
    pub protected_paths: Vec<PathBuf>,
    pub prune_empty_dirs: bool,
    pub report_detail: ReportDetail,
    pub normalizer: PathNormalizer,
}

impl AuditConfig {
    /// Read a TOML policy file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading audit config {}", path.display()))?;
        toml::from_str(&text).context("invalid audit config")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Check every root exists and that no two roots nest, so a file belongs
    /// to exactly one of them.
    pub fn validate(&self) -> Result<Arc<AuditPolicy>, ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }

        let mut roots: Vec<ManagedRoot> = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if roots.iter().any(|r| r.name == root.name) {
                return Err(ConfigError::DuplicateName(root.name.clone()));
            }
            if !root.path.is_absolute() {
                return Err(ConfigError::RelativeRoot {
                    name: root.name.clone(),
                    path: root.path.clone(),
                });
            }
            let meta = match fs::metadata(&root.path) {
                Ok(meta) => meta,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ConfigError::MissingRoot {
                        name: root.name.clone(),
                        path: root.path.clone(),
                    })
                }
                Err(source) => {
                    return Err(ConfigError::Io {
                        path: root.path.clone(),
                        source,
                    })
                }
            };
            if !meta.is_dir() {
                return Err(ConfigError::NotADirectory {
                    name: root.name.clone(),
                    path: root.path.clone(),
                });
            }
            let canonical = fs::canonicalize(&root.path).map_err(|source| ConfigError::Io {
                path: root.path.clone(),
                source,
            })?;
            roots.push(ManagedRoot {
                name: root.name.clone(),
                configured: lexical_normalize(&root.path),
                path: canonical,
            });
        }

        if let Some((outer, inner)) = first_overlap(&roots) {
            return Err(ConfigError::Overlapping { outer, inner });
        }

        let transient_patterns = self
            .transient_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let normalizer = PathNormalizer::new(
            self.case_insensitive,
            roots
                .iter()
                .map(|r| (r.name.clone(), r.configured.clone(), r.path.clone()))
                .collect(),
        );

        Ok(Arc::new(AuditPolicy {
            roots,
            grace_period: self.grace_period(),
            transient_patterns,
            protected_paths: self.protected_paths.clone(),
            prune_empty_dirs: self.prune_empty_dirs,
            report_detail: self.report_detail,
            normalizer,
        }))
    }
}

/// Return the names of the first pair of roots where one contains the other.
fn first_overlap(roots: &[ManagedRoot]) -> Option<(String, String)> {
    for (i, a) in roots.iter().enumerate() {
        for b in roots.iter().skip(i + 1) {
            if b.path.starts_with(&a.path) {
                return Some((a.name.clone(), b.name.clone()));
            }
            if a.path.starts_with(&b.path) {
                return Some((b.name.clone(), a.name.clone()));
            }
        }
    }
    None
}

impl AuditPolicy {
    /// Whether a file name matches the transient allowlist.
    pub fn is_transient(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.transient_patterns.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(roots: Vec<RootConfig>) -> AuditConfig {
        AuditConfig {
            roots,
            ..Default::default()
        }
    }

    #[test]
    fn validates_distinct_roots() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("files")).unwrap();
        fs::create_dir_all(tmp.path().join("tmp")).unwrap();
        let cfg = config_with(vec![
            RootConfig {
                name: "files".into(),
                path: tmp.path().join("files"),
            },
            RootConfig {
                name: "tmp".into(),
                path: tmp.path().join("tmp"),
            },
        ]);
        let policy = cfg.validate().unwrap();
        assert_eq!(policy.roots.len(), 2);
        assert_eq!(policy.grace_period, Duration::from_secs(600));
        assert!(policy.is_transient(Path::new("/x/upload.partial")));
        assert!(!policy.is_transient(Path::new("/x/photo.jpg")));
    }

    #[test]
    fn rejects_nested_roots() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("files/cache")).unwrap();
        let cfg = config_with(vec![
            RootConfig {
                name: "files".into(),
                path: tmp.path().join("files"),
            },
            RootConfig {
                name: "cache".into(),
                path: tmp.path().join("files/cache"),
            },
        ]);
        match cfg.validate() {
            Err(ConfigError::Overlapping { outer, inner }) => {
                assert_eq!(outer, "files");
                assert_eq!(inner, "cache");
            }
            other => panic!("expected overlap error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_and_empty_roots() {
        assert!(matches!(
            config_with(vec![]).validate(),
            Err(ConfigError::NoRoots)
        ));
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_with(vec![RootConfig {
            name: "gone".into(),
            path: tmp.path().join("gone"),
        }]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingRoot { .. })
        ));
    }

    #[test]
    fn rejects_file_as_root_and_bad_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        let cfg = config_with(vec![RootConfig {
            name: "plain".into(),
            path: file,
        }]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotADirectory { .. })
        ));

        let cfg = AuditConfig {
            roots: vec![RootConfig {
                name: "root".into(),
                path: tmp.path().to_path_buf(),
            }],
            transient_patterns: vec!["[".into()],
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn toml_missing_keys_use_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.toml");
        fs::write(
            &path,
            "grace_period_secs = 120\n[[roots]]\nname = \"files\"\npath = \"/srv/files\"\n",
        )
        .unwrap();
        let cfg = AuditConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.grace_period(), Duration::from_secs(120));
        assert_eq!(cfg.roots[0].name, "files");
        assert_eq!(cfg.transient_patterns.len(), DEFAULT_TRANSIENT_PATTERNS.len());
        assert_eq!(cfg.report_detail, ReportDetail::Full);
    }
}
