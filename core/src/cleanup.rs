use std::{cmp::Reverse, path::PathBuf};

use janitor_api::{
    CleanupResult, FailedRemoval, FileSystem, LastCleaningMetadata, OrphanFile, SettingsStore,
};
use tracing::{debug, error, info, warn};

use crate::{config::AuditPolicy, registry::PathRegistry};

/// Deletes confirmed orphan files and records the completed pass.
pub struct CleanupExecutor<'a> {
    fs: &'a dyn FileSystem,
    settings: &'a dyn SettingsStore,
    policy: &'a AuditPolicy,
    app_version: &'a str,
}

impl<'a> CleanupExecutor<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        settings: &'a dyn SettingsStore,
        policy: &'a AuditPolicy,
        app_version: &'a str,
    ) -> Self {
        Self {
            fs,
            settings,
            policy,
            app_version,
        }
    }

    /// Delete every orphan when `should_delete` is set. Returns `None` for
    /// audit-only runs, which never touch the disk or the bookkeeping.
    ///
    /// A failed removal is logged and counted; the remaining orphans are still
    /// processed and the bookkeeping is still written.
    pub fn execute(
        &self,
        orphans: &[OrphanFile],
        directories: &[PathBuf],
        registry: &PathRegistry,
        should_delete: bool,
        now_unix: i64,
    ) -> Option<CleanupResult> {
        if !should_delete {
            debug!(orphans = orphans.len(), "audit only, leaving orphans in place");
            return None;
        }

        let normalizer = &self.policy.normalizer;
        let mut result = CleanupResult::default();
        for orphan in orphans {
            let key = normalizer.normalize(&orphan.path);
            if normalizer.root_of(&key).is_none() {
                error!(path = %orphan.path.display(), "refusing to delete outside managed roots");
                result.failed.push(FailedRemoval {
                    path: orphan.path.clone(),
                    reason: "outside managed roots".into(),
                });
                continue;
            }
            match self.fs.remove_file(&orphan.path) {
                Ok(()) => {
                    debug!(
                        path = %orphan.path.display(),
                        size = orphan.size,
                        "removed orphan file"
                    );
                    result.removed_files += 1;
                    result.removed_bytes += orphan.size;
                }
                Err(err) if err.is_not_found() => {
                    debug!(path = %orphan.path.display(), "orphan already gone");
                    result.already_gone += 1;
                }
                Err(err) => {
                    warn!(
                        path = %orphan.path.display(),
                        error = %err,
                        "failed to remove orphan file"
                    );
                    result.failed.push(FailedRemoval {
                        path: orphan.path.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if self.policy.prune_empty_dirs {
            result.pruned_dirs = self.prune_empty_dirs(directories, registry);
        }

        let meta = LastCleaningMetadata {
            version: self.app_version.to_string(),
            cleaned_at: now_unix,
        };
        match self.settings.set_last_cleaning(&meta) {
            Ok(()) => result.metadata_updated = true,
            Err(err) => warn!(error = %err, "could not record last cleaning"),
        }

        info!(
            removed = result.removed_files,
            bytes = result.removed_bytes,
            failed = result.failed.len(),
            already_gone = result.already_gone,
            pruned_dirs = result.pruned_dirs,
            "orphan cleanup finished"
        );
        Some(result)
    }

    /// Remove empty directories deepest first. Roots and protected trees stay.
    fn prune_empty_dirs(&self, directories: &[PathBuf], registry: &PathRegistry) -> usize {
        let normalizer = &self.policy.normalizer;
        let mut dirs: Vec<&PathBuf> = directories.iter().collect();
        dirs.sort_by_key(|d| Reverse(d.components().count()));

        let mut pruned = 0;
        for dir in dirs {
            let key = normalizer.normalize(dir);
            if normalizer.is_root(&key)
                || normalizer.root_of(&key).is_none()
                || registry.is_known(&key)
            {
                continue;
            }
            match self.fs.remove_empty_dir(dir) {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "failed to prune empty directory")
                }
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AuditConfig, RootConfig},
        services::{JsonSettingsStore, LocalFileSystem},
    };
    use std::{fs, path::Path, time::SystemTime};

    fn orphan(path: &Path) -> OrphanFile {
        OrphanFile {
            path: path.to_path_buf(),
            root: "files".into(),
            size: 4,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn refuses_paths_outside_roots_and_prunes_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("files");
        let nested = root.join("ab");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("blob"), b"data").unwrap();
        let outside = tmp.path().join("outside");
        fs::write(&outside, b"data").unwrap();

        let policy = AuditConfig {
            roots: vec![RootConfig {
                name: "files".into(),
                path: root.clone(),
            }],
            prune_empty_dirs: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let settings = JsonSettingsStore::open(tmp.path().join("settings.json")).unwrap();
        let executor = CleanupExecutor::new(&LocalFileSystem, &settings, &policy, "9.9");

        let result = executor
            .execute(
                &[orphan(&nested.join("blob")), orphan(&outside)],
                &[nested.clone()],
                &PathRegistry::new(),
                true,
                1_700_000_000,
            )
            .unwrap();

        assert_eq!(result.removed_files, 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].path, outside);
        assert_eq!(result.pruned_dirs, 1);
        assert!(result.metadata_updated);
        assert!(outside.exists());
        assert!(!nested.exists());
        assert!(root.exists());
        assert_eq!(settings.last_cleaning().unwrap().unwrap().version, "9.9");
    }

    #[test]
    fn audit_only_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("files");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("blob"), b"data").unwrap();
        let policy = AuditConfig {
            roots: vec![RootConfig {
                name: "files".into(),
                path: root.clone(),
            }],
            ..Default::default()
        }
        .validate()
        .unwrap();
        let settings = JsonSettingsStore::open(tmp.path().join("settings.json")).unwrap();
        let executor = CleanupExecutor::new(&LocalFileSystem, &settings, &policy, "9.9");

        let result = executor.execute(
            &[orphan(&root.join("blob"))],
            &[],
            &PathRegistry::new(),
            false,
            0,
        );
        assert!(result.is_none());
        assert!(root.join("blob").exists());
        assert_eq!(settings.last_cleaning().unwrap(), None);
    }
}
