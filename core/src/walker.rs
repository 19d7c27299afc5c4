use std::{collections::HashMap, ops::ControlFlow, path::PathBuf};

use janitor_api::{FileSystem, PresentFile, WalkEntry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{config::AuditPolicy, error::AuditFailure, registry::CanonicalPath};

#[derive(Debug, Clone)]
pub struct PresentEntry {
    /// Index into the policy's managed roots.
    pub root: usize,
    pub file: PresentFile,
}

/// Files actually present under the managed roots.
#[derive(Debug, Default)]
pub struct FilesystemSnapshot {
    pub files: HashMap<CanonicalPath, PresentEntry>,
    /// Every directory seen below a root, roots themselves excluded.
    pub directories: Vec<PathBuf>,
    pub skipped: usize,
}

impl FilesystemSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|e| e.file.size).sum()
    }
}

/// Enumerates every regular file under each managed root.
pub struct FilesystemWalker<'a> {
    fs: &'a dyn FileSystem,
    policy: &'a AuditPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> FilesystemWalker<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        policy: &'a AuditPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self { fs, policy, cancel }
    }

    pub fn walk(&self) -> Result<FilesystemSnapshot, AuditFailure> {
        let normalizer = &self.policy.normalizer;
        let mut snapshot = FilesystemSnapshot::default();

        for (index, root) in self.policy.roots.iter().enumerate() {
            let root_key = normalizer.normalize(&root.path);
            let mut cancelled = false;
            let before = snapshot.files.len();

            self.fs.walk(&root.path, &mut |entry| {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    return ControlFlow::Break(());
                }
                match entry {
                    WalkEntry::File(file) => {
                        let key = normalizer.normalize(&file.path);
                        snapshot.files.insert(key, PresentEntry { root: index, file });
                    }
                    WalkEntry::Directory(dir) => {
                        if normalizer.normalize(&dir) != root_key {
                            snapshot.directories.push(dir);
                        }
                    }
                    WalkEntry::Symlink(path) => {
                        debug!(path = %path.display(), "not following symlink");
                    }
                    WalkEntry::Unreadable { path, reason } => {
                        warn!(path = %path.display(), %reason, "skipping unreadable entry");
                        snapshot.skipped += 1;
                    }
                }
                ControlFlow::Continue(())
            })?;

            if cancelled {
                return Err(AuditFailure::Cancelled);
            }
            debug!(
                root = %root.name,
                files = snapshot.files.len() - before,
                "walked managed root"
            );
        }

        Ok(snapshot)
    }
}
