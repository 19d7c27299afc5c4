use std::{collections::HashSet, time::SystemTime};

use janitor_api::{OrphanFile, OrphanRecord};

use crate::{config::AuditPolicy, registry::PathRegistry, walker::FilesystemSnapshot};

/// Classified orphans of one audit.
#[derive(Debug, Default)]
pub struct OrphanSet {
    pub files: Vec<OrphanFile>,
    pub records: Vec<OrphanRecord>,
    pub reclaimable_bytes: u64,
    /// Unreferenced files spared because they are younger than the grace period.
    pub within_grace: usize,
    /// Unreferenced files spared because their name is on the transient list.
    pub transient: usize,
}

/// Compare the referenced set against the present set.
///
/// A present file is an orphan when nothing references or protects it, it is
/// not transient by name, and its mtime is at least one grace period before
/// `now`. A missing-file candidate from the record walk is only confirmed when
/// the filesystem walk did not see the file either.
pub fn compute_orphans(
    policy: &AuditPolicy,
    registry: &PathRegistry,
    snapshot: &FilesystemSnapshot,
    missing: &[OrphanRecord],
    now: SystemTime,
) -> OrphanSet {
    let mut set = OrphanSet::default();
    let cutoff = now.checked_sub(policy.grace_period);

    for (key, entry) in &snapshot.files {
        if registry.is_known(key) {
            continue;
        }
        if policy.is_transient(&entry.file.path) {
            set.transient += 1;
            continue;
        }
        let old_enough = cutoff.is_some_and(|c| entry.file.modified <= c);
        if !old_enough {
            set.within_grace += 1;
            continue;
        }
        let root = policy
            .roots
            .get(entry.root)
            .map(|r| r.name.clone())
            .unwrap_or_default();
        set.reclaimable_bytes += entry.file.size;
        set.files.push(OrphanFile {
            path: entry.file.path.clone(),
            root,
            size: entry.file.size,
            modified: entry.file.modified,
        });
    }
    set.files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen = HashSet::new();
    for candidate in missing {
        let key = policy.normalizer.normalize(&candidate.path);
        if snapshot.files.contains_key(&key) {
            continue;
        }
        if seen.insert((candidate.key.clone(), key)) {
            set.records.push(candidate.clone());
        }
    }
    set.records
        .sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.path.cmp(&b.path)));

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AuditConfig, RootConfig},
        walker::PresentEntry,
    };
    use janitor_api::{PresentFile, RecordKey, RecordKind};
    use std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    };

    fn policy(root: &Path, grace_secs: u64) -> Arc<AuditPolicy> {
        AuditConfig {
            roots: vec![RootConfig {
                name: "files".into(),
                path: root.to_path_buf(),
            }],
            grace_period_secs: grace_secs,
            case_insensitive: false,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn present(
        policy: &AuditPolicy,
        snapshot: &mut FilesystemSnapshot,
        path: PathBuf,
        age: Duration,
        size: u64,
    ) {
        let modified = SystemTime::now() - age;
        snapshot.files.insert(
            policy.normalizer.normalize(&path),
            PresentEntry {
                root: 0,
                file: PresentFile {
                    path,
                    size,
                    modified,
                },
            },
        );
    }

    #[test]
    fn untracked_old_file_is_the_only_orphan() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let policy = policy(&root, 120);
        let mut registry = PathRegistry::new();
        let mut snapshot = FilesystemSnapshot::default();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let path = root.join(name);
            registry.reference(
                policy.normalizer.normalize(&path),
                RecordKey::new(RecordKind::Attachment, i.to_string()),
            );
            present(&policy, &mut snapshot, path, Duration::from_secs(300), 10);
        }
        present(&policy, &mut snapshot, root.join("d"), Duration::from_secs(300), 42);

        let set = compute_orphans(&policy, &registry, &snapshot, &[], SystemTime::now());
        assert_eq!(set.files.len(), 1);
        assert_eq!(set.files[0].path, root.join("d"));
        assert_eq!(set.files[0].root, "files");
        assert_eq!(set.reclaimable_bytes, 42);
        assert!(set.records.is_empty());
    }

    #[test]
    fn grace_period_and_transient_names_are_spared() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let policy = policy(&root, 120);
        let registry = PathRegistry::new();
        let mut snapshot = FilesystemSnapshot::default();
        present(&policy, &mut snapshot, root.join("fresh"), Duration::from_secs(10), 1);
        present(&policy, &mut snapshot, root.join("x.partial"), Duration::from_secs(900), 1);
        present(&policy, &mut snapshot, root.join("stale"), Duration::from_secs(900), 7);

        let set = compute_orphans(&policy, &registry, &snapshot, &[], SystemTime::now());
        assert_eq!(set.files.len(), 1);
        assert_eq!(set.files[0].path, root.join("stale"));
        assert_eq!(set.within_grace, 1);
        assert_eq!(set.transient, 1);
        assert_eq!(
            set.reclaimable_bytes,
            set.files.iter().map(|f| f.size).sum::<u64>()
        );
    }

    #[test]
    fn missing_candidate_confirmed_only_when_absent_from_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let policy = policy(&root, 0);
        let mut snapshot = FilesystemSnapshot::default();
        present(&policy, &mut snapshot, root.join("late"), Duration::from_secs(1), 1);

        let gone = OrphanRecord {
            key: RecordKey::new(RecordKind::Attachment, "e"),
            path: root.join("e"),
        };
        let late = OrphanRecord {
            key: RecordKey::new(RecordKind::Attachment, "l"),
            path: root.join("late"),
        };
        let mut registry = PathRegistry::new();
        registry.reference(policy.normalizer.normalize(&gone.path), gone.key.clone());
        registry.reference(policy.normalizer.normalize(&late.path), late.key.clone());

        let set = compute_orphans(
            &policy,
            &registry,
            &snapshot,
            &[gone.clone(), late, gone.clone()],
            SystemTime::now(),
        );
        assert_eq!(set.records, vec![gone]);
        assert!(set.files.is_empty());
    }

    #[test]
    fn future_mtime_is_never_an_orphan() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let policy = policy(&root, 0);
        let mut snapshot = FilesystemSnapshot::default();
        let path = root.join("skewed");
        snapshot.files.insert(
            policy.normalizer.normalize(&path),
            PresentEntry {
                root: 0,
                file: PresentFile {
                    path,
                    size: 1,
                    modified: SystemTime::now() + Duration::from_secs(3600),
                },
            },
        );
        let set = compute_orphans(&policy, &PathRegistry::new(), &snapshot, &[], SystemTime::now());
        assert!(set.files.is_empty());
        assert_eq!(set.within_grace, 1);
    }
}
