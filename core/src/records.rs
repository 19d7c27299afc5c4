use std::{ops::ControlFlow, path::PathBuf};

use janitor_api::{
    ContentRecord, DanglingRecord, FileSystem, OrphanRecord, RecordEvent, RecordStore,
    ReferencesFiles, StorageLayout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{config::AuditPolicy, error::AuditFailure, registry::PathRegistry};

/// Everything learned from one pass over the record store.
#[derive(Debug, Default)]
pub struct RecordWalk {
    pub registry: PathRegistry,
    /// Records whose file was absent when checked during the walk.
    pub missing: Vec<OrphanRecord>,
    pub dangling: Vec<DanglingRecord>,
    pub records: usize,
    pub malformed: usize,
    /// Referenced paths outside every managed root.
    pub violations: Vec<PathBuf>,
}

/// Builds the referenced-path set from every live content record.
pub struct RecordWalker<'a> {
    store: &'a dyn RecordStore,
    fs: &'a dyn FileSystem,
    policy: &'a AuditPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> RecordWalker<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        fs: &'a dyn FileSystem,
        policy: &'a AuditPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            fs,
            policy,
            cancel,
        }
    }

    /// Walk the store's snapshot, adding every referenced path to `registry`.
    pub fn walk(&self, registry: PathRegistry) -> Result<RecordWalk, AuditFailure> {
        let layout = self.store.layout();
        let mut walk = RecordWalk {
            registry,
            ..Default::default()
        };
        let mut cancelled = false;

        self.store.visit_records(&mut |event| {
            if self.cancel.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            match event {
                RecordEvent::Content(record) => self.visit_content(&mut walk, layout, record),
                RecordEvent::Malformed(bad) => {
                    warn!(record = %bad.key, reason = %bad.reason, "skipping malformed record");
                    walk.malformed += 1;
                }
                RecordEvent::Dangling(dangling) => {
                    debug!(
                        record = %dangling.key,
                        owner = %dangling.missing_owner,
                        "record outlived its owner"
                    );
                    walk.dangling.push(dangling);
                }
            }
            ControlFlow::Continue(())
        })?;

        if cancelled {
            return Err(AuditFailure::Cancelled);
        }
        debug!(
            records = walk.records,
            referenced = walk.registry.len(),
            missing = walk.missing.len(),
            malformed = walk.malformed,
            "record walk complete"
        );
        Ok(walk)
    }

    fn visit_content(
        &self,
        walk: &mut RecordWalk,
        layout: &dyn StorageLayout,
        record: ContentRecord,
    ) {
        let key = record.record_key();
        let paths = match record.referenced_paths(layout) {
            Ok(paths) => paths,
            Err(err) => {
                warn!(
                    record = %key,
                    error = %err,
                    "skipping record with unresolvable file reference"
                );
                walk.malformed += 1;
                return;
            }
        };
        walk.records += 1;

        for path in paths {
            let canonical = self.policy.normalizer.normalize(&path);
            if self.policy.normalizer.root_of(&canonical).is_none() {
                error!(
                    record = %key,
                    path = %path.display(),
                    "referenced path resolves outside every managed root"
                );
                walk.violations.push(path.clone());
            }
            walk.registry.reference(canonical, key.clone());
            if !self.fs.is_file(&path) {
                walk.missing.push(OrphanRecord {
                    key: key.clone(),
                    path,
                });
            }
        }
    }
}
