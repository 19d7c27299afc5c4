use std::{path::PathBuf, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::{DanglingRecord, RecordKey};

/// Whether an audit is allowed to delete what it finds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    AuditOnly,
    Cleanup,
}

impl AuditMode {
    pub fn from_should_cleanup(should_cleanup: bool) -> Self {
        if should_cleanup {
            AuditMode::Cleanup
        } else {
            AuditMode::AuditOnly
        }
    }

    pub fn deletes(&self) -> bool {
        matches!(self, AuditMode::Cleanup)
    }
}

/// A present file no live record references.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OrphanFile {
    pub path: PathBuf,
    /// Name of the managed root the file lives under.
    pub root: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// A live record whose referenced file is missing from disk.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OrphanRecord {
    pub key: RecordKey,
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailedRemoval {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of the deletion phase.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub removed_files: usize,
    pub removed_bytes: u64,
    /// Orphans that disappeared between the walk and the deletion.
    pub already_gone: usize,
    pub failed: Vec<FailedRemoval>,
    pub pruned_dirs: usize,
    /// Whether the last-cleaning bookkeeping was written.
    pub metadata_updated: bool,
}

/// The result of one audit run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub run_id: String,
    pub mode: AuditMode,
    pub started_at: i64,
    pub finished_at: i64,
    /// Number of distinct paths referenced by live records.
    pub referenced_paths: usize,
    pub present_files: usize,
    pub orphan_file_count: usize,
    /// Empty when the report was built in summary mode.
    pub orphan_files: Vec<OrphanFile>,
    pub orphan_record_count: usize,
    pub orphan_records: Vec<OrphanRecord>,
    pub dangling_records: Vec<DanglingRecord>,
    /// Sum of the sizes of every orphan file. Advisory only.
    pub reclaimable_bytes: u64,
    /// Walk entries that could not be read.
    pub skipped_entries: usize,
    pub malformed_records: usize,
    /// Referenced paths that resolved outside every managed root.
    pub contract_violations: Vec<PathBuf>,
    /// `None` for audit-only runs.
    pub cleanup: Option<CleanupResult>,
}

impl AuditReport {
    pub fn cleanup_performed(&self) -> bool {
        self.cleanup.is_some()
    }

    /// No orphan files and no orphan records.
    pub fn is_clean(&self) -> bool {
        self.orphan_file_count == 0 && self.orphan_record_count == 0
    }
}

/// When an audit with cleanup last completed, and under which version.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LastCleaningMetadata {
    pub version: String,
    /// Unix timestamp, seconds.
    pub cleaned_at: i64,
}

impl LastCleaningMetadata {
    pub fn is_current_for(&self, version: &str) -> bool {
        self.version == version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordKind;

    #[test]
    fn report_serializes_with_snake_case_mode() {
        let report = AuditReport {
            run_id: "r".into(),
            mode: AuditMode::AuditOnly,
            started_at: 1,
            finished_at: 2,
            referenced_paths: 0,
            present_files: 0,
            orphan_file_count: 0,
            orphan_files: vec![],
            orphan_record_count: 1,
            orphan_records: vec![OrphanRecord {
                key: RecordKey::new(RecordKind::Attachment, "a"),
                path: PathBuf::from("/x"),
            }],
            dangling_records: vec![],
            reclaimable_bytes: 0,
            skipped_entries: 0,
            malformed_records: 0,
            contract_violations: vec![],
            cleanup: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["mode"], "audit_only");
        assert_eq!(value["orphan_records"][0]["key"]["kind"], "attachment");
        assert!(!report.cleanup_performed());
        assert!(!report.is_clean());
    }

    #[test]
    fn metadata_version_check() {
        let meta = LastCleaningMetadata {
            version: "1.2.0".into(),
            cleaned_at: 0,
        };
        assert!(meta.is_current_for("1.2.0"));
        assert!(!meta.is_current_for("1.3.0"));
    }
}
