//! Contract shared between the orphan audit engine and the stores it reconciles.
//!
//! The engine never talks to a database or a disk directly. It consumes the
//! three collaborator traits defined here and produces the report types in
//! [`report`].

pub mod records;
pub mod report;

use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use records::{
    AttachmentRecord, AvatarOwner, AvatarRecord, BlobKind, ContentRecord, DanglingRecord,
    InvalidFileId, LinkPreviewRecord, MalformedRecord, RecordKey, RecordKind, ReferencesFiles,
    StickerRecord, StorageLayout, VoiceMemoRecord,
};
pub use report::{
    AuditMode, AuditReport, CleanupResult, FailedRemoval, LastCleaningMetadata, OrphanFile,
    OrphanRecord,
};

/// A regular file discovered while walking a managed root.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PresentFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// One item produced by [`RecordStore::visit_records`].
#[derive(Debug, Clone)]
pub enum RecordEvent {
    /// A live record that owns or references filesystem content.
    Content(ContentRecord),
    /// A row that could not be decoded. The walk continues past it.
    Malformed(MalformedRecord),
    /// A row whose owning row no longer exists.
    Dangling(DanglingRecord),
}

/// One item produced by [`FileSystem::walk`].
#[derive(Debug, Clone)]
pub enum WalkEntry {
    File(PresentFile),
    Directory(PathBuf),
    /// Symlinks are reported but never followed.
    Symlink(PathBuf),
    /// An entry that could not be read; the walk continues past it.
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("filesystem unavailable under {}: {reason}", root.display())]
    Unavailable { root: PathBuf, reason: String },
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// True when the target of a removal was already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Read-only access to every record that references a blob on disk.
pub trait RecordStore: Send + Sync {
    /// Visit every content-owning record inside a single read snapshot.
    ///
    /// Returning `ControlFlow::Break` from the visitor stops the walk early
    /// without an error. An `Err` means the store as a whole went away and no
    /// conclusion may be drawn from what was visited so far.
    fn visit_records(
        &self,
        visitor: &mut dyn FnMut(RecordEvent) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    /// The path derivation the store itself uses when writing blobs.
    fn layout(&self) -> &dyn StorageLayout;
}

/// Directory enumeration and removal.
pub trait FileSystem: Send + Sync {
    /// Recursively enumerate `root` without following symlinks.
    ///
    /// Per-entry failures are reported as [`WalkEntry::Unreadable`]; an `Err`
    /// means the root itself became unavailable.
    fn walk(
        &self,
        root: &Path,
        visitor: &mut dyn FnMut(WalkEntry) -> ControlFlow<()>,
    ) -> Result<(), FsError>;

    /// Whether a regular file exists at `path`. Errors count as present.
    fn is_file(&self, path: &Path) -> bool;

    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// Remove `path` if it is an empty directory. Returns whether it was removed.
    fn remove_empty_dir(&self, path: &Path) -> Result<bool, FsError>;
}

/// Persistence for the last completed cleanup pass.
pub trait SettingsStore: Send + Sync {
    fn last_cleaning(&self) -> Result<Option<LastCleaningMetadata>, SettingsError>;
    fn set_last_cleaning(&self, meta: &LastCleaningMetadata) -> Result<(), SettingsError>;
}
