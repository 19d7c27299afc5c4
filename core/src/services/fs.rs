use std::{
    fs, io,
    ops::ControlFlow,
    path::{Path, PathBuf},
    time::SystemTime,
};

use janitor_api::{FileSystem, FsError, PresentFile, WalkEntry};
use walkdir::WalkDir;

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    fn unavailable(root: &Path, reason: impl Into<String>) -> FsError {
        FsError::Unavailable {
            root: root.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Per-entry errors that only cost the walk that one entry.
fn is_entry_local(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
    )
}

/// A file whose age cannot be read is skipped; the grace period cannot be
/// applied to it.
fn file_entry(path: PathBuf, size: u64, modified: io::Result<SystemTime>) -> WalkEntry {
    match modified {
        Ok(modified) => WalkEntry::File(PresentFile {
            path,
            size,
            modified,
        }),
        Err(err) => WalkEntry::Unreadable {
            path,
            reason: format!("modification time unavailable: {err}"),
        },
    }
}

impl FileSystem for LocalFileSystem {
    fn walk(
        &self,
        root: &Path,
        visitor: &mut dyn FnMut(WalkEntry) -> ControlFlow<()>,
    ) -> Result<(), FsError> {
        match fs::symlink_metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Self::unavailable(root, "not a directory")),
            Err(err) => return Err(Self::unavailable(root, err.to_string())),
        }

        for entry in WalkDir::new(root).follow_links(false) {
            let item = match entry {
                Ok(entry) => {
                    let path = entry.path().to_path_buf();
                    let file_type = entry.file_type();
                    if file_type.is_symlink() {
                        WalkEntry::Symlink(path)
                    } else if file_type.is_dir() {
                        WalkEntry::Directory(path)
                    } else if file_type.is_file() {
                        match entry.metadata() {
                            Ok(meta) => file_entry(path, meta.len(), meta.modified()),
                            Err(err) => WalkEntry::Unreadable {
                                path,
                                reason: err.to_string(),
                            },
                        }
                    } else {
                        WalkEntry::Unreadable {
                            path,
                            reason: "not a regular file".into(),
                        }
                    }
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    let local = err
                        .io_error()
                        .map(|e| is_entry_local(e.kind()))
                        .unwrap_or(true);
                    if err.depth() == 0 || !local {
                        return Err(Self::unavailable(root, err.to_string()));
                    }
                    WalkEntry::Unreadable {
                        path,
                        reason: err.to_string(),
                    }
                }
            };
            if visitor(item).is_break() {
                return Ok(());
            }
        }

        // an unmounted volume can look like an empty tree
        if !root.is_dir() {
            return Err(Self::unavailable(root, "root disappeared during walk"));
        }
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) => meta.is_file(),
            Err(err) => err.kind() != io::ErrorKind::NotFound,
        }
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|source| FsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn remove_empty_dir(&self, path: &Path) -> Result<bool, FsError> {
        let io_err = |source| FsError::Io {
            path: PathBuf::from(path),
            source,
        };
        let mut entries = fs::read_dir(path).map_err(io_err)?;
        if entries.next().is_some() {
            return Ok(false);
        }
        fs::remove_dir(path).map_err(io_err)?;
        Ok(true)
    }
}
