use std::path::{Path, PathBuf};

use anyhow::Result;
use bytes::Bytes;
use janitor::RootConfig;
use janitor_api::{BlobKind, InvalidFileId, StorageLayout};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

static FILE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

pub const FILES_DIR: &str = "files";
pub const STICKERS_DIR: &str = "stickers";
pub const AVATARS_DIR: &str = "avatars";
pub const VOICE_DIR: &str = "voice";
/// Staging area for blobs still being written.
pub const TMP_DIR: &str = "tmp";

const ALL_DIRS: [&str; 5] = [FILES_DIR, STICKERS_DIR, AVATARS_DIR, VOICE_DIR, TMP_DIR];

/// Content-addressed blob store under a data directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    base: PathBuf,
}

impl ContentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            base: data_dir.into(),
        }
    }

    /// Create every blob area so the audit can treat them as managed roots.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in ALL_DIRS {
            std::fs::create_dir_all(self.base.join(dir))?;
        }
        Ok(())
    }

    /// The managed roots the audit reconciles against the database.
    pub fn roots(&self) -> Vec<RootConfig> {
        ALL_DIRS
            .iter()
            .map(|dir| RootConfig {
                name: dir.to_string(),
                path: self.base.join(dir),
            })
            .collect()
    }

    /// Save blob data and return its hash id.
    pub async fn save(&self, kind: BlobKind, data: Bytes) -> Result<String> {
        let id = hash_id(&data);
        let path = self.blob_path(kind, &id)?;
        self.write_staged(&path, data).await?;
        Ok(id)
    }

    /// Save a derived thumbnail for an already stored attachment.
    pub async fn save_thumbnail(
        &self,
        file_id: &str,
        dimension: u32,
        data: Bytes,
    ) -> Result<PathBuf> {
        let path = self.thumbnail_path(file_id, dimension)?;
        self.write_staged(&path, data).await?;
        Ok(path)
    }

    // blobs appear at their final path only once complete
    async fn write_staged(&self, path: &Path, data: Bytes) -> Result<()> {
        let tmp_dir = self.base.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await?;
        let staged = tmp_dir.join(format!("{}.partial", Uuid::new_v4()));
        fs::write(&staged, data).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&staged, path).await?;
        Ok(())
    }

    fn area(kind: BlobKind) -> &'static str {
        match kind {
            BlobKind::Attachment => FILES_DIR,
            BlobKind::Sticker => STICKERS_DIR,
            BlobKind::Avatar => AVATARS_DIR,
            BlobKind::VoiceMemo => VOICE_DIR,
        }
    }
}

/// sha256 of `data` as lowercase hex.
pub fn hash_id(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn validate_file_id(id: &str) -> Result<(), InvalidFileId> {
    if FILE_ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(InvalidFileId(id.to_string()))
    }
}

impl StorageLayout for ContentStore {
    fn blob_path(&self, kind: BlobKind, file_id: &str) -> Result<PathBuf, InvalidFileId> {
        validate_file_id(file_id)?;
        Ok(self
            .base
            .join(Self::area(kind))
            .join(&file_id[..2])
            .join(file_id))
    }

    fn thumbnail_path(&self, file_id: &str, dimension: u32) -> Result<PathBuf, InvalidFileId> {
        validate_file_id(file_id)?;
        Ok(self
            .base
            .join(FILES_DIR)
            .join(&file_id[..2])
            .join(format!("{file_id}-thumb-{dimension}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saves_and_paths_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path());
        let id = store
            .save(BlobKind::Attachment, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let expected = store.blob_path(BlobKind::Attachment, &id).unwrap();
        assert!(expected.exists());
        // ensure path includes first two chars as directory
        let subdir = &id[..2];
        assert!(expected.parent().unwrap().ends_with(subdir));
        assert!(expected.starts_with(tmp.path().join(FILES_DIR)));

        // nothing is left behind in staging
        let staged = std::fs::read_dir(tmp.path().join(TMP_DIR)).unwrap().count();
        assert_eq!(staged, 0);
    }

    #[tokio::test]
    async fn thumbnails_sit_next_to_the_original() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::new(tmp.path());
        let id = store
            .save(BlobKind::Attachment, Bytes::from_static(b"image"))
            .await
            .unwrap();
        let thumb = store
            .save_thumbnail(&id, 320, Bytes::from_static(b"small"))
            .await
            .unwrap();
        let original = store.blob_path(BlobKind::Attachment, &id).unwrap();
        assert_eq!(thumb.parent(), original.parent());
        assert!(thumb.ends_with(format!("{id}-thumb-320")));
    }

    #[test]
    fn rejects_ids_that_could_escape_the_store() {
        let store = ContentStore::new("/data");
        let not_hex = "g".repeat(64);
        for bad in ["", "../../etc/passwd", "ABCDEF", not_hex.as_str()] {
            assert!(store.blob_path(BlobKind::Sticker, bad).is_err(), "{bad}");
        }
        let id = hash_id(b"x");
        let path = store.blob_path(BlobKind::Sticker, &id).unwrap();
        assert_eq!(path, Path::new("/data/stickers").join(&id[..2]).join(&id));
    }
}
