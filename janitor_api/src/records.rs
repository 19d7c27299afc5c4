use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a content-owning record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Attachment,
    Sticker,
    Avatar,
    LinkPreview,
    VoiceMemo,
    Message,
    Room,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Attachment => "attachment",
            RecordKind::Sticker => "sticker",
            RecordKind::Avatar => "avatar",
            RecordKind::LinkPreview => "link_preview",
            RecordKind::VoiceMemo => "voice_memo",
            RecordKind::Message => "message",
            RecordKind::Room => "room",
        }
    }
}

/// Identity of a record: its category plus its primary key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub id: String,
}

impl RecordKey {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Which blob area a file id lives in.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    Attachment,
    Sticker,
    Avatar,
    VoiceMemo,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid file id {0:?}")]
pub struct InvalidFileId(pub String);

/// Path derivation for stored blobs.
///
/// Implemented by whatever writes the blobs, so that the audit resolves a
/// record to exactly the path the writer used.
pub trait StorageLayout: Send + Sync {
    fn blob_path(&self, kind: BlobKind, file_id: &str) -> Result<PathBuf, InvalidFileId>;
    fn thumbnail_path(&self, file_id: &str, dimension: u32) -> Result<PathBuf, InvalidFileId>;
}

/// Capability of a record to name the files it keeps alive.
pub trait ReferencesFiles {
    fn record_key(&self) -> RecordKey;

    /// Every path this record references. Empty when the record has no local
    /// file yet, e.g. an attachment still waiting to be downloaded.
    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: String,
    pub message_id: String,
    pub file_id: Option<String>,
    /// Longer-side dimensions of the derived thumbnails generated so far.
    #[serde(default)]
    pub thumbnail_dims: Vec<u32>,
}

impl ReferencesFiles for AttachmentRecord {
    fn record_key(&self) -> RecordKey {
        RecordKey::new(RecordKind::Attachment, &self.id)
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        let Some(file_id) = &self.file_id else {
            return Ok(Vec::new());
        };
        let mut paths = vec![layout.blob_path(BlobKind::Attachment, file_id)?];
        for dim in &self.thumbnail_dims {
            paths.push(layout.thumbnail_path(file_id, *dim)?);
        }
        Ok(paths)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StickerRecord {
    pub pack_id: String,
    /// As stored. Writers only produce `u32` ids.
    pub sticker_id: i64,
    pub file_id: Option<String>,
}

impl ReferencesFiles for StickerRecord {
    fn record_key(&self) -> RecordKey {
        RecordKey::new(
            RecordKind::Sticker,
            format!("{}.{}", self.pack_id, self.sticker_id),
        )
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        match &self.file_id {
            Some(id) => Ok(vec![layout.blob_path(BlobKind::Sticker, id)?]),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AvatarOwner {
    User(String),
    Group(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AvatarRecord {
    pub owner: AvatarOwner,
    pub file_id: String,
}

impl ReferencesFiles for AvatarRecord {
    fn record_key(&self) -> RecordKey {
        let id = match &self.owner {
            AvatarOwner::User(id) => format!("user.{id}"),
            AvatarOwner::Group(id) => format!("group.{id}"),
        };
        RecordKey::new(RecordKind::Avatar, id)
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        Ok(vec![layout.blob_path(BlobKind::Avatar, &self.file_id)?])
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkPreviewRecord {
    pub message_id: String,
    pub image_file_id: Option<String>,
}

impl ReferencesFiles for LinkPreviewRecord {
    fn record_key(&self) -> RecordKey {
        RecordKey::new(RecordKind::LinkPreview, &self.message_id)
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        // preview images share the attachment area
        match &self.image_file_id {
            Some(id) => Ok(vec![layout.blob_path(BlobKind::Attachment, id)?]),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VoiceMemoRecord {
    pub id: String,
    pub message_id: String,
    pub file_id: Option<String>,
}

impl ReferencesFiles for VoiceMemoRecord {
    fn record_key(&self) -> RecordKey {
        RecordKey::new(RecordKind::VoiceMemo, &self.id)
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        match &self.file_id {
            Some(id) => Ok(vec![layout.blob_path(BlobKind::VoiceMemo, id)?]),
            None => Ok(Vec::new()),
        }
    }
}

/// Closed set of record categories that own filesystem content.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentRecord {
    Attachment(AttachmentRecord),
    Sticker(StickerRecord),
    Avatar(AvatarRecord),
    LinkPreview(LinkPreviewRecord),
    VoiceMemo(VoiceMemoRecord),
}

impl ContentRecord {
    fn inner(&self) -> &dyn ReferencesFiles {
        match self {
            ContentRecord::Attachment(r) => r,
            ContentRecord::Sticker(r) => r,
            ContentRecord::Avatar(r) => r,
            ContentRecord::LinkPreview(r) => r,
            ContentRecord::VoiceMemo(r) => r,
        }
    }
}

impl ReferencesFiles for ContentRecord {
    fn record_key(&self) -> RecordKey {
        self.inner().record_key()
    }

    fn referenced_paths(&self, layout: &dyn StorageLayout) -> Result<Vec<PathBuf>, InvalidFileId> {
        self.inner().referenced_paths(layout)
    }
}

/// A row the store could not decode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub key: RecordKey,
    pub reason: String,
}

/// A row whose owning row is gone, e.g. an attachment of a deleted message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DanglingRecord {
    pub key: RecordKey,
    pub missing_owner: RecordKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct FlatLayout;

    impl StorageLayout for FlatLayout {
        fn blob_path(&self, kind: BlobKind, file_id: &str) -> Result<PathBuf, InvalidFileId> {
            if file_id.is_empty() {
                return Err(InvalidFileId(file_id.into()));
            }
            Ok(Path::new("/data").join(format!("{kind:?}")).join(file_id))
        }

        fn thumbnail_path(&self, file_id: &str, dimension: u32) -> Result<PathBuf, InvalidFileId> {
            Ok(Path::new("/data/thumbs").join(format!("{file_id}-{dimension}")))
        }
    }

    #[test]
    fn attachment_references_original_and_thumbnails() {
        let rec = ContentRecord::Attachment(AttachmentRecord {
            id: "a1".into(),
            message_id: "m1".into(),
            file_id: Some("f".into()),
            thumbnail_dims: vec![200, 400],
        });
        let paths = rec.referenced_paths(&FlatLayout).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/data/Attachment/f"),
                PathBuf::from("/data/thumbs/f-200"),
                PathBuf::from("/data/thumbs/f-400"),
            ]
        );
        assert_eq!(rec.record_key().to_string(), "attachment:a1");
    }

    #[test]
    fn pending_download_references_nothing() {
        let rec = ContentRecord::VoiceMemo(VoiceMemoRecord {
            id: "v".into(),
            message_id: "m".into(),
            file_id: None,
        });
        assert!(rec.referenced_paths(&FlatLayout).unwrap().is_empty());
    }

    #[test]
    fn invalid_id_surfaces_as_error() {
        let rec = ContentRecord::Avatar(AvatarRecord {
            owner: AvatarOwner::Group("g".into()),
            file_id: String::new(),
        });
        assert!(rec.referenced_paths(&FlatLayout).is_err());
        assert_eq!(rec.record_key().to_string(), "avatar:group.g");
    }
}
