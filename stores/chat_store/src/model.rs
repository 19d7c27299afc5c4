use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub is_group: bool,
    pub avatar_file: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub text_md: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    /// `None` until the blob has been downloaded.
    pub file_id: Option<String>,
    pub file_name: String,
    pub mime: Option<String>,
    pub size_bytes: i64,
    pub thumbnails: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Sticker {
    pub pack_id: String,
    pub sticker_id: u32,
    pub emoji: Option<String>,
    pub file_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkPreview {
    pub message_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub image_file_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceMemo {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_id: Option<String>,
    pub duration_ms: i64,
}
