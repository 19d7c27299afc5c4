use std::ops::ControlFlow;

use janitor_api::{
    AttachmentRecord, AvatarOwner, AvatarRecord, ContentRecord, DanglingRecord, LinkPreviewRecord,
    MalformedRecord, RecordEvent, RecordKey, RecordKind, RecordStore, ReferencesFiles,
    StickerRecord, StorageLayout, StoreError, VoiceMemoRecord,
};
use rusqlite::{Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::{db::DbPool, files::ContentStore};

type Visitor<'v> = dyn FnMut(RecordEvent) -> ControlFlow<()> + 'v;
type Pass = fn(&Transaction<'_>, &mut Visitor<'_>) -> Result<ControlFlow<()>, StoreError>;

/// [`RecordStore`] over the chat database.
///
/// Every table is read inside one deferred transaction, so the audit sees a
/// single consistent snapshot even while writers keep going.
pub struct SqliteRecordStore {
    pool: DbPool,
    content: ContentStore,
}

impl SqliteRecordStore {
    pub fn new(pool: DbPool, content: ContentStore) -> Self {
        Self { pool, content }
    }
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Run `sql` and feed each decoded row to the visitor.
///
/// A row that fails to decode becomes a malformed record keyed by its first
/// column. `salvage` then gets a chance to recover the file the row names, so
/// a broken row never costs a live blob its protection.
fn visit_query(
    tx: &Transaction<'_>,
    kind: RecordKind,
    sql: &str,
    visitor: &mut Visitor<'_>,
    decode: impl Fn(&Row<'_>) -> rusqlite::Result<Vec<RecordEvent>>,
    salvage: impl Fn(&Row<'_>) -> Option<ContentRecord>,
) -> Result<ControlFlow<()>, StoreError> {
    let mut stmt = tx.prepare(sql).map_err(unavailable)?;
    let mut rows = stmt.query([]).map_err(unavailable)?;
    while let Some(row) = rows.next().map_err(unavailable)? {
        let events = decode(row).unwrap_or_else(|err| {
            let id = row
                .get::<_, String>(0)
                .unwrap_or_else(|_| "<unreadable>".into());
            let mut events = vec![malformed(kind, id, err.to_string())];
            if let Some(record) = salvage(row) {
                debug!(record = %record.record_key(), "kept file of undecodable row");
                events.push(RecordEvent::Content(record));
            }
            events
        });
        for event in events {
            if visitor(event).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Text column read without failing the row.
fn lenient(row: &Row<'_>, idx: usize) -> String {
    row.get::<_, String>(idx).unwrap_or_default()
}

/// File id column, when it holds text.
fn file_column(row: &Row<'_>, idx: usize) -> Option<String> {
    row.get::<_, Option<String>>(idx).ok().flatten()
}

fn malformed(kind: RecordKind, id: impl Into<String>, reason: impl Into<String>) -> RecordEvent {
    RecordEvent::Malformed(MalformedRecord {
        key: RecordKey::new(kind, id),
        reason: reason.into(),
    })
}

fn dangling(key: RecordKey, owner_kind: RecordKind, owner_id: &str) -> RecordEvent {
    RecordEvent::Dangling(DanglingRecord {
        key,
        missing_owner: RecordKey::new(owner_kind, owner_id),
    })
}

fn attachments(
    tx: &Transaction<'_>,
    visitor: &mut Visitor<'_>,
) -> Result<ControlFlow<()>, StoreError> {
    visit_query(
        tx,
        RecordKind::Attachment,
        "SELECT a.id, a.message_id, a.file_id, a.thumbnails, m.id IS NULL
         FROM attachments a LEFT JOIN messages m ON m.id = a.message_id",
        visitor,
        |row| {
            let id: String = row.get(0)?;
            let message_id: String = row.get(1)?;
            let file_id: Option<String> = row.get(2)?;
            let thumbnails: String = row.get(3)?;
            let orphaned: bool = row.get(4)?;

            let mut events = Vec::new();
            // a bad thumbnail list must not cost the original its protection
            let thumbnail_dims = match serde_json::from_str::<Vec<u32>>(&thumbnails) {
                Ok(dims) => dims,
                Err(err) => {
                    events.push(malformed(
                        RecordKind::Attachment,
                        &id,
                        format!("thumbnail list: {err}"),
                    ));
                    Vec::new()
                }
            };
            let record = AttachmentRecord {
                id,
                message_id,
                file_id,
                thumbnail_dims,
            };
            if orphaned {
                events.push(dangling(
                    RecordKey::new(RecordKind::Attachment, &record.id),
                    RecordKind::Message,
                    &record.message_id,
                ));
            }
            events.push(RecordEvent::Content(ContentRecord::Attachment(record)));
            Ok(events)
        },
        |row| {
            Some(ContentRecord::Attachment(AttachmentRecord {
                id: lenient(row, 0),
                message_id: lenient(row, 1),
                file_id: Some(file_column(row, 2)?),
                thumbnail_dims: Vec::new(),
            }))
        },
    )
}

fn voice_memos(
    tx: &Transaction<'_>,
    visitor: &mut Visitor<'_>,
) -> Result<ControlFlow<()>, StoreError> {
    visit_query(
        tx,
        RecordKind::VoiceMemo,
        "SELECT v.id, v.message_id, v.file_id, m.id IS NULL
         FROM voice_memos v LEFT JOIN messages m ON m.id = v.message_id",
        visitor,
        |row| {
            let record = VoiceMemoRecord {
                id: row.get(0)?,
                message_id: row.get(1)?,
                file_id: row.get(2)?,
            };
            let orphaned: bool = row.get(3)?;
            let mut events = Vec::new();
            if orphaned {
                events.push(dangling(
                    RecordKey::new(RecordKind::VoiceMemo, &record.id),
                    RecordKind::Message,
                    &record.message_id,
                ));
            }
            events.push(RecordEvent::Content(ContentRecord::VoiceMemo(record)));
            Ok(events)
        },
        |row| {
            Some(ContentRecord::VoiceMemo(VoiceMemoRecord {
                id: lenient(row, 0),
                message_id: lenient(row, 1),
                file_id: Some(file_column(row, 2)?),
            }))
        },
    )
}

fn link_previews(
    tx: &Transaction<'_>,
    visitor: &mut Visitor<'_>,
) -> Result<ControlFlow<()>, StoreError> {
    visit_query(
        tx,
        RecordKind::LinkPreview,
        "SELECT p.message_id, p.image_file_id, m.id IS NULL
         FROM link_previews p LEFT JOIN messages m ON m.id = p.message_id",
        visitor,
        |row| {
            let record = LinkPreviewRecord {
                message_id: row.get(0)?,
                image_file_id: row.get(1)?,
            };
            let orphaned: bool = row.get(2)?;
            let mut events = Vec::new();
            if orphaned {
                events.push(dangling(
                    RecordKey::new(RecordKind::LinkPreview, &record.message_id),
                    RecordKind::Message,
                    &record.message_id,
                ));
            }
            events.push(RecordEvent::Content(ContentRecord::LinkPreview(record)));
            Ok(events)
        },
        |row| {
            Some(ContentRecord::LinkPreview(LinkPreviewRecord {
                message_id: lenient(row, 0),
                image_file_id: Some(file_column(row, 1)?),
            }))
        },
    )
}

fn stickers(
    tx: &Transaction<'_>,
    visitor: &mut Visitor<'_>,
) -> Result<ControlFlow<()>, StoreError> {
    visit_query(
        tx,
        RecordKind::Sticker,
        "SELECT pack_id, sticker_id, file_id FROM stickers",
        visitor,
        |row| {
            let record = StickerRecord {
                pack_id: row.get(0)?,
                sticker_id: row.get(1)?,
                file_id: row.get(2)?,
            };
            let mut events = Vec::new();
            // an id no writer could produce still keeps its file
            if u32::try_from(record.sticker_id).is_err() {
                events.push(malformed(
                    RecordKind::Sticker,
                    record.record_key().id,
                    "sticker id out of range",
                ));
            }
            events.push(RecordEvent::Content(ContentRecord::Sticker(record)));
            Ok(events)
        },
        |row| {
            Some(ContentRecord::Sticker(StickerRecord {
                pack_id: lenient(row, 0),
                sticker_id: row.get(1).unwrap_or_default(),
                file_id: Some(file_column(row, 2)?),
            }))
        },
    )
}

fn avatars(tx: &Transaction<'_>, visitor: &mut Visitor<'_>) -> Result<ControlFlow<()>, StoreError> {
    let users = visit_query(
        tx,
        RecordKind::Avatar,
        "SELECT id, avatar_file FROM users WHERE avatar_file IS NOT NULL",
        visitor,
        |row| {
            Ok(vec![RecordEvent::Content(ContentRecord::Avatar(AvatarRecord {
                owner: AvatarOwner::User(row.get(0)?),
                file_id: row.get(1)?,
            }))])
        },
        |row| {
            Some(ContentRecord::Avatar(AvatarRecord {
                owner: AvatarOwner::User(lenient(row, 0)),
                file_id: file_column(row, 1)?,
            }))
        },
    )?;
    if users.is_break() {
        return Ok(users);
    }
    visit_query(
        tx,
        RecordKind::Avatar,
        "SELECT id, avatar_file FROM rooms WHERE is_group = 1 AND avatar_file IS NOT NULL",
        visitor,
        |row| {
            Ok(vec![RecordEvent::Content(ContentRecord::Avatar(AvatarRecord {
                owner: AvatarOwner::Group(row.get(0)?),
                file_id: row.get(1)?,
            }))])
        },
        |row| {
            Some(ContentRecord::Avatar(AvatarRecord {
                owner: AvatarOwner::Group(lenient(row, 0)),
                file_id: file_column(row, 1)?,
            }))
        },
    )
}

fn messages_without_room(
    tx: &Transaction<'_>,
    visitor: &mut Visitor<'_>,
) -> Result<ControlFlow<()>, StoreError> {
    visit_query(
        tx,
        RecordKind::Message,
        "SELECT m.id, m.room_id FROM messages m LEFT JOIN rooms r ON r.id = m.room_id
         WHERE r.id IS NULL",
        visitor,
        |row| {
            let id: String = row.get(0)?;
            let room_id: String = row.get(1)?;
            Ok(vec![dangling(
                RecordKey::new(RecordKind::Message, id),
                RecordKind::Room,
                &room_id,
            )])
        },
        |_| None,
    )
}

impl RecordStore for SqliteRecordStore {
    fn visit_records(
        &self,
        visitor: &mut dyn FnMut(RecordEvent) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().map_err(unavailable)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(unavailable)?;

        let passes: [Pass; 6] = [
            attachments,
            voice_memos,
            link_previews,
            stickers,
            avatars,
            messages_without_room,
        ];
        for pass in passes {
            if pass(&tx, visitor)?.is_break() {
                debug!("record visit stopped early");
                break;
            }
        }
        // read-only; dropping the transaction rolls it back
        drop(tx);
        Ok(())
    }

    fn layout(&self) -> &dyn StorageLayout {
        &self.content
    }
}
