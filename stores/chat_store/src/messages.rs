use crate::model::{Attachment, LinkPreview, Message, VoiceMemo};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use uuid::Uuid;

/// Create a new text message.
pub fn create_message(
    conn: &Connection,
    room_id: &Uuid,
    author_id: &Uuid,
    text_md: &str,
) -> Result<Message> {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO messages (id, room_id, author_id, text_md, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            room_id.to_string(),
            author_id.to_string(),
            text_md,
            now
        ],
    )?;
    Ok(Message {
        id,
        room_id: *room_id,
        author_id: *author_id,
        text_md: text_md.into(),
        created_at: now,
    })
}

/// Attach a file to a message. `file_id` is `None` while the download is pending.
pub fn add_attachment(
    conn: &Connection,
    message_id: &Uuid,
    file_id: Option<&str>,
    file_name: &str,
    mime: Option<&str>,
    size_bytes: i64,
) -> Result<Attachment> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO attachments (id, message_id, file_id, file_name, mime, size_bytes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            message_id.to_string(),
            file_id,
            file_name,
            mime,
            size_bytes
        ],
    )?;
    Ok(Attachment {
        id,
        message_id: *message_id,
        file_id: file_id.map(str::to_string),
        file_name: file_name.into(),
        mime: mime.map(str::to_string),
        size_bytes,
        thumbnails: Vec::new(),
    })
}

/// Replace the list of generated thumbnail dimensions.
pub fn set_thumbnails(conn: &Connection, attachment_id: &Uuid, dims: &[u32]) -> Result<()> {
    let json = serde_json::to_string(dims)?;
    let n = conn.execute(
        "UPDATE attachments SET thumbnails = ?1 WHERE id = ?2",
        params![json, attachment_id.to_string()],
    )?;
    if n == 0 {
        return Err(anyhow!("not_found"));
    }
    Ok(())
}

pub fn set_link_preview(conn: &Connection, preview: &LinkPreview) -> Result<()> {
    conn.execute(
        "INSERT INTO link_previews (message_id, url, title, image_file_id) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(message_id) DO UPDATE SET
           url = excluded.url, title = excluded.title, image_file_id = excluded.image_file_id",
        params![
            preview.message_id.to_string(),
            preview.url,
            preview.title,
            preview.image_file_id
        ],
    )?;
    Ok(())
}

pub fn add_voice_memo(
    conn: &Connection,
    message_id: &Uuid,
    file_id: Option<&str>,
    duration_ms: i64,
) -> Result<VoiceMemo> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO voice_memos (id, message_id, file_id, duration_ms) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), message_id.to_string(), file_id, duration_ms],
    )?;
    Ok(VoiceMemo {
        id,
        message_id: *message_id,
        file_id: file_id.map(str::to_string),
        duration_ms,
    })
}

/// Delete a message together with everything it owns.
pub fn delete_message(conn: &mut Connection, message_id: &Uuid) -> Result<()> {
    let id = message_id.to_string();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM attachments WHERE message_id = ?1", params![id])?;
    tx.execute("DELETE FROM voice_memos WHERE message_id = ?1", params![id])?;
    tx.execute("DELETE FROM link_previews WHERE message_id = ?1", params![id])?;
    let n = tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    if n == 0 {
        return Err(anyhow!("not_found"));
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::init_db, rooms::create_room};

    #[test]
    fn delete_message_removes_owned_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let mut conn = init_db(tmp.path().join("chat.db")).unwrap();
        let room = create_room(&conn, "general", true).unwrap();
        let author = Uuid::new_v4();
        let msg = create_message(&conn, &room.id, &author, "look").unwrap();
        add_attachment(&conn, &msg.id, Some("f"), "a.png", None, 3).unwrap();
        add_voice_memo(&conn, &msg.id, None, 1200).unwrap();

        delete_message(&mut conn, &msg.id).unwrap();
        let left: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM attachments) + (SELECT COUNT(*) FROM voice_memos)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(left, 0);
        assert!(delete_message(&mut conn, &msg.id).is_err());
    }

    #[test]
    fn thumbnails_are_stored_as_json() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = init_db(tmp.path().join("chat.db")).unwrap();
        let room = create_room(&conn, "general", true).unwrap();
        let msg = create_message(&conn, &room.id, &Uuid::new_v4(), "pic").unwrap();
        let att = add_attachment(&conn, &msg.id, None, "a.jpg", None, 9).unwrap();
        set_thumbnails(&conn, &att.id, &[160, 640]).unwrap();
        let raw: String = conn
            .query_row("SELECT thumbnails FROM attachments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, "[160,640]");
    }
}
