use crate::model::{Room, Sticker, User};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use uuid::Uuid;

pub fn create_user(conn: &Connection, username: &str, display_name: &str) -> Result<User> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO users (id, username, display_name) VALUES (?1, ?2, ?3)",
        params![id.to_string(), username, display_name],
    )?;
    Ok(User {
        id,
        username: username.into(),
        display_name: display_name.into(),
        avatar_file: None,
    })
}

pub fn create_room(conn: &Connection, name: &str, is_group: bool) -> Result<Room> {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO rooms (id, name, is_group, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), name, is_group, now],
    )?;
    Ok(Room {
        id,
        name: name.into(),
        is_group,
        avatar_file: None,
        created_at: now,
    })
}

/// Delete the room row only. Messages that still point at it stay behind
/// and the audit reports them as dangling.
pub fn delete_room(conn: &Connection, room_id: &Uuid) -> Result<()> {
    let n = conn.execute("DELETE FROM rooms WHERE id = ?1", params![room_id.to_string()])?;
    if n == 0 {
        return Err(anyhow!("not_found"));
    }
    Ok(())
}

pub fn set_user_avatar(conn: &Connection, user_id: &Uuid, file_id: Option<&str>) -> Result<()> {
    let n = conn.execute(
        "UPDATE users SET avatar_file = ?1 WHERE id = ?2",
        params![file_id, user_id.to_string()],
    )?;
    if n == 0 {
        return Err(anyhow!("not_found"));
    }
    Ok(())
}

pub fn set_room_avatar(conn: &Connection, room_id: &Uuid, file_id: Option<&str>) -> Result<()> {
    let n = conn.execute(
        "UPDATE rooms SET avatar_file = ?1 WHERE id = ?2 AND is_group = 1",
        params![file_id, room_id.to_string()],
    )?;
    if n == 0 {
        return Err(anyhow!("not_a_group"));
    }
    Ok(())
}

/// Install or replace a sticker in a pack.
pub fn upsert_sticker(conn: &Connection, sticker: &Sticker) -> Result<()> {
    conn.execute(
        "INSERT INTO stickers (pack_id, sticker_id, emoji, file_id) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(pack_id, sticker_id) DO UPDATE SET
           emoji = excluded.emoji, file_id = excluded.file_id",
        params![
            sticker.pack_id,
            sticker.sticker_id,
            sticker.emoji,
            sticker.file_id
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    #[test]
    fn deleting_a_room_keeps_its_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = init_db(tmp.path().join("chat.db")).unwrap();
        let room = create_room(&conn, "kitchen", false).unwrap();
        crate::messages::create_message(&conn, &room.id, &Uuid::new_v4(), "hi").unwrap();

        delete_room(&conn, &room.id).unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 1);
        assert!(delete_room(&conn, &room.id).is_err());
    }

    #[test]
    fn only_groups_carry_avatars() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = init_db(tmp.path().join("chat.db")).unwrap();
        let dm = create_room(&conn, "dm", false).unwrap();
        let group = create_room(&conn, "group", true).unwrap();
        assert!(set_room_avatar(&conn, &dm.id, Some("x")).is_err());
        set_room_avatar(&conn, &group.id, Some("x")).unwrap();
    }
}
