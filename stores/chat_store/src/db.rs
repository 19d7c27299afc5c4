use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize the SQLite database and run migrations.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(PRAGMAS)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a connection pool over the database at `path`, creating the schema.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    init_db(path).with_context(|| format!("initializing database {}", path.display()))?;
    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(PRAGMAS));
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .context("building connection pool")?;
    Ok(pool)
}

// Rows may outlive their parents; the audit reports them as dangling.
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA foreign_keys = OFF;
"#;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT UNIQUE NOT NULL,
  display_name TEXT NOT NULL,
  avatar_file TEXT
);

CREATE TABLE IF NOT EXISTS rooms (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  is_group INTEGER NOT NULL DEFAULT 0,
  avatar_file TEXT,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
  id TEXT PRIMARY KEY,
  room_id TEXT NOT NULL,
  author_id TEXT NOT NULL,
  text_md TEXT NOT NULL,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attachments (
  id TEXT PRIMARY KEY,
  message_id TEXT NOT NULL,
  file_id TEXT,
  file_name TEXT NOT NULL,
  mime TEXT,
  size_bytes INTEGER NOT NULL,
  thumbnails TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS stickers (
  pack_id TEXT NOT NULL,
  sticker_id INTEGER NOT NULL,
  emoji TEXT,
  file_id TEXT,
  PRIMARY KEY (pack_id, sticker_id)
);

CREATE TABLE IF NOT EXISTS link_previews (
  message_id TEXT PRIMARY KEY,
  url TEXT NOT NULL,
  title TEXT,
  image_file_id TEXT
);

CREATE TABLE IF NOT EXISTS voice_memos (
  id TEXT PRIMARY KEY,
  message_id TEXT NOT NULL,
  file_id TEXT,
  duration_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS attachments_message ON attachments(message_id);
CREATE INDEX IF NOT EXISTS voice_memos_message ON voice_memos(message_id);
"#;
