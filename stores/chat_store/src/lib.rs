//! Chat database collaborator for the orphan janitor.

pub mod config;
pub mod db;
pub mod files;
pub mod messages;
pub mod model;
pub mod rooms;
pub mod snapshot;

use std::sync::Arc;

use anyhow::{Context, Result};
use janitor::{AuditCoordinator, Collaborators, JsonSettingsStore, LocalFileSystem};

use crate::{config::Config, files::ContentStore, snapshot::SqliteRecordStore};

/// Wire the chat database, its content store and the settings file into a
/// coordinator. Creates the blob areas if they do not exist yet.
pub fn build_coordinator(cfg: &Config) -> Result<AuditCoordinator> {
    let content = ContentStore::new(&cfg.data_dir);
    content
        .create_dirs()
        .with_context(|| format!("creating blob areas under {}", cfg.data_dir.display()))?;
    let pool = db::open_pool(&cfg.db_path)?;
    let settings = JsonSettingsStore::open(&cfg.settings_path)
        .with_context(|| format!("opening settings {}", cfg.settings_path.display()))?;
    let policy = cfg.audit_config().validate()?;

    Ok(AuditCoordinator::new(
        Collaborators {
            records: Arc::new(SqliteRecordStore::new(pool, content)),
            fs: Arc::new(LocalFileSystem),
            settings: Arc::new(settings),
        },
        policy,
        cfg.app_version.clone(),
    ))
}
