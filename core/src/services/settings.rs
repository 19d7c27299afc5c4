use std::{collections::HashMap, fs, path::PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use janitor_api::{LastCleaningMetadata, SettingsError, SettingsStore};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

pub const LAST_CLEANING_VERSION_KEY: &str = "orphan_cleaner.last_cleaning_version";
pub const LAST_CLEANING_DATE_KEY: &str = "orphan_cleaner.last_cleaning_date";

/// Simple JSON based key-value settings file.
pub struct JsonSettingsStore {
    file: PathBuf,
    data: Mutex<HashMap<String, Value>>,
}

impl JsonSettingsStore {
    /// Open the settings file at `file`, starting empty if it does not exist.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let file = file.into();
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = match fs::read(&file) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(
                    path = %file.display(),
                    error = %err,
                    "discarding unreadable settings file"
                );
                HashMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            file,
            data: Mutex::new(data),
        })
    }

    /// Open `settings.json` in the platform data directory for `app`.
    pub fn open_default(app: &str) -> Result<Self> {
        let proj = ProjectDirs::from("org", "janitor", app)
            .context("no home directory to place settings in")?;
        let file = proj.data_dir().join("settings.json");
        Self::open(&file).with_context(|| format!("opening settings {}", file.display()))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Store several values and persist them in one write. Readers only see
    /// the new values once they are on disk.
    pub fn put_all(&self, entries: Vec<(String, Value)>) -> Result<(), SettingsError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        next.extend(entries);
        let bytes = serde_json::to_vec_pretty(&next)?;
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.file)?;
        *data = next;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn last_cleaning(&self) -> Result<Option<LastCleaningMetadata>, SettingsError> {
        let version = self.get(LAST_CLEANING_VERSION_KEY);
        let date = self.get(LAST_CLEANING_DATE_KEY);
        Ok(match (version, date) {
            (Some(Value::String(version)), Some(date)) => date.as_i64().map(|cleaned_at| {
                LastCleaningMetadata {
                    version,
                    cleaned_at,
                }
            }),
            _ => None,
        })
    }

    fn set_last_cleaning(&self, meta: &LastCleaningMetadata) -> Result<(), SettingsError> {
        self.put_all(vec![
            (
                LAST_CLEANING_VERSION_KEY.to_string(),
                Value::String(meta.version.clone()),
            ),
            (LAST_CLEANING_DATE_KEY.to_string(), Value::from(meta.cleaned_at)),
        ])
    }
}
