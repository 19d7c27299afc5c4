use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use janitor::{config::DEFAULT_GRACE_PERIOD_SECS, AuditConfig, ReportDetail};
use serde::Deserialize;

use crate::files::ContentStore;

/// Command line options for the janitor.
#[derive(Parser, Debug, Default)]
#[command(name = "chat_janitor", version)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the chat data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Override the grace period in seconds.
    #[arg(long)]
    pub grace_secs: Option<u64>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one audit and print the report.
    Audit {
        /// Delete orphaned files after auditing.
        #[arg(long)]
        cleanup: bool,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Clean up once per installed version, as done at app launch.
    Launch,
    /// Keep auditing on an interval until interrupted.
    Housekeep,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base directory holding the database and blob areas.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    pub grace_period_secs: u64,
    pub prune_empty_dirs: bool,
    pub report_detail: ReportDetail,
    pub housekeeping_interval_secs: u64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Version recorded with each completed cleanup.
    pub app_version: String,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    audit: FileAudit,
    #[serde(default)]
    housekeeping: FileHousekeeping,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileAudit {
    #[serde(default = "default_grace")]
    grace_period_secs: u64,
    #[serde(default)]
    prune_empty_dirs: bool,
    #[serde(default)]
    report_detail: ReportDetail,
}

#[derive(Deserialize)]
struct FileHousekeeping {
    #[serde(default = "default_interval")]
    interval_secs: u64,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_grace() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_interval() -> u64 {
    6 * 60 * 60
}

fn default_logging() -> bool {
    true
}

impl Default for FileAudit {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace(),
            prune_empty_dirs: false,
            report_detail: ReportDetail::default(),
        }
    }
}

impl Default for FileHousekeeping {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHAT_JANITOR_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chat_janitor.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut data_dir = file_cfg.storage.data_dir;
        let mut grace = file_cfg.audit.grace_period_secs;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(d) = std::env::var("CHAT_JANITOR_DATA_DIR") {
            data_dir = Some(PathBuf::from(d));
        }
        if let Ok(g) = std::env::var("CHAT_JANITOR_GRACE_SECS") {
            if let Ok(g) = g.parse::<u64>() {
                grace = g;
            }
        }
        if let Ok(l) = std::env::var("CHAT_JANITOR_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(d) = &cli.data_dir {
            data_dir = Some(d.clone());
        }
        if let Some(g) = cli.grace_secs {
            grace = g;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        let interval = file_cfg.housekeeping.interval_secs;
        if interval < 60 {
            anyhow::bail!("invalid_interval");
        }

        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let db_path = file_cfg
            .storage
            .db_path
            .unwrap_or_else(|| data_dir.join("chat.db"));
        Ok(Self {
            settings_path: data_dir.join("settings.json"),
            db_path,
            data_dir,
            grace_period_secs: grace,
            prune_empty_dirs: file_cfg.audit.prune_empty_dirs,
            report_detail: file_cfg.audit.report_detail,
            housekeeping_interval_secs: interval,
            logging_enabled: logging,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Engine policy for auditing this data directory.
    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            roots: ContentStore::new(&self.data_dir).roots(),
            grace_period_secs: self.grace_period_secs,
            prune_empty_dirs: self.prune_empty_dirs,
            report_detail: self.report_detail,
            ..Default::default()
        }
    }
}

/// Determine the default data directory for the chat app.
pub fn default_data_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("org", "homecore", "family_chat") {
        proj.data_dir().to_path_buf()
    } else {
        PathBuf::from("./family_chat_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        std::env::remove_var("CHAT_JANITOR_DATA_DIR");
        std::env::remove_var("CHAT_JANITOR_GRACE_SECS");
        std::env::remove_var("CHAT_JANITOR_LOGGING");
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(
            &path,
            r#"
[storage]
data_dir = "/srv/chat"

[audit]
grace_period_secs = 900
report_detail = "summary"

[logging]
enabled = false
"#,
        )
        .unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/chat"));
        assert_eq!(cfg.db_path, PathBuf::from("/srv/chat/chat.db"));
        assert_eq!(cfg.grace_period_secs, 900);
        assert_eq!(cfg.report_detail, ReportDetail::Summary);
        assert!(!cfg.logging_enabled);
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "").unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.grace_period_secs, DEFAULT_GRACE_PERIOD_SECS);
        assert_eq!(cfg.housekeeping_interval_secs, 6 * 60 * 60);
        assert!(cfg.logging_enabled);
        assert!(!cfg.prune_empty_dirs);
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[audit]\ngrace_period_secs=100\n").unwrap();
        std::env::set_var("CHAT_JANITOR_GRACE_SECS", "200");
        let cli = Cli {
            config: Some(path.clone()),
            ..Default::default()
        };
        assert_eq!(Config::load(&cli).unwrap().grace_period_secs, 200);

        let cli = Cli {
            config: Some(path),
            grace_secs: Some(300),
            ..Default::default()
        };
        assert_eq!(Config::load(&cli).unwrap().grace_period_secs, 300);
        std::env::remove_var("CHAT_JANITOR_GRACE_SECS");
    }

    #[test]
    #[serial]
    fn short_interval_fails() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[housekeeping]\ninterval_secs=5\n").unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    #[serial]
    fn roots_follow_the_data_dir() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "").unwrap();
        let cli = Cli {
            config: Some(path),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        let audit = Config::load(&cli).unwrap().audit_config();
        let names: Vec<&str> = audit.roots.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["files", "stickers", "avatars", "voice", "tmp"]);
        assert!(audit.roots[0].path.starts_with(dir.path().join("data")));
    }
}
