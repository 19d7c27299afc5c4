//! Orphan data reconciliation: finds files no record references and records
//! whose files are gone, and optionally deletes the orphaned files.

pub mod cleanup;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod housekeeping;
pub mod orphans;
pub mod records;
pub mod registry;
pub mod services;
pub mod walker;

pub use config::{AuditConfig, AuditPolicy, ConfigError, ReportDetail, RootConfig};
pub use coordinator::{AuditCoordinator, AuditOutcome, AuditState, AuditTicket, Collaborators};
pub use error::AuditFailure;
pub use events::AuditEvent;
pub use housekeeping::spawn_housekeeping;
pub use services::{JsonSettingsStore, LocalFileSystem};
